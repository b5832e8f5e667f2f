//! snapdiff CLI entry point.
//!
//! Diffs two versions of a file and runs them through the review engine
//! backed by the in-process adapter.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapdiff::application::review::{
    CompactDiff, FullDiff, generate_compact_diff, generate_full_diff, get_file_stats,
};
use snapdiff::infra::adapter::MemoryAdapter;
use snapdiff::infra::app_config::{EngineConfig, config_path, load_config};
use snapdiff::infra::diff::{DiffLine, LineTag, apply_context_collapsing, diff_lines_with};
use snapdiff::state::EngineContext;

#[derive(Parser, Debug)]
#[command(name = "snapdiff")]
#[command(version)]
#[command(about = "Review file changes as acceptable diff blocks", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a line diff between two files
    Diff {
        /// Original version
        old: PathBuf,
        /// Modified version
        new: PathBuf,
        /// Unchanged lines kept around each change (negative shows everything)
        #[arg(short, long, allow_negative_numbers = true)]
        context: Option<i32>,
    },

    /// Split the changes between two files into review blocks
    Review {
        /// Original version
        old: PathBuf,
        /// Modified version
        new: PathBuf,
        /// Show every block instead of only critical ones
        #[arg(long)]
        full: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let config = load_config();

    match args.command {
        Commands::Diff { old, new, context } => run_diff(&config, &old, &new, context),
        Commands::Review {
            old,
            new,
            full,
            json,
        } => run_review(config, &old, &new, full, json).await,
        Commands::Config => {
            println!("# {}", config_path().display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn run_diff(config: &EngineConfig, old: &Path, new: &Path, context: Option<i32>) -> Result<()> {
    let lines = diff_lines_with(&read(old)?, &read(new)?, &config.diff_options());
    let lines = apply_context_collapsing(&lines, context.unwrap_or(config.context_lines));

    println!("--- {}", old.display());
    println!("+++ {}", new.display());
    for line in &lines {
        println!("{}", render_line(line));
    }
    Ok(())
}

fn render_line(line: &DiffLine) -> String {
    let prefix = match line.tag {
        LineTag::Unchanged => ' ',
        LineTag::Added => '+',
        LineTag::Removed => '-',
        LineTag::Omitted | LineTag::NoChanges | LineTag::Failed => '~',
    };
    format!("{prefix}{}", line.content)
}

async fn run_review(config: EngineConfig, old: &Path, new: &Path, full: bool, json: bool) -> Result<()> {
    let file_path = new.display().to_string();
    let session_id = uuid::Uuid::new_v4().to_string();

    let adapter = Arc::new(MemoryAdapter::new());
    adapter.put_file(&session_id, &file_path, read(old)?, read(new)?);
    let context = EngineContext::new(adapter, config);
    let manager = &context.manager;

    manager.refresh_session_state(&session_id).await;
    let file = manager
        .refresh_file_state(&session_id, &file_path)
        .await
        .with_context(|| format!("Failed to load {file_path}"))?;

    if full {
        let view = generate_full_diff(&file);
        if json {
            println!("{}", serde_json::to_string_pretty(&view)?);
        } else {
            print_full(&view);
        }
    } else {
        let view = generate_compact_diff(&file);
        if json {
            println!("{}", serde_json::to_string_pretty(&view)?);
        } else {
            print_compact(&view);
        }
    }

    if !json {
        let stats = get_file_stats(&file);
        println!(
            "{} blocks, {} critical, session {}",
            stats.total_blocks, stats.critical_blocks, session_id
        );
    }
    Ok(())
}

fn print_compact(view: &CompactDiff) {
    println!(
        "{}: +{} -{} ~{}",
        view.file_path, view.summary.additions, view.summary.deletions, view.summary.modifications
    );
    for block in &view.critical_blocks {
        println!(
            "  [{}] {} {} (lines {}-{})",
            block.id, block.priority, block.block_type, block.modified_start, block.modified_end
        );
    }
}

fn print_full(view: &FullDiff) {
    println!("{}", view.file_path);
    for entry in &view.navigation {
        println!(
            "  [{}] line {}: {} ({})",
            entry.block_id, entry.line_number, entry.description, entry.status
        );
    }
}
