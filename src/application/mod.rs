//! Application layer (use-cases, policies).
//!
//! Orchestrates the domain types: the state manager owns review state, the
//! lock coordinator arbitrates file ownership, and both publish on the
//! event bus.

pub mod events;
pub mod locks;
pub mod review;
pub mod state_manager;
