//! Infrastructure layer (adapters/implementations).
//!
//! This module contains the line diff engine, the backend adapter seam and
//! configuration loading.

pub mod adapter;
pub mod app_config;
pub mod diff;
