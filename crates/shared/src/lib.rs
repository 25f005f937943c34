//! Linewise Shared Types and Utilities
//!
//! This crate contains types, errors, and utilities shared across the Linewise
//! queue engine and its worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
