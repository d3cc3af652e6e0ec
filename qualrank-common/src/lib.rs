//! # Qualrank Common Library
//!
//! Shared code for the qualification ranking engine and the request-handling
//! code that feeds it:
//! - Database initialization and persisted row models
//! - Configuration loading
//! - Timestamp helpers used by the audit trail
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
