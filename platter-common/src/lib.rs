//! # Platter Common Library
//!
//! Shared code for the Platter catalog services:
//! - Error type used across crates
//! - Root folder and TOML configuration loading
//! - Catalog event bus
//! - Database bootstrap for the shared catalog schema
//! - Timestamp helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
