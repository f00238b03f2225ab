//! Test Helper Utilities
//!
//! Shared utilities for platter-resolver integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_sources;

pub use db_utils::{create_test_db, open_test_db, seed_album, seed_track};
pub use fake_sources::{video, FakeMetadata, FakeVideoSource, FixedDurationSource};
