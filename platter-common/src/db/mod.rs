//! Database bootstrap for the shared catalog schema

pub mod init;

pub use init::*;
