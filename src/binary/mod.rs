//! Acquisition of the sc binary.
//!
//! This module provides:
//! - Platform-specific archive and path naming (`store`)
//! - Download, verification and unpacking (`fetch`)

pub mod fetch;
pub mod store;

pub use fetch::{AcquireError, BinaryFetcher};
pub use store::{archive_name, binary_path, folder_name, Platform};
