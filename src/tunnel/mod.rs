//! Tunnel process supervision.
//!
//! This module provides:
//! - Output line reassembly and classification (`output`)
//! - Launch, readiness and shutdown of the sc process (`supervisor`)
//! - OS-level process helpers (`process`)

pub mod output;
pub mod process;
pub mod supervisor;

pub use output::{LineBuffer, TunnelState};
pub use supervisor::{ConnectError, Supervisor, TunnelProcess};
