//! nvrec core library
//!
//! Configuration, session management, rotation scheduling and the service
//! lifecycle. The binary in `main.rs` is a thin CLI over these modules.

pub mod config;
pub mod logging;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod target;
