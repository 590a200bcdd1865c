//! nvrec-capture - Capture device layer for nvrec
//!
//! Defines the blocking [`CaptureClient`] capability, ownership guards that
//! release device handles on drop, and a simulated backend.

pub mod client;
pub mod error;
pub mod handle;
pub mod sim;

pub use client::{CaptureClient, CaptureEvent, Credentials, DeviceInfo, LoginId, StreamId};
pub use error::{CaptureError, Result};
pub use handle::{Connection, LiveStream};
pub use sim::{SimCall, SimulatedClient};
