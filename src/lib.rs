// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bridge;
pub mod capture;
pub mod collector;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod state;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::capture::{FingerprintGate, HookedClient, NetworkInterceptor};
pub use crate::controller::{ControlRequest, ControlResponse, Controller};
pub use crate::delivery::{CollectorSink, DeliveryResult, DeliverySink};
pub use crate::error::{CaptureError, FetchError, SchedulerError};
pub use crate::pipeline::CapturePipeline;
pub use crate::scheduler::Scheduler;
