// src/capture/mod.rs
pub mod client;
pub mod fingerprint;
pub mod gate;
pub mod interceptor;
pub mod types;

pub use client::{HookedClient, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use fingerprint::FingerprintRule;
pub use gate::{ActiveGuard, Admission, FingerprintGate, Rejection};
pub use interceptor::{NetworkInterceptor, TargetRule};
pub use types::{CaptureMethod, CaptureRequest, CapturedPayload, Fingerprint};
