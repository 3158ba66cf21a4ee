//! # Tower Gate
//!
//! `tower-gate` puts a [`shot_gate::Gate`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service, so each caller identity can only
//! have a bounded number of requests in flight.
//!
//! ## The Identity Stack
//! [`IdentityLimitLayer`] takes a shared gate and an extractor that reads the caller's
//! identity from the request. For each call it:
//!
//! 1. **Identifies**: Requests without an identity are rejected with
//!    [`GateRejection::MissingIdentity`].
//! 2. **Admits**: Waits for one of the identity's permits, failing with
//!    [`GateRejection::TooManyRequests`] once the gate's acquire timeout elapses, or
//!    with [`GateRejection::Cancelled`] if the layer's cancellation token fires first.
//!    The inner service is only polled for readiness after this step.
//! 3. **Releases**: Returns the permit when the inner response future completes,
//!    fails, or is dropped.
//!
//! ## Feature Flags
//!
//! - `http`: Enables [`query_param`] for pulling decoded identities out of an `http::Request`.
//! - `axum`: Enables `IntoResponse` for [`GateRejection`] (403, 400, 503, 500).

#![warn(missing_docs)]

mod error;
mod layer;
mod service;
mod utils;


pub use error::GateRejection;
pub use layer::IdentityLimitLayer;
pub use service::IdentityLimitService;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
#[cfg(feature = "http")]
pub use utils::query_param;
