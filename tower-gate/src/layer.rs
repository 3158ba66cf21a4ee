use std::sync::Arc;

use shot_gate::Gate;
use shot_gate::Identity;
use tokio_util::sync::CancellationToken;
use tower::Layer;

use crate::service::IdentityLimitService;

/// Applies a per-identity concurrency limit to requests.
///
/// `extractor` is called with every request and returns the caller identity,
/// or `None` to reject the request.
///
/// The wrapped service is polled for readiness only after a request holds its
/// permit. Requests waiting on a saturated identity therefore leave inner
/// capacity, such as a global `ConcurrencyLimit`, free for other callers.
pub struct IdentityLimitLayer<K: Identity, F> {
    gate: Arc<Gate<K>>,
    extractor: F,
    cancel: Option<CancellationToken>,
}

impl<K: Identity, F: Clone> Clone for IdentityLimitLayer<K, F> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            extractor: self.extractor.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<K: Identity, F> IdentityLimitLayer<K, F> {
    /// Create an IdentityLimitLayer
    pub fn new(gate: Arc<Gate<K>>, extractor: F) -> Self {
        Self {
            gate,
            extractor,
            cancel: None,
        }
    }

    /// Fail requests still waiting for a permit with
    /// [`GateRejection::Cancelled`](crate::GateRejection::Cancelled) once
    /// `token` is cancelled, e.g. during graceful shutdown.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<K: Identity, F: Clone, S> Layer<S> for IdentityLimitLayer<K, F> {
    type Service = IdentityLimitService<K, F, S>;

    fn layer(&self, service: S) -> Self::Service {
        let service =
            IdentityLimitService::new(service, Arc::clone(&self.gate), self.extractor.clone());
        match &self.cancel {
            Some(token) => service.with_cancellation(token.clone()),
            None => service,
        }
    }
}
