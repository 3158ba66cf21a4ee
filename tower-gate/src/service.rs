use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use futures::future::BoxFuture;
use pin_project_lite::pin_project;
use shot_gate::Gate;
use shot_gate::GateError;
use shot_gate::Identity;
use shot_gate::PermitGuard;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::GateRejection;

type Acquire<K> = BoxFuture<'static, Result<PermitGuard<K>, GateError>>;

/// Holds each request until its caller has a free permit on the gate.
///
/// The inner service is only asked for readiness once the permit is held, so a
/// request queued behind its own caller's limit never reserves inner capacity.
pub struct IdentityLimitService<K: Identity, F, S> {
    inner: S,
    gate: Arc<Gate<K>>,
    extractor: F,
    cancel: Option<CancellationToken>,
}

impl<K: Identity, F: Clone, S: Clone> Clone for IdentityLimitService<K, F, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: Arc::clone(&self.gate),
            extractor: self.extractor.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<K: Identity, F, S> IdentityLimitService<K, F, S> {
    /// Wraps `inner`, reading each caller's identity with `extractor`.
    pub fn new(inner: S, gate: Arc<Gate<K>>, extractor: F) -> Self {
        Self {
            inner,
            gate,
            extractor,
            cancel: None,
        }
    }

    /// Fails requests still waiting for a permit once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The gate shared by every clone of this service.
    pub fn gate(&self) -> &Arc<Gate<K>> {
        &self.gate
    }
}

pin_project! {
    /// Waits for a permit, then drives the inner service's future while holding it.
    ///
    /// The permit is released when the inner future resolves, or when this
    /// future is dropped.
    pub struct ResponseFuture<G, S, Req, F> {
        acquire: Option<BoxFuture<'static, Result<G, GateError>>>,
        pending: Option<(S, Req)>,
        guard: Option<G>,
        rejection: Option<GateRejection>,
        #[pin]
        inner: Option<F>,
    }
}

impl<G, S, Req, F> ResponseFuture<G, S, Req, F> {
    fn admitting(acquire: BoxFuture<'static, Result<G, GateError>>, svc: S, req: Req) -> Self {
        Self {
            acquire: Some(acquire),
            pending: Some((svc, req)),
            guard: None,
            rejection: None,
            inner: None,
        }
    }

    fn rejected(rejection: GateRejection) -> Self {
        Self {
            acquire: None,
            pending: None,
            guard: None,
            rejection: Some(rejection),
            inner: None,
        }
    }
}

impl<G, S, Req, F, T> Future for ResponseFuture<G, S, Req, F>
where
    S: Service<Req, Future = F, Error = BoxError>,
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(rejection) = this.rejection.take() {
            return Poll::Ready(Err(Box::new(rejection)));
        }

        // 1. Wait for a permit
        if let Some(acquire) = this.acquire.as_mut() {
            let admitted = ready!(acquire.as_mut().poll(cx));
            *this.acquire = None;
            match admitted {
                Ok(guard) => *this.guard = Some(guard),
                Err(err) => {
                    *this.pending = None;
                    return Poll::Ready(Err(Box::new(GateRejection::from(err))));
                }
            }
        }

        // 2. Admitted: wait for the inner service, then hand it the request
        if let Some((svc, _)) = this.pending.as_mut() {
            if let Err(err) = ready!(svc.poll_ready(cx)) {
                *this.pending = None;
                *this.guard = None;
                return Poll::Ready(Err(err));
            }
            if let Some((mut svc, req)) = this.pending.take() {
                this.inner.set(Some(svc.call(req)));
            }
        }

        // 3. Drive the inner future, releasing the permit once it resolves
        match this.inner.as_mut().as_pin_mut() {
            Some(inner) => {
                let res = ready!(inner.poll(cx));
                this.inner.set(None);
                *this.guard = None;
                Poll::Ready(res)
            }
            None => Poll::Ready(Err(Box::new(GateRejection::Inner(
                "response future polled after completion".to_string(),
            )))),
        }
    }
}

impl<K, F, S, Req> Service<Req> for IdentityLimitService<K, F, S>
where
    K: Identity,
    F: Fn(&Req) -> Option<K>,
    S: Service<Req, Error = BoxError> + Clone,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<PermitGuard<K>, S, Req, S::Future>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Inner readiness is polled by the response future after admission.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let svc = self.inner.clone();

        match (self.extractor)(&req) {
            Some(identity) => {
                let gate = Arc::clone(&self.gate);
                let cancel = self.cancel.clone();
                let acquire: Acquire<K> = Box::pin(async move {
                    match cancel {
                        Some(token) => gate.acquire_guard_with_cancel(&identity, &token).await,
                        None => gate.acquire_guard(&identity).await,
                    }
                });
                ResponseFuture::admitting(acquire, svc, req)
            }
            None => {
                debug!("rejecting request without a caller identity");
                ResponseFuture::rejected(GateRejection::MissingIdentity)
            }
        }
    }
}
