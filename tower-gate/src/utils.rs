use std::sync::Arc;

use shot_gate::Gate;
use shot_gate::Identity;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::IdentityLimitLayer;

/// Service Builder Extension with a per-identity limit for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a per-identity concurrency limit
    fn identity_limit<K, F>(
        self,
        gate: Arc<Gate<K>>,
        extractor: F,
    ) -> ServiceBuilder<Stack<IdentityLimitLayer<K, F>, L>>
    where
        K: Identity;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn identity_limit<K, F>(
        self,
        gate: Arc<Gate<K>>,
        extractor: F,
    ) -> ServiceBuilder<Stack<IdentityLimitLayer<K, F>, L>>
    where
        K: Identity,
    {
        self.layer(IdentityLimitLayer::new(gate, extractor))
    }
}

/// Builds an extractor that reads the query parameter `name` from an `http::Request`.
///
/// The query is decoded as `application/x-www-form-urlencoded`, so `mi%63ky`
/// and `micky` name the same caller and `+` reads as a space. Empty values
/// count as missing.
#[cfg(feature = "http")]
pub fn query_param<B>(name: &'static str) -> impl Fn(&http::Request<B>) -> Option<String> + Clone {
    move |req: &http::Request<B>| {
        form_urlencoded::parse(req.uri().query()?.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}
