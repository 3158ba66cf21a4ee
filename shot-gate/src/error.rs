/// Errors produced by a [`Gate`](crate::Gate).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The identity already has `limit` requests in flight and none finished
    /// within the acquire timeout.
    ///
    /// This is the normal outcome under load, not a fault.
    #[error("Too many concurrent requests for {identity}; wait for earlier requests to finish")]
    LimitExceeded {
        /// `Display` form of the rejected identity.
        identity: String,
    },

    /// The caller gave up waiting before a permit became available.
    #[error("Acquire cancelled before a permit became available")]
    Cancelled,

    /// A release had no matching acquire.
    ///
    /// Either the identity is unknown to the gate or all of its permits are
    /// already returned. Counters are left untouched.
    #[error("Release for {identity} has no matching acquire")]
    MisuseDetected {
        /// `Display` form of the misused identity.
        identity: String,
    },

    /// The configuration could not be loaded or failed validation.
    #[error("Invalid gate configuration: {0}")]
    InvalidConfig(String),

    /// The gate was constructed outside a tokio runtime, so the reclaimer
    /// could not be spawned.
    #[error("Gate must be created from within a tokio runtime")]
    NoRuntime,
}

impl GateError {
    /// `true` when the error is a limit rejection that callers should surface
    /// as "too many requests".
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }
}

impl From<figment::Error> for GateError {
    fn from(err: figment::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
