use shot_gate::GateError;

/// Errors produced by the Tower Gate middleware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    /// The caller already has the maximum number of requests in flight and
    /// none finished within the gate's acquire timeout.
    ///
    /// When the `axum` feature is enabled, this converts to `403 Forbidden`.
    #[error("Too many requests")]
    TooManyRequests,

    /// The layer's cancellation token fired while the request waited for a permit.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Request cancelled while waiting for a permit")]
    Cancelled,

    /// The extractor found no caller identity on the request.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("Request carries no caller identity")]
    MissingIdentity,

    /// An unexpected error occurred in the gate.
    ///
    /// The string contains the `Display` representation of the gate error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal gate error: {0}")]
    Inner(String),
}

impl From<GateError> for GateRejection {
    fn from(err: GateError) -> Self {
        match err {
            GateError::LimitExceeded { .. } => Self::TooManyRequests,
            GateError::Cancelled => Self::Cancelled,
            other => Self::Inner(other.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateRejection {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::TooManyRequests => StatusCode::FORBIDDEN,
            Self::MissingIdentity => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_errors_map_to_rejections() {
        let limit = GateError::LimitExceeded {
            identity: "micky".to_string(),
        };
        assert_eq!(GateRejection::from(limit), GateRejection::TooManyRequests);
        assert_eq!(
            GateRejection::from(GateError::Cancelled),
            GateRejection::Cancelled
        );
        assert!(matches!(
            GateRejection::from(GateError::NoRuntime),
            GateRejection::Inner(_)
        ));
    }

    #[cfg(feature = "axum")]
    #[test]
    fn rejections_map_to_status_codes() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        assert_eq!(
            GateRejection::TooManyRequests.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GateRejection::MissingIdentity.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateRejection::Cancelled.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GateRejection::Inner("boom".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
