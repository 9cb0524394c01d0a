use thiserror::Error;

/// Errors that abort a broadcast run.
///
/// Per-recipient delivery problems are not represented here; they are
/// recovered inside the dispatcher and only show up in the batch report.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Subscriber source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure of a single send through the messaging transport.
///
/// `Blocked` and `Unreachable` are permanent: the recipient will not accept
/// messages until they act. Everything else may succeed on a later run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recipient blocked the bot ({code}): {description}")]
    Blocked { code: i64, description: String },

    #[error("recipient unreachable ({code}): {description}")]
    Unreachable { code: i64, description: String },

    #[error("rate limited (retry after {retry_after:?}s): {description}")]
    RateLimited {
        retry_after: Option<u64>,
        description: String,
    },

    #[error("api error ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("send panicked")]
    Panicked,
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DeliveryError::Blocked { .. } | DeliveryError::Unreachable { .. }
        )
    }

    /// Transport error code, when the API returned one.
    pub fn code(&self) -> Option<i64> {
        match self {
            DeliveryError::Blocked { code, .. }
            | DeliveryError::Unreachable { code, .. }
            | DeliveryError::Api { code, .. } => Some(*code),
            DeliveryError::RateLimited { .. } => Some(429),
            DeliveryError::Network(_) | DeliveryError::Panicked => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        let blocked = DeliveryError::Blocked {
            code: 403,
            description: "Forbidden: bot was blocked by the user".to_string(),
        };
        let unreachable = DeliveryError::Unreachable {
            code: 400,
            description: "Bad Request: chat not found".to_string(),
        };
        assert!(blocked.is_permanent());
        assert!(unreachable.is_permanent());
        assert!(!DeliveryError::Network("timeout".to_string()).is_permanent());
        assert!(!DeliveryError::Panicked.is_permanent());
        assert!(
            !DeliveryError::RateLimited {
                retry_after: Some(3),
                description: "Too Many Requests".to_string(),
            }
            .is_permanent()
        );
    }

    #[test]
    fn test_codes() {
        let api = DeliveryError::Api {
            code: 500,
            description: "Internal Server Error".to_string(),
        };
        assert_eq!(api.code(), Some(500));
        assert_eq!(DeliveryError::Network("reset".to_string()).code(), None);
        assert!(api.to_string().contains("500"));
    }
}
