use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Source '{source_name}' timed out searching {city} after {seconds}s")]
    SourceTimeout {
        source_name: String,
        city: String,
        seconds: u64,
    },

    #[error("No source registered for '{0}'")]
    SourceUnavailable(String),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Cycle error: {0}")]
    Cycle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Treat the (source, city) pair as having produced nothing.
    ContributeNothing,
    /// Skip the listing without writing a record.
    SkipListing,
    /// Record the attempt as failed and move on.
    RecordFailure,
    /// Log and keep the in-memory counters.
    LogAndContinue,
    /// Abandon the current cycle, keep the scheduler alive.
    AbortCycle,
    /// Refuse to start.
    FixConfig,
}

impl DispatchError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            DispatchError::SourceTimeout { .. } => RecoveryStrategy::ContributeNothing,
            DispatchError::SourceUnavailable(_) => RecoveryStrategy::SkipListing,
            DispatchError::Submission(_) => RecoveryStrategy::RecordFailure,
            DispatchError::Persistence(_) => RecoveryStrategy::LogAndContinue,
            DispatchError::Cycle(_) => RecoveryStrategy::AbortCycle,
            DispatchError::Config(_) => RecoveryStrategy::FixConfig,
            DispatchError::Network(_) => RecoveryStrategy::ContributeNothing,
            DispatchError::Browser(_) => RecoveryStrategy::RecordFailure,
            DispatchError::Parse(_) => RecoveryStrategy::ContributeNothing,
        }
    }

    /// Strategy for a boxed error, `fallback` when it is not a `DispatchError`.
    pub fn strategy_for(
        err: &(dyn std::error::Error + Send + Sync + 'static),
        fallback: RecoveryStrategy,
    ) -> RecoveryStrategy {
        err.downcast_ref::<DispatchError>()
            .map(DispatchError::recovery_strategy)
            .unwrap_or(fallback)
    }

    /// Short label used for error notifications and event messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::SourceTimeout { .. } => "source_timeout",
            DispatchError::SourceUnavailable(_) => "source_unavailable",
            DispatchError::Submission(_) => "submission",
            DispatchError::Persistence(_) => "persistence",
            DispatchError::Cycle(_) => "cycle",
            DispatchError::Config(_) => "config",
            DispatchError::Network(_) => "network",
            DispatchError::Browser(_) => "browser",
            DispatchError::Parse(_) => "parse",
        }
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Persistence(err.to_string())
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for DispatchError {
    fn from(err: toml::de::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Network(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for DispatchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        DispatchError::Browser(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_strategies() {
        let timeout = DispatchError::SourceTimeout {
            source_name: "immonet".to_string(),
            city: "Berlin".to_string(),
            seconds: 60,
        };
        assert_eq!(timeout.recovery_strategy(), RecoveryStrategy::ContributeNothing);
        assert_eq!(
            DispatchError::SourceUnavailable("x".into()).recovery_strategy(),
            RecoveryStrategy::SkipListing
        );
        assert_eq!(
            DispatchError::Submission("form".into()).recovery_strategy(),
            RecoveryStrategy::RecordFailure
        );
        assert_eq!(
            DispatchError::Persistence("disk".into()).recovery_strategy(),
            RecoveryStrategy::LogAndContinue
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = DispatchError::SourceTimeout {
            source_name: "immonet".to_string(),
            city: "Hamburg".to_string(),
            seconds: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("immonet"));
        assert!(msg.contains("Hamburg"));
        assert_eq!(err.kind(), "source_timeout");
    }

    #[test]
    fn test_boxed_error_downcasts() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(DispatchError::Submission("rejected".into()));
        let inner = boxed.downcast_ref::<DispatchError>().unwrap();
        assert_eq!(inner.kind(), "submission");
    }

    #[test]
    fn test_strategy_for_boxed_errors() {
        let skip: Box<dyn std::error::Error + Send + Sync> =
            Box::new(DispatchError::SourceUnavailable("ghost".into()));
        assert_eq!(
            DispatchError::strategy_for(skip.as_ref(), RecoveryStrategy::RecordFailure),
            RecoveryStrategy::SkipListing
        );

        let foreign: Box<dyn std::error::Error + Send + Sync> = "plain failure".into();
        assert_eq!(
            DispatchError::strategy_for(foreign.as_ref(), RecoveryStrategy::RecordFailure),
            RecoveryStrategy::RecordFailure
        );
    }
}
