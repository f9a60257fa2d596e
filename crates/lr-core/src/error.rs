//! Failure taxonomy for a listener report request.

use thiserror::Error;

/// Boxed error from an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a listener report.
///
/// Every variant aborts the whole request; no partial output is produced.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A `start` or `end` parameter could not be parsed, or the range is inverted.
    #[error("invalid time range: {message}")]
    InvalidTimeRange { message: String },

    /// An event referenced a mount or remote that the name lookup does not know.
    #[error("{kind} {id} is not configured for station {station}")]
    Configuration {
        kind: &'static str,
        id: i64,
        station: i64,
    },

    /// A collaborator (event source, classifier, geolocator) failed.
    #[error("{collaborator} unavailable")]
    UpstreamUnavailable {
        collaborator: &'static str,
        #[source]
        source: BoxError,
    },

    /// The request ran past its execution budget.
    #[error("listener report exceeded its execution budget of {budget_secs}s")]
    DeadlineExceeded { budget_secs: u64 },

    /// Writing the export failed.
    #[error("failed to write export")]
    Export(#[from] std::io::Error),
}

impl ReportError {
    /// Wraps a collaborator failure.
    pub fn upstream(collaborator: &'static str, source: impl Into<BoxError>) -> Self {
        Self::UpstreamUnavailable {
            collaborator,
            source: source.into(),
        }
    }

    pub(crate) fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidTimeRange {
            message: message.into(),
        }
    }

    /// The HTTP status a transport should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidTimeRange { .. } => 400,
            Self::Configuration { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::DeadlineExceeded { .. }
            | Self::Export(_) => 500,
        }
    }

    /// Whether the caller's input caused the failure.
    pub const fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_range_is_client_error() {
        let err = ReportError::invalid_range("bad start");
        assert_eq!(err.status_code(), 400);
        assert!(err.is_client_error());
    }

    #[test]
    fn collaborator_failures_are_server_errors() {
        let config = ReportError::Configuration {
            kind: "mount",
            id: 7,
            station: 1,
        };
        assert_eq!(config.status_code(), 500);
        assert_eq!(
            config.to_string(),
            "mount 7 is not configured for station 1"
        );

        let upstream = ReportError::upstream("geolocator", "connection refused");
        assert_eq!(upstream.status_code(), 500);
        assert!(!upstream.is_client_error());
        assert_eq!(upstream.to_string(), "geolocator unavailable");
    }
}
