use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("CredentialsUnavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("DecodingError: {0}")]
    DecodingError(String),

    #[error("SerializationError: {0}")]
    SerializationError(String),

    #[error("MetricsError: {0}")]
    MetricsError(#[source] prometheus::Error),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        let label = match self {
            StdError::JsonSerializationError(_) => "json_serialization_error",
            StdError::KubeError(_) => "kube_error",
            StdError::NotFound(_) => "not_found",
            StdError::AlreadyExists(_) => "already_exists",
            StdError::Conflict(_) => "conflict",
            StdError::CredentialsUnavailable(_) => "credentials_unavailable",
            StdError::MetadataMissing(_) => "metadata_missing",
            StdError::InvalidArgument(_) => "invalid_argument",
            StdError::DecodingError(_) => "decoding_error",
            StdError::SerializationError(_) => "serialization_error",
            StdError::MetricsError(_) => "metrics_error",
        };
        label.to_string()
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    /// The object was not there when it was looked up.
    pub fn is_not_found(&self) -> bool {
        matches!(self.inner(), StdError::NotFound(_))
    }

    /// A create raced with another writer that created the same object first.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.inner(), StdError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.inner(), StdError::Conflict(_))
    }

    fn inner(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        }
    }
}

impl From<StdError> for Error {
    fn from(e: StdError) -> Self {
        Error::StdError(e)
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::StdError(StdError::MetricsError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StdError(StdError::JsonSerializationError(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_sees_through_requeue_wrapper() {
        let err = Error::ErrorWithRequeue(ErrorWithRequeue::new(
            StdError::NotFound("configmaps/mdb-config".to_string()),
            Duration::from_secs(10),
        ));
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert_eq!(err.metric_label(), "not_found");
    }

    #[test]
    fn test_metric_labels_are_stable() {
        let err = Error::from(StdError::CredentialsUnavailable("mdb-0-user".to_string()));
        assert_eq!(err.metric_label(), "credentials_unavailable");
        assert_eq!(
            err.to_string(),
            "Standard Error: CredentialsUnavailable: mdb-0-user"
        );
    }
}
