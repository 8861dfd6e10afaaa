//! Error types for the lifecycle controller

use aws_sdk_iot::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Service error codes that mean "the thing you asked about does not exist"
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "ParameterNotFound",
    "NotFoundException",
];

/// Service error codes that mean "a resource with that name already exists"
const ALREADY_EXISTS_CODES: &[&str] = &["ResourceAlreadyExistsException", "ParameterAlreadyExists"];

/// Service error codes worth retrying within the invocation budget
///
/// Delete conflicts show up while a detach is still propagating through the
/// device-identity control plane, so they are retried like throttling.
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "TooManyRequestsException",
    "ServiceUnavailableException",
    "InternalFailureException",
    "InternalServerErrorException",
    "InternalServerError",
    "InternalException",
    "DeleteConflictException",
    "CertificateStateException",
    "TooManyUpdates",
];

/// Main error type for lifecycle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request failed validation before any external call
    #[error("validation error: {0}")]
    Validation(String),

    /// External object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// External object already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Control-plane call failed
    #[error("{operation} failed: {message}")]
    ControlPlane {
        /// Name of the external operation
        operation: String,
        /// Error detail reported by the control plane
        message: String,
        /// Whether another attempt may succeed
        retryable: bool,
    },

    /// Operation did not finish inside its budget
    #[error("timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Response could not be delivered to the orchestrator
    #[error("response delivery failed: {0}")]
    Delivery(String),

    /// Deliberate failure requested through the request properties
    #[error("{0}")]
    Requested(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a non-retryable control-plane error
    pub fn control_plane(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a retryable control-plane error
    pub fn transient(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a delivery error with the given message
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// True if another attempt of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ControlPlane {
                retryable: true,
                ..
            }
        )
    }

    /// True if the error reports a missing external object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify a control-plane failure by its service error code
    ///
    /// `transport` marks failures that never reached the service (timeouts,
    /// dispatch failures), which are always retryable.
    pub fn from_service_code(
        operation: &str,
        code: Option<&str>,
        message: impl Into<String>,
        transport: bool,
    ) -> Self {
        let message = message.into();
        match code {
            Some(c) if NOT_FOUND_CODES.contains(&c) => {
                Self::NotFound(format!("{operation}: {message}"))
            }
            Some(c) if ALREADY_EXISTS_CODES.contains(&c) => {
                Self::AlreadyExists(format!("{operation}: {message}"))
            }
            Some(c) if TRANSIENT_CODES.contains(&c) => Self::transient(operation, message),
            _ if transport => Self::transient(operation, message),
            _ => Self::control_plane(operation, message),
        }
    }

    /// Map an AWS SDK error into the controller taxonomy
    pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let transport = matches!(
            err,
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
        );
        let code = err.code().map(str::to_owned);
        let message = DisplayErrorContext(&err).to_string();
        Self::from_service_code(operation, code.as_deref(), message, transport)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
