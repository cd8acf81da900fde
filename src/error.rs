use std::{error, fmt, sync::Arc};

use serde::Serialize;
use specta::Type;

use crate::{
    wire::{CompileError, WireError},
    Cardinality,
};

/// Errors raised while registering endpoints or assembling the schema.
///
/// These are fatal to startup. Nothing is served until they are fixed.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("{subject} of endpoint '{endpoint}' must have a type annotation")]
    MissingAnnotation { endpoint: String, subject: String },
    #[error("type '{ty}' cannot be represented in the wire schema: {reason}")]
    UnsupportedType { ty: String, reason: String },
    #[error("message name '{name}' is produced by both '{first}' and '{second}'")]
    DuplicateMessageName {
        name: String,
        first: String,
        second: String,
    },
    #[error("an endpoint named '{0}' is already registered")]
    DuplicateEndpointName(String),
    #[error("endpoint '{endpoint}' has an invalid signature: {reason}")]
    InvalidSignature { endpoint: String, reason: String },
    #[error("IO error writing schema: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors converting between wire messages and native values.
///
/// These only ever fail the call they happened in.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum MarshalError {
    #[error("'{message}' is missing required field '{field}'")]
    MissingField { message: String, field: String },
    #[error("'{message}' has unexpected field '{field}'")]
    UnexpectedField { message: String, field: String },
    #[error("field '{field}' of '{message}' expected {expected} but found {found}")]
    TypeMismatch {
        message: String,
        field: String,
        expected: String,
        found: String,
    },
    #[error("expected a record for '{message}' but found {found}")]
    NotARecord { message: String, found: String },
    #[error("expected wire message '{expected}' but found '{found}'")]
    WrongMessage { expected: String, found: String },
    #[error("error serializing native value: {0}")]
    Serialize(#[from] serde_value::SerializerError),
    #[error("error deserializing native value: {0}")]
    Deserialize(#[from] serde_value::DeserializerError),
}

/// A business error returned by a handler.
///
/// The dispatcher never looks inside it, it is handed back to the caller as a failed call.
#[derive(Debug, Clone)]
pub struct HandlerError {
    message: String,
    cause: Option<Arc<dyn error::Error + Send + Sync>>, // `Arc` so the error stays `Clone`
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn from_error<E>(err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Errors wiring compiled messages to registered endpoints.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("the method '{0}' is not registered on this service")]
    UnknownEndpoint(String),
    #[error("the compiled schema has no message named '{0}'")]
    MissingMessage(String),
    #[error("the compiled schema does not describe service '{0}'")]
    MissingService(String),
    #[error("method '{method}' is compiled as {compiled} but registered as {registered}")]
    CardinalityMismatch {
        method: String,
        compiled: Cardinality,
        registered: Cardinality,
    },
}

/// The failure of a single call, as the caller sees it.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CallError {
    #[error("error marshalling message: {0}")]
    Marshal(#[from] MarshalError),
    #[error("{0}")]
    Handler(#[from] HandlerError),
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
    #[error("error decoding wire message: {0}")]
    Wire(#[from] WireError),
    #[error("method '{method}' is {cardinality} and can't be called this way")]
    WrongCardinality {
        method: String,
        cardinality: Cardinality,
    },
    #[error("the call was cancelled")]
    Cancelled,
    #[error("the server is not accepting calls")]
    Unavailable,
}

impl CallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Marshal(_) | Self::Wire(_) => ErrorCode::InvalidArgument,
            Self::Handler(_) => ErrorCode::Unknown,
            Self::Dispatch(DispatchError::UnknownEndpoint(_)) | Self::WrongCardinality { .. } => {
                ErrorCode::Unimplemented
            }
            Self::Dispatch(_) => ErrorCode::Internal,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Unavailable => ErrorCode::Unavailable,
        }
    }

    /// The serializable form a transport reports back to its peer.
    pub fn to_status(&self) -> Status {
        Status {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Type, PartialEq, Eq)]
pub struct Status {
    pub(crate) code: ErrorCode,
    pub(crate) message: String,
}

impl Status {
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, Serialize, Type, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    Unimplemented,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub fn to_grpc_code(&self) -> u16 {
        match self {
            ErrorCode::Cancelled => 1,
            ErrorCode::Unknown => 2,
            ErrorCode::InvalidArgument => 3,
            ErrorCode::Unimplemented => 12,
            ErrorCode::Internal => 13,
            ErrorCode::Unavailable => 14,
        }
    }

    pub const fn from_grpc_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::Cancelled),
            2 => Some(ErrorCode::Unknown),
            3 => Some(ErrorCode::InvalidArgument),
            12 => Some(ErrorCode::Unimplemented),
            13 => Some(ErrorCode::Internal),
            14 => Some(ErrorCode::Unavailable),
            _ => None,
        }
    }
}

/// Errors from the `generate_schema` and `serve` pipelines.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("error compiling schema: {0}")]
    Compile(#[from] CompileError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("transport error: {0}")]
    Transport(Box<dyn error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        let err = CallError::Dispatch(DispatchError::UnknownEndpoint("sub".into()));
        let status = err.to_status();
        assert_eq!(status.code(), ErrorCode::Unimplemented);
        assert_eq!(
            status.message(),
            "the method 'sub' is not registered on this service"
        );

        let err = CallError::Handler(HandlerError::new("division by zero"));
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_grpc_codes() {
        for code in [
            ErrorCode::Cancelled,
            ErrorCode::Unknown,
            ErrorCode::InvalidArgument,
            ErrorCode::Unimplemented,
            ErrorCode::Internal,
            ErrorCode::Unavailable,
        ] {
            assert_eq!(ErrorCode::from_grpc_code(code.to_grpc_code()), Some(code));
        }
        assert_eq!(ErrorCode::from_grpc_code(0), None);
    }

    #[test]
    fn test_handler_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = HandlerError::from_error(io);
        assert_eq!(err.message(), "disk full");
        assert!(error::Error::source(&err).is_some());
        assert!(error::Error::source(&HandlerError::new("oops")).is_none());
    }
}
