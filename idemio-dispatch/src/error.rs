use crate::exchange::convert::TypeConversionError;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the dispatch subsystem.
///
/// Every failure an exchange can terminate with is one of these variants. The same value is
/// stored on the exchange, handed to `Outcome::Failure` listeners and returned from
/// `ResultHandle::get`, so all observers report the identical cause. The type is `Clone` for
/// that reason: any wrapped source is reference counted.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// The destination's processing logic returned an error or panicked.
    #[error("Exchange {exchange_id} failed during processing: {source}")]
    Processing {
        exchange_id: Uuid,
        source: ProcessingError,
    },

    /// A value was present but could not be converted to the requested type.
    #[error(transparent)]
    TypeConversion(#[from] TypeConversionError),

    /// The result handle was not resolved within the requested bound. The exchange itself is
    /// unaffected and may still complete.
    #[error("Result was not available within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("No destination registered under '{name}'")]
    UnknownDestination { name: String },

    #[error("Worker pool '{pool}' has been shut down")]
    PoolShutdown { pool: String },

    #[error("Exchange {exchange_id} has already been completed")]
    DoubleCompletion { exchange_id: Uuid },

    /// A listener was registered after the exchange completed. The listener has already been
    /// invoked with the terminal state when this is returned.
    #[error("Listener registered after exchange {exchange_id} completed")]
    LateRegistration { exchange_id: Uuid },

    #[error("Exchange {exchange_id} was cancelled")]
    Cancelled { exchange_id: Uuid },
}

impl DispatchError {
    #[inline]
    pub fn processing_error(exchange_id: &Uuid, source: ProcessingError) -> Self {
        Self::Processing {
            exchange_id: *exchange_id,
            source,
        }
    }

    #[inline]
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    #[inline]
    pub fn unknown_destination(name: impl Into<String>) -> Self {
        Self::UnknownDestination { name: name.into() }
    }

    #[inline]
    pub fn pool_shutdown(pool: impl Into<String>) -> Self {
        Self::PoolShutdown { pool: pool.into() }
    }

    #[inline]
    pub(crate) const fn double_completion(exchange_id: Uuid) -> Self {
        Self::DoubleCompletion { exchange_id }
    }

    #[inline]
    pub(crate) const fn late_registration(exchange_id: Uuid) -> Self {
        Self::LateRegistration { exchange_id }
    }

    #[inline]
    pub(crate) const fn cancelled(exchange_id: Uuid) -> Self {
        Self::Cancelled { exchange_id }
    }

    /// Returns the processing failure when this error came from destination logic.
    pub fn processing_cause(&self) -> Option<&ProcessingError> {
        match self {
            Self::Processing { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// An error raised by destination logic.
///
/// The message is what the processor reported; `Display` prints it verbatim so callers can
/// compare against the original text. An optional source keeps the underlying error.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    message: String,
    cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps an arbitrary error, keeping it as the source and its text as the message.
    pub fn from_error(err: impl Error + Send + Sync + 'static) -> Self {
        Self {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    pub(crate) fn panicked(processor: &str, payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            String::from("unknown panic payload")
        };
        Self::new(format!("Processor '{}' panicked: {}", processor, detail))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ProcessingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProcessingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_displays_original_message() {
        let err = ProcessingError::new("Damn forced by unit test");
        assert_eq!(err.to_string(), "Damn forced by unit test");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_processing_error_keeps_source() {
        let parse = "abc".parse::<i64>().unwrap_err();
        let err = ProcessingError::from_error(parse.clone());
        assert_eq!(err.message(), parse.to_string());
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<std::num::ParseIntError>().is_some());
    }

    #[test]
    fn test_dispatch_error_exposes_processing_cause() {
        let id = Uuid::new_v4();
        let err = DispatchError::processing_error(&id, ProcessingError::new("boom"));
        assert_eq!(err.source().unwrap().to_string(), "boom");
        assert_eq!(err.processing_cause().unwrap().message(), "boom");
        assert!(DispatchError::timeout(Duration::from_millis(5)).processing_cause().is_none());
    }

    #[test]
    fn test_panic_payloads_are_described() {
        let err = ProcessingError::panicked("echo", Box::new("bad input"));
        assert_eq!(err.message(), "Processor 'echo' panicked: bad input");
        let err = ProcessingError::panicked("echo", Box::new(42u8));
        assert!(err.message().ends_with("unknown panic payload"));
    }
}
