use crate::{
    provider::{ErrorContextHandle, Provider, Status},
    Error, Result,
};
use std::{fmt, sync::Arc};
use tracing::error;

/// Turns bare provider statuses into descriptive errors.
///
/// Holds the client's single error context handle; every failing primitive
/// is followed by a query on that handle for the last error string and stack
/// trace.
#[derive(Clone)]
pub(crate) struct ErrorContext {
    provider: Arc<dyn Provider>,
    handle: ErrorContextHandle,
}

impl ErrorContext {
    pub(crate) fn create(provider: Arc<dyn Provider>) -> Result<Self> {
        let handle = provider
            .create_error_context()
            .map_err(Error::ErrorContextCreation)?;
        Ok(Self { provider, handle })
    }

    pub(crate) fn error(&self, status: Status) -> Error {
        let message = self.provider.last_error_string(self.handle);
        let stack_trace = self.provider.last_error_stack_trace(self.handle);
        error!(%status, %message, "provider call failed");
        Error::Provider {
            status,
            message,
            stack_trace,
        }
    }

    /// Check a primitive's outcome, describing any failure.
    pub(crate) fn check<T>(&self, result: std::result::Result<T, Status>) -> Result<T> {
        result.map_err(|status| self.error(status))
    }

    pub(crate) fn destroy(&self) -> Result<()> {
        self.provider
            .destroy_error_context(self.handle)
            .map_err(|status| Error::Provider {
                status,
                message: "failed to destroy error context".into(),
                stack_trace: String::new(),
            })
    }
}

impl fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("handle", &self.handle)
            .finish()
    }
}
