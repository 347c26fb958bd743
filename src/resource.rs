use crate::{
    error_context::ErrorContext,
    provider::{
        ConnectionHandle, ConsumerHandle, DestinationHandle, FactoryHandle, MessageHandle,
        ProducerHandle, Provider, ProviderResult, RequestorHandle, SessionHandle,
    },
    Result,
};
use std::{fmt, sync::Arc};
use tracing::{trace, warn};

/// A provider handle that has to be given back exactly once.
pub(crate) trait Resource: Copy + fmt::Debug {
    const KIND: &'static str;

    fn release(self, provider: &dyn Provider) -> ProviderResult<()>;
}

macro_rules! resource {
    ($handle:ty, $kind:literal, $release:ident) => {
        impl Resource for $handle {
            const KIND: &'static str = $kind;

            fn release(self, provider: &dyn Provider) -> ProviderResult<()> {
                provider.$release(self)
            }
        }
    };
}

resource!(FactoryHandle, "connection factory", destroy_connection_factory);
resource!(ConnectionHandle, "connection", close_connection);
resource!(SessionHandle, "session", close_session);
resource!(DestinationHandle, "destination", destroy_destination);
resource!(ProducerHandle, "producer", close_producer);
resource!(ConsumerHandle, "consumer", close_consumer);
resource!(RequestorHandle, "requestor", close_requestor);
resource!(MessageHandle, "message", destroy_message);

/// Owns one provider resource for the span of a call.
///
/// The normal path gives the resource back with [`Scoped::release`], which
/// reports failure to the caller. If the guard is dropped still holding its
/// resource (an earlier step failed, or teardown stopped early), the resource
/// is released on drop and a failure there is only logged.
pub(crate) struct Scoped<H: Resource> {
    provider: Arc<dyn Provider>,
    handle: H,
    armed: bool,
}

impl<H: Resource> Scoped<H> {
    pub(crate) fn acquire<F>(
        provider: &Arc<dyn Provider>,
        errors: &ErrorContext,
        create: F,
    ) -> Result<Self>
    where
        F: FnOnce(&dyn Provider) -> ProviderResult<H>,
    {
        let handle = errors.check(create(provider.as_ref()))?;
        trace!(kind = H::KIND, ?handle, "acquired");
        Ok(Self {
            provider: provider.clone(),
            handle,
            armed: true,
        })
    }

    pub(crate) fn handle(&self) -> H {
        self.handle
    }

    /// Give the resource back now, surfacing a failure.
    ///
    /// The guard is disarmed either way: a resource whose release failed is
    /// not released a second time.
    pub(crate) fn release(mut self, errors: &ErrorContext) -> Result<()> {
        self.armed = false;
        trace!(kind = H::KIND, handle = ?self.handle, "releasing");
        errors.check(self.handle.release(self.provider.as_ref()))
    }

    /// Keep the resource beyond this scope.
    pub(crate) fn into_handle(mut self) -> H {
        self.armed = false;
        self.handle
    }
}

impl<H: Resource> Drop for Scoped<H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = self.handle;
        trace!(kind = H::KIND, ?handle, "releasing on scope exit");
        if let Err(status) = handle.release(self.provider.as_ref()) {
            warn!(kind = H::KIND, ?handle, %status, "failed to release on scope exit");
        }
    }
}

impl<H: Resource> fmt::Debug for Scoped<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("kind", &H::KIND)
            .field("handle", &self.handle)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::{MemoryProvider, Primitive},
        provider::Status,
        DestinationKind, Error,
    };

    fn setup() -> (MemoryProvider, Arc<dyn Provider>, ErrorContext) {
        let memory = MemoryProvider::default();
        let provider: Arc<dyn Provider> = Arc::new(memory.clone());
        let errors = ErrorContext::create(provider.clone()).unwrap();
        (memory, provider, errors)
    }

    #[test]
    fn dropped_guard_releases() {
        let (memory, provider, errors) = setup();
        {
            let dest = Scoped::acquire(&provider, &errors, |p| {
                p.create_destination(DestinationKind::Queue, "queue.sample")
            })
            .unwrap();
            assert_eq!(memory.open_resources().destinations, 1);
            let _ = dest.handle();
        }
        assert_eq!(memory.open_resources().destinations, 0);
    }

    #[test]
    fn explicit_release_reports_failure_once() {
        let (memory, provider, errors) = setup();
        let message = Scoped::acquire(&provider, &errors, |p| p.create_text_message()).unwrap();
        memory.fail_on(Primitive::DestroyMessage, Status::IllegalState);
        let err = message.release(&errors).unwrap_err();
        assert!(matches!(
            err,
            Error::Provider {
                status: Status::IllegalState,
                ..
            }
        ));
        assert_eq!(memory.calls(Primitive::DestroyMessage), 1);
    }

    #[test]
    fn into_handle_disarms() {
        let (memory, provider, errors) = setup();
        let message = Scoped::acquire(&provider, &errors, |p| p.create_message()).unwrap();
        let handle = message.into_handle();
        assert_eq!(memory.open_resources().messages, 1);
        provider.destroy_message(handle).unwrap();
        assert_eq!(memory.open_resources().messages, 0);
    }

    #[test]
    fn failed_acquire_holds_nothing() {
        let (memory, provider, errors) = setup();
        memory.fail_on(Primitive::CreateTextMessage, Status::Other(-1));
        let res = Scoped::acquire(&provider, &errors, |p| p.create_text_message());
        assert!(res.is_err());
        assert_eq!(memory.open_resources().messages, 0);
    }
}
