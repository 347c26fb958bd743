//! The messaging provider's primitive operations.
//!
//! A [`Provider`] is the thin layer over a vendor SDK: every call maps onto one
//! SDK primitive, returns a bare [`Status`] on failure, and leaves the
//! human-readable description in the provider's error context, to be fetched
//! with [`Provider::last_error_string`]. Resources are referred to by opaque,
//! copyable handles; creating one hands ownership to the caller, who must
//! close or destroy it exactly once.

use crate::{delivery_mode::DeliveryMode, DestinationKind};
use std::{error, fmt};

/// Result of a single provider primitive.
pub type ProviderResult<T> = std::result::Result<T, Status>;

/// Non-success status code returned by a provider primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Status {
    IllegalState,
    InvalidArgument,
    NotFound,
    ServerNotFound,
    SecurityException,
    Timeout,
    Closed,
    NotPermitted,
    Other(i32),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::IllegalState => write!(f, "illegal state"),
            Status::InvalidArgument => write!(f, "invalid argument"),
            Status::NotFound => write!(f, "not found"),
            Status::ServerNotFound => write!(f, "server not found"),
            Status::SecurityException => write!(f, "security exception"),
            Status::Timeout => write!(f, "timeout"),
            Status::Closed => write!(f, "closed"),
            Status::NotPermitted => write!(f, "not permitted"),
            Status::Other(code) => write!(f, "status code {}", code),
        }
    }
}

impl error::Error for Status {}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Provider facility holding the most recent failure's description.
    ErrorContextHandle
);
handle!(FactoryHandle);
handle!(ConnectionHandle);
handle!(SessionHandle);
handle!(DestinationHandle);
handle!(ProducerHandle);
handle!(ConsumerHandle);
handle!(
    /// Request/reply helper owning the temporary reply destination and the
    /// correlation of replies to requests.
    RequestorHandle
);
handle!(MessageHandle);

/// How a session acknowledges consumed messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcknowledgeMode {
    #[default]
    Auto,
    Client,
    DupsOk,
}

/// Primitive operations of a messaging provider SDK.
///
/// Durations are in milliseconds, as the SDKs take them. A time to live or
/// expiration of `0` means the message never expires.
pub trait Provider: Send + Sync + 'static {
    fn create_error_context(&self) -> ProviderResult<ErrorContextHandle>;
    fn destroy_error_context(&self, context: ErrorContextHandle) -> ProviderResult<()>;
    /// Description of the last failure seen through `context`, empty if none.
    fn last_error_string(&self, context: ErrorContextHandle) -> String;
    fn last_error_stack_trace(&self, context: ErrorContextHandle) -> String;

    fn create_connection_factory(&self) -> ProviderResult<FactoryHandle>;
    fn destroy_connection_factory(&self, factory: FactoryHandle) -> ProviderResult<()>;
    fn set_server_url(&self, factory: FactoryHandle, url: &str) -> ProviderResult<()>;
    fn create_connection(
        &self,
        factory: FactoryHandle,
        username: &str,
        password: &str,
    ) -> ProviderResult<ConnectionHandle>;
    fn start_connection(&self, connection: ConnectionHandle) -> ProviderResult<()>;
    fn stop_connection(&self, connection: ConnectionHandle) -> ProviderResult<()>;
    fn close_connection(&self, connection: ConnectionHandle) -> ProviderResult<()>;

    fn create_session(
        &self,
        connection: ConnectionHandle,
        transacted: bool,
        acknowledge_mode: AcknowledgeMode,
    ) -> ProviderResult<SessionHandle>;
    fn close_session(&self, session: SessionHandle) -> ProviderResult<()>;

    fn create_destination(
        &self,
        kind: DestinationKind,
        name: &str,
    ) -> ProviderResult<DestinationHandle>;
    fn destroy_destination(&self, destination: DestinationHandle) -> ProviderResult<()>;

    fn create_producer(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<ProducerHandle>;
    fn close_producer(&self, producer: ProducerHandle) -> ProviderResult<()>;
    fn set_producer_delivery_delay(
        &self,
        producer: ProducerHandle,
        delay_ms: u64,
    ) -> ProviderResult<()>;
    fn set_producer_delivery_mode(
        &self,
        producer: ProducerHandle,
        mode: DeliveryMode,
    ) -> ProviderResult<()>;
    fn set_producer_time_to_live(&self, producer: ProducerHandle, ttl_ms: u64)
        -> ProviderResult<()>;

    fn create_consumer(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<ConsumerHandle>;
    fn close_consumer(&self, consumer: ConsumerHandle) -> ProviderResult<()>;

    fn create_requestor(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<RequestorHandle>;
    fn close_requestor(&self, requestor: RequestorHandle) -> ProviderResult<()>;

    /// Create a message with no body.
    fn create_message(&self) -> ProviderResult<MessageHandle>;
    fn create_text_message(&self) -> ProviderResult<MessageHandle>;
    fn destroy_message(&self, message: MessageHandle) -> ProviderResult<()>;
    fn set_message_text(&self, message: MessageHandle, text: &str) -> ProviderResult<()>;
    /// Text body of `message`; a message without one reads as empty.
    fn message_text(&self, message: MessageHandle) -> ProviderResult<String>;
    fn set_message_delivery_mode(
        &self,
        message: MessageHandle,
        mode: DeliveryMode,
    ) -> ProviderResult<()>;
    fn set_message_expiration(&self, message: MessageHandle, expiration_ms: u64)
        -> ProviderResult<()>;

    fn send(&self, producer: ProducerHandle, message: MessageHandle) -> ProviderResult<()>;
    /// Send `message` as a request and block for the reply, which the caller
    /// then owns. `None` waits forever; running out of time is
    /// [`Status::Timeout`].
    fn request(
        &self,
        requestor: RequestorHandle,
        message: MessageHandle,
        timeout_ms: Option<u64>,
    ) -> ProviderResult<MessageHandle>;
    /// Block up to `timeout_ms` for the next message, which the caller then
    /// owns. Nothing arriving in time is [`Status::Timeout`].
    fn receive(&self, consumer: ConsumerHandle, timeout_ms: u64) -> ProviderResult<MessageHandle>;
}
