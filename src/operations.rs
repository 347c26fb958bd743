use crate::{
    client::Client,
    delivery_mode::{DeliveryMode, DestinationKind},
    provider::{AcknowledgeMode, Status},
    resource::Scoped,
    Error, Result,
};
use tracing::{debug, trace};

/// Outcome of a bounded wait for a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Received {
    /// Text of the message, empty when the wait timed out.
    pub text: String,
    pub timed_out: bool,
}

impl Received {
    pub(crate) fn delivered(text: String) -> Self {
        Self {
            text,
            timed_out: false,
        }
    }

    pub(crate) fn timeout() -> Self {
        Self {
            text: String::new(),
            timed_out: true,
        }
    }

    /// The message text, or `None` on timeout.
    pub fn into_text(self) -> Option<String> {
        if self.timed_out {
            None
        } else {
            Some(self.text)
        }
    }
}

impl Client {
    /// Send `payload` as a text message to the queue named `destination`.
    ///
    /// `delivery_mode` is one of `PERSISTENT`, `NON_PERSISTENT` or
    /// `RELIABLE` (any case); anything else sends non-persistent.
    /// The message becomes deliverable after `delivery_delay_ms` and expires
    /// `expiration_ms` after sending, 0 meaning never.
    pub fn send(
        &self,
        destination: &str,
        payload: &str,
        delivery_delay_ms: u64,
        delivery_mode: &str,
        expiration_ms: u64,
    ) -> Result<()> {
        let (connection, errors) = self.live()?;
        let provider = self.provider();
        let mode = DeliveryMode::resolve(delivery_mode);
        trace!(destination, %mode, delivery_delay_ms, expiration_ms, "send");

        let dest = Scoped::acquire(provider, &errors, |p| {
            p.create_destination(DestinationKind::Queue, destination)
        })?;
        let session = Scoped::acquire(provider, &errors, |p| {
            p.create_session(connection, false, AcknowledgeMode::Auto)
        })?;
        let producer = Scoped::acquire(provider, &errors, |p| {
            p.create_producer(session.handle(), dest.handle())
        })?;
        errors.check(provider.set_producer_delivery_delay(producer.handle(), delivery_delay_ms))?;
        errors.check(provider.set_producer_delivery_mode(producer.handle(), mode))?;
        errors.check(provider.set_producer_time_to_live(producer.handle(), expiration_ms))?;
        let message = Scoped::acquire(provider, &errors, |p| p.create_text_message())?;
        errors.check(provider.set_message_text(message.handle(), payload))?;
        errors.check(provider.send(producer.handle(), message.handle()))?;
        debug!(destination, %mode, "sent");

        message.release(&errors)?;
        producer.release(&errors)?;
        session.release(&errors)?;
        dest.release(&errors)
    }

    /// Send `payload` to the queue named `destination` and wait for the
    /// reply, returning its text.
    ///
    /// Waits as long as [`ClientOptions::with_request_timeout`] allows, or
    /// forever if unset; running out of time fails with a
    /// [`Status::Timeout`] provider error.
    ///
    /// [`ClientOptions::with_request_timeout`]: crate::ClientOptions::with_request_timeout
    pub fn send_receive(
        &self,
        destination: &str,
        payload: &str,
        delivery_mode: &str,
        expiration_ms: u64,
    ) -> Result<String> {
        let timeout_ms = self.options().request_timeout_ms();
        let received = self.request(destination, payload, delivery_mode, expiration_ms, timeout_ms)?;
        match received.into_text() {
            Some(text) => Ok(text),
            None => Err(Error::Provider {
                status: Status::Timeout,
                message: format!(
                    "no reply from {} within {} ms",
                    destination,
                    timeout_ms.unwrap_or_default()
                ),
                stack_trace: String::new(),
            }),
        }
    }

    /// Like [`Client::send_receive`], waiting at most `timeout_ms` for the
    /// reply.
    pub fn send_receive_timeout(
        &self,
        destination: &str,
        payload: &str,
        delivery_mode: &str,
        expiration_ms: u64,
        timeout_ms: u64,
    ) -> Result<Received> {
        self.request(destination, payload, delivery_mode, expiration_ms, Some(timeout_ms))
    }

    fn request(
        &self,
        destination: &str,
        payload: &str,
        delivery_mode: &str,
        expiration_ms: u64,
        timeout_ms: Option<u64>,
    ) -> Result<Received> {
        let (connection, errors) = self.live()?;
        let provider = self.provider();
        let mode = DeliveryMode::resolve(delivery_mode);
        trace!(destination, %mode, expiration_ms, ?timeout_ms, "request");

        let dest = Scoped::acquire(provider, &errors, |p| {
            p.create_destination(DestinationKind::Queue, destination)
        })?;
        let session = Scoped::acquire(provider, &errors, |p| {
            p.create_session(connection, false, AcknowledgeMode::Auto)
        })?;
        let requestor = Scoped::acquire(provider, &errors, |p| {
            p.create_requestor(session.handle(), dest.handle())
        })?;
        let message = Scoped::acquire(provider, &errors, |p| p.create_text_message())?;
        errors.check(provider.set_message_delivery_mode(message.handle(), mode))?;
        errors.check(provider.set_message_expiration(message.handle(), expiration_ms))?;
        errors.check(provider.set_message_text(message.handle(), payload))?;

        let reply = match provider.request(requestor.handle(), message.handle(), timeout_ms) {
            Err(Status::Timeout) => None,
            result => Some(Scoped::acquire(provider, &errors, |_| result)?),
        };
        let text = match &reply {
            Some(reply) => Some(errors.check(provider.message_text(reply.handle()))?),
            None => None,
        };
        debug!(destination, replied = text.is_some(), "request done");

        if let Some(reply) = reply {
            reply.release(&errors)?;
        }
        message.release(&errors)?;
        requestor.release(&errors)?;
        session.release(&errors)?;
        dest.release(&errors)?;
        Ok(text.map_or_else(Received::timeout, Received::delivered))
    }

    /// Wait up to `timeout_ms` for one message on `destination`.
    ///
    /// `kind` names the destination kind, `"queue"` or `"topic"` (any case).
    /// An empty destination yields a timed out [`Received`] with empty text.
    pub fn receive(&self, destination: &str, kind: &str, timeout_ms: u64) -> Result<Received> {
        let (connection, errors) = self.live()?;
        let kind =
            DestinationKind::parse(kind).ok_or_else(|| Error::InvalidDestinationKind(kind.into()))?;
        let provider = self.provider();
        trace!(destination, %kind, timeout_ms, "receive");

        let dest = Scoped::acquire(provider, &errors, |p| p.create_destination(kind, destination))?;
        let session = Scoped::acquire(provider, &errors, |p| {
            p.create_session(connection, false, AcknowledgeMode::Auto)
        })?;
        let consumer = Scoped::acquire(provider, &errors, |p| {
            p.create_consumer(session.handle(), dest.handle())
        })?;

        let message = match provider.receive(consumer.handle(), timeout_ms) {
            Err(Status::Timeout) => None,
            result => Some(Scoped::acquire(provider, &errors, |_| result)?),
        };
        let text = match &message {
            Some(message) => Some(errors.check(provider.message_text(message.handle()))?),
            None => None,
        };
        debug!(destination, %kind, timed_out = text.is_none(), "received");

        if let Some(message) = message {
            message.release(&errors)?;
        }
        consumer.release(&errors)?;
        session.release(&errors)?;
        dest.release(&errors)?;
        Ok(text.map_or_else(Received::timeout, Received::delivered))
    }
}
