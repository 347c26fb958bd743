use crate::{
    client_options::ClientOptions,
    connection_status::{ConnectionState, ConnectionStatus},
    error_context::ErrorContext,
    events::{Event, Events},
    provider::{ConnectionHandle, FactoryHandle, Provider},
    resource::Scoped,
    Error, Result,
};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};
use tracing::{debug, error, warn};

/// A single logical connection to a messaging provider.
///
/// Create one with [`Client::new`], bring it up with [`connect`], then issue
/// any number of [`send`], [`send_receive`] and [`receive`] calls, from as
/// many threads as needed: every call provisions its own session, endpoint
/// and message, and only shares the live connection. [`disconnect`] (or
/// dropping the client) tears the connection down.
///
/// [`connect`]: #method.connect
/// [`disconnect`]: #method.disconnect
/// [`send`]: #method.send
/// [`send_receive`]: #method.send_receive
/// [`receive`]: #method.receive
pub struct Client {
    options: ClientOptions,
    provider: Arc<dyn Provider>,
    status: ConnectionStatus,
    link: RwLock<Link>,
    events: Events,
}

#[derive(Default)]
struct Link {
    /// Created by the first connect, then kept until the client is dropped.
    errors: Option<ErrorContext>,
    live: Option<Live>,
}

struct Live {
    /// Destroyed when dropped.
    _factory: Scoped<FactoryHandle>,
    connection: ConnectionHandle,
}

impl Client {
    pub fn new<P: Provider>(options: ClientOptions, provider: P) -> Self {
        Self::with_provider(options, Arc::new(provider))
    }

    pub fn with_provider(options: ClientOptions, provider: Arc<dyn Provider>) -> Self {
        Self {
            options,
            provider,
            status: ConnectionStatus::default(),
            link: RwLock::new(Link::default()),
            events: Events::new(),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected()
    }

    /// Listen to connection events.
    ///
    /// Events are only queued while at least one listener is alive.
    pub fn events(&self) -> flume::Receiver<Event> {
        self.events.listener()
    }

    /// Bring the connection up: error context, factory, server URL,
    /// connection, start.
    ///
    /// The first failing step aborts with the provider's description of the
    /// failure; whatever was created before it is released and the client
    /// stays disconnected. Connecting a connected client does nothing.
    pub fn connect(&self) -> Result<()> {
        let mut link = self.link.write();
        if self.status.connected() {
            debug!("already connected");
            return Ok(());
        }
        match self.open(&mut link) {
            Ok(live) => {
                debug!(
                    server_url = %self.options.server_url(),
                    username = %self.options.username(),
                    connection = ?live.connection,
                    "connected"
                );
                link.live = Some(live);
                self.status.set_state(ConnectionState::Connected);
                self.events.connected();
                Ok(())
            }
            Err(err) => {
                error!(server_url = %self.options.server_url(), %err, "connect failed");
                self.events.error(err.clone());
                Err(err)
            }
        }
    }

    fn open(&self, link: &mut Link) -> Result<Live> {
        let errors = match link.errors.clone() {
            Some(errors) => errors,
            None => {
                let errors = ErrorContext::create(self.provider.clone())?;
                link.errors = Some(errors.clone());
                errors
            }
        };
        let provider = &self.provider;
        let factory = Scoped::acquire(provider, &errors, |p| p.create_connection_factory())?;
        errors.check(provider.set_server_url(factory.handle(), self.options.server_url().as_str()))?;
        let connection = Scoped::acquire(provider, &errors, |p| {
            p.create_connection(
                factory.handle(),
                self.options.username(),
                self.options.password(),
            )
        })?;
        errors.check(provider.start_connection(connection.handle()))?;
        Ok(Live {
            _factory: factory,
            connection: connection.into_handle(),
        })
    }

    /// Stop then close the connection.
    ///
    /// Does nothing on a disconnected client. If stopping fails, closing is
    /// not attempted; if either step fails the client stays connected and
    /// the call may be retried.
    pub fn disconnect(&self) -> Result<()> {
        let mut link = self.link.write();
        let (connection, errors) = match (&link.live, &link.errors) {
            (Some(live), Some(errors)) if self.status.connected() => {
                (live.connection, errors.clone())
            }
            _ => return Ok(()),
        };

        if let Err(err) = errors.check(self.provider.stop_connection(connection)) {
            return Err(self.disconnect_failed(Error::ConnectionStop(Box::new(err))));
        }
        if let Err(err) = errors.check(self.provider.close_connection(connection)) {
            return Err(self.disconnect_failed(Error::ConnectionClose(Box::new(err))));
        }

        // Dropping the factory guard destroys it.
        link.live = None;
        self.status.set_state(ConnectionState::Disconnected);
        debug!(?connection, "disconnected");
        self.events.disconnected();
        Ok(())
    }

    fn disconnect_failed(&self, err: Error) -> Error {
        error!(%err, "disconnect failed");
        self.events.error(err.clone());
        err
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// The live connection and the error context to describe failures with,
    /// or `InvalidConnectionState` when not connected.
    pub(crate) fn live(&self) -> Result<(ConnectionHandle, ErrorContext)> {
        let link = self.link.read();
        match (&link.live, &link.errors) {
            (Some(live), Some(errors)) if self.status.connected() => {
                Ok((live.connection, errors.clone()))
            }
            _ => Err(Error::InvalidConnectionState(self.status.state())),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            warn!(%err, "failed to disconnect on drop");
        }
        let link = self.link.get_mut();
        link.live = None;
        if let Some(errors) = link.errors.take() {
            if let Err(err) = errors.destroy() {
                warn!(%err, "failed to destroy error context on drop");
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Client");
        debug
            .field("options", &self.options)
            .field("status", &self.status);
        if let Some(link) = self.link.try_read() {
            debug.field("connection", &link.live.as_ref().map(|live| live.connection));
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::{MemoryProvider, Primitive},
        provider::Status,
    };

    fn client(provider: &MemoryProvider, url: &str) -> Client {
        let options = ClientOptions::default()
            .with_server_url(url)
            .unwrap()
            .with_username("admin")
            .with_password("");
        Client::new(options, provider.clone())
    }

    #[test]
    fn connect_then_disconnect() {
        let _ = tracing_subscriber::fmt::try_init();

        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        assert!(!client.is_connected());
        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(provider.open_resources().connections, 1);
        client.disconnect().unwrap();
        assert!(!client.is_connected());
        let resources = provider.open_resources();
        assert_eq!(resources.connections, 0);
        assert_eq!(resources.factories, 0);
        assert_eq!(resources.error_contexts, 1);
    }

    #[test]
    fn disconnect_without_connect_is_a_noop() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        client.disconnect().unwrap();
        client.disconnect().unwrap();
        assert!(!client.is_connected());
        assert_eq!(provider.calls(Primitive::StopConnection), 0);
    }

    #[test]
    fn connect_twice_is_a_noop() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        client.connect().unwrap();
        client.connect().unwrap();
        assert_eq!(provider.calls(Primitive::CreateConnection), 1);
    }

    #[test]
    fn error_context_is_reused_across_connects() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        client.connect().unwrap();
        client.disconnect().unwrap();
        client.connect().unwrap();
        assert_eq!(provider.calls(Primitive::CreateErrorContext), 1);
        drop(client);
        assert_eq!(provider.open_resources(), Default::default());
    }

    #[test]
    fn failed_connect_releases_partial_setup() {
        let provider = MemoryProvider::default();
        provider.fail_on(Primitive::StartConnection, Status::IllegalState);
        let client = client(&provider, "tcp://127.0.0.1:7222");
        let err = client.connect().unwrap_err();
        assert_eq!(err.status(), Some(Status::IllegalState));
        assert!(!client.is_connected());
        let resources = provider.open_resources();
        assert_eq!(resources.connections, 0);
        assert_eq!(resources.factories, 0);
    }

    #[test]
    fn unreachable_server_reports_provider_message() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7223");
        let err = client.connect().unwrap_err();
        assert_eq!(err.status(), Some(Status::ServerNotFound));
        assert!(err.to_string().contains("tcp://127.0.0.1:7223"), "{}", err);
        assert!(!client.is_connected());
    }

    #[test]
    fn error_context_failure_aborts_connect() {
        let provider = MemoryProvider::default();
        provider.fail_on(Primitive::CreateErrorContext, Status::Other(-1));
        let client = client(&provider, "tcp://127.0.0.1:7222");
        assert_eq!(
            client.connect(),
            Err(Error::ErrorContextCreation(Status::Other(-1)))
        );
        assert_eq!(provider.calls(Primitive::CreateConnectionFactory), 0);
    }

    #[test]
    fn failed_stop_keeps_connection_and_skips_close() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        client.connect().unwrap();
        provider.fail_on(Primitive::StopConnection, Status::IllegalState);
        let err = client.disconnect().unwrap_err();
        assert!(matches!(err, Error::ConnectionStop(_)));
        assert!(err.to_string().starts_with("failed to stop connection"));
        assert!(client.is_connected());
        assert_eq!(provider.calls(Primitive::CloseConnection), 0);

        provider.recover(Primitive::StopConnection);
        client.disconnect().unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn failed_close_keeps_connected() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        client.connect().unwrap();
        provider.fail_on(Primitive::CloseConnection, Status::Other(3));
        assert!(matches!(
            client.disconnect(),
            Err(Error::ConnectionClose(_))
        ));
        assert!(client.is_connected());
    }

    #[test]
    fn drop_disconnects() {
        let provider = MemoryProvider::default();
        {
            let client = client(&provider, "tcp://127.0.0.1:7222");
            client.connect().unwrap();
        }
        assert_eq!(provider.calls(Primitive::CloseConnection), 1);
        assert_eq!(provider.open_resources().connections, 0);
    }

    #[test]
    fn lifecycle_events() {
        let provider = MemoryProvider::default();
        let client = client(&provider, "tcp://127.0.0.1:7222");
        let events = client.events();
        client.connect().unwrap();
        client.disconnect().unwrap();
        assert_eq!(events.try_recv(), Ok(Event::Connected));
        assert_eq!(events.try_recv(), Ok(Event::Disconnected));

        let unreachable = self::client(&provider, "tcp://127.0.0.1:7299");
        let events = unreachable.events();
        assert!(unreachable.connect().is_err());
        assert!(matches!(events.try_recv(), Ok(Event::Error(_))));
    }
}
