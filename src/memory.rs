//! In-process messaging provider.
//!
//! [`MemoryProvider`] implements the whole [`Provider`] contract without a
//! server: queues live in memory, receives block on a condition variable,
//! and requests get a private temporary reply queue. It is meant for tests,
//! demos and offline development, and comes with a few hooks real SDKs do
//! not have:
//!
//! - [`MemoryProvider::fail_on`] makes a named primitive fail with a status;
//! - [`MemoryProvider::open_resources`] counts every live handle, so a test
//!   can check that nothing leaked;
//! - [`MemoryProvider::spawn_responder`] answers requests on a queue from a
//!   background thread.

use crate::{
    delivery_mode::{DeliveryMode, DestinationKind},
    killswitch::KillSwitch,
    provider::{
        AcknowledgeMode, ConnectionHandle, ConsumerHandle, DestinationHandle,
        ErrorContextHandle, FactoryHandle, MessageHandle, ProducerHandle, Provider,
        ProviderResult, RequestorHandle, SessionHandle, Status,
    },
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

const TEMPORARY_QUEUE_PREFIX: &str = "$TMP$.";
const RESPONDER_POLL: Duration = Duration::from_millis(50);

/// Every primitive of the provider contract, by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    CreateErrorContext,
    DestroyErrorContext,
    CreateConnectionFactory,
    DestroyConnectionFactory,
    SetServerUrl,
    CreateConnection,
    StartConnection,
    StopConnection,
    CloseConnection,
    CreateSession,
    CloseSession,
    CreateDestination,
    DestroyDestination,
    CreateProducer,
    CloseProducer,
    SetProducerDeliveryDelay,
    SetProducerDeliveryMode,
    SetProducerTimeToLive,
    CreateConsumer,
    CloseConsumer,
    CreateRequestor,
    CloseRequestor,
    CreateMessage,
    CreateTextMessage,
    DestroyMessage,
    SetMessageText,
    MessageText,
    SetMessageDeliveryMode,
    SetMessageExpiration,
    Send,
    Request,
    Receive,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::CreateErrorContext => "create_error_context",
            Primitive::DestroyErrorContext => "destroy_error_context",
            Primitive::CreateConnectionFactory => "create_connection_factory",
            Primitive::DestroyConnectionFactory => "destroy_connection_factory",
            Primitive::SetServerUrl => "set_server_url",
            Primitive::CreateConnection => "create_connection",
            Primitive::StartConnection => "start_connection",
            Primitive::StopConnection => "stop_connection",
            Primitive::CloseConnection => "close_connection",
            Primitive::CreateSession => "create_session",
            Primitive::CloseSession => "close_session",
            Primitive::CreateDestination => "create_destination",
            Primitive::DestroyDestination => "destroy_destination",
            Primitive::CreateProducer => "create_producer",
            Primitive::CloseProducer => "close_producer",
            Primitive::SetProducerDeliveryDelay => "set_producer_delivery_delay",
            Primitive::SetProducerDeliveryMode => "set_producer_delivery_mode",
            Primitive::SetProducerTimeToLive => "set_producer_time_to_live",
            Primitive::CreateConsumer => "create_consumer",
            Primitive::CloseConsumer => "close_consumer",
            Primitive::CreateRequestor => "create_requestor",
            Primitive::CloseRequestor => "close_requestor",
            Primitive::CreateMessage => "create_message",
            Primitive::CreateTextMessage => "create_text_message",
            Primitive::DestroyMessage => "destroy_message",
            Primitive::SetMessageText => "set_message_text",
            Primitive::MessageText => "message_text",
            Primitive::SetMessageDeliveryMode => "set_message_delivery_mode",
            Primitive::SetMessageExpiration => "set_message_expiration",
            Primitive::Send => "send",
            Primitive::Request => "request",
            Primitive::Receive => "receive",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which servers the in-memory provider pretends to be, and who may log in.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// `host:port` pairs that accept connections.
    pub listen: Vec<String>,
    /// Accepted credentials; empty accepts anyone.
    pub users: HashMap<String, String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            listen: vec!["127.0.0.1:7222".into(), "localhost:7222".into()],
            users: HashMap::new(),
        }
    }
}

impl MemoryConfig {
    #[must_use]
    pub fn with_listen_address(mut self, address: &str) -> Self {
        self.listen.push(address.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

/// Number of live handles of each kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub error_contexts: usize,
    pub factories: usize,
    pub connections: usize,
    pub sessions: usize,
    pub destinations: usize,
    pub producers: usize,
    pub consumers: usize,
    pub requestors: usize,
    pub messages: usize,
}

impl ResourceCounts {
    /// Counts of per-call resources only: everything but error contexts,
    /// factories and connections.
    pub fn per_call(&self) -> usize {
        self.sessions
            + self.destinations
            + self.producers
            + self.consumers
            + self.requestors
            + self.messages
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct QueueKey {
    kind: DestinationKind,
    name: String,
}

#[derive(Clone, Debug)]
struct Stored {
    text: String,
    mode: DeliveryMode,
    available_at: Instant,
    expires_at: Option<Instant>,
    reply_to: Option<QueueKey>,
    correlation_id: Option<String>,
}

impl Stored {
    fn new(text: String, mode: DeliveryMode, delay_ms: u64, ttl_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            text,
            mode,
            available_at: now + Duration::from_millis(delay_ms),
            expires_at: (ttl_ms > 0).then(|| now + Duration::from_millis(ttl_ms)),
            reply_to: None,
            correlation_id: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Clone, Debug, Default)]
struct MessageState {
    text: Option<String>,
    mode: DeliveryMode,
    expiration_ms: u64,
}

impl From<Stored> for MessageState {
    fn from(stored: Stored) -> Self {
        Self {
            text: Some(stored.text),
            mode: stored.mode,
            expiration_ms: 0,
        }
    }
}

#[derive(Debug)]
struct ProducerState {
    session: u64,
    queue: QueueKey,
    delay_ms: u64,
    mode: DeliveryMode,
    ttl_ms: u64,
}

#[derive(Debug)]
struct EndpointState {
    session: u64,
    queue: QueueKey,
}

#[derive(Debug, Default)]
struct LastError {
    message: String,
    stack_trace: String,
}

#[derive(Default)]
struct State {
    next_id: u64,
    error_contexts: HashSet<u64>,
    factories: HashMap<u64, Option<String>>,
    // connection id -> started
    connections: HashMap<u64, bool>,
    // session id -> connection id
    sessions: HashMap<u64, u64>,
    destinations: HashMap<u64, QueueKey>,
    producers: HashMap<u64, ProducerState>,
    consumers: HashMap<u64, EndpointState>,
    requestors: HashMap<u64, EndpointState>,
    messages: HashMap<u64, MessageState>,
    queues: HashMap<QueueKey, VecDeque<Stored>>,
    failures: HashMap<Primitive, Status>,
    calls: HashMap<Primitive, usize>,
    last_errors: HashMap<ThreadId, LastError>,
}

enum Next {
    Ready(Stored),
    /// Nothing deliverable now; carries when the earliest delayed message
    /// becomes due.
    Pending(Option<Instant>),
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn reject(&mut self, primitive: Primitive, status: Status, message: impl Into<String>) -> Status {
        let message = message.into();
        trace!(%primitive, %status, %message, "rejecting");
        let current = thread::current();
        let stack_trace = format!(
            "{}\n    at MemoryProvider::{}\n    on thread {}",
            status,
            primitive,
            current.name().unwrap_or("<unnamed>"),
        );
        self.last_errors.insert(
            current.id(),
            LastError {
                message,
                stack_trace,
            },
        );
        status
    }

    fn session_connection(&mut self, primitive: Primitive, session: u64) -> ProviderResult<u64> {
        match self.sessions.get(&session).copied() {
            None => Err(self.reject(primitive, Status::NotFound, format!("unknown session {}", session))),
            Some(connection) if !self.connections.contains_key(&connection) => Err(self.reject(
                primitive,
                Status::Closed,
                format!("session {} belongs to closed connection {}", session, connection),
            )),
            Some(connection) => Ok(connection),
        }
    }

    fn destination(&mut self, primitive: Primitive, destination: u64) -> ProviderResult<QueueKey> {
        match self.destinations.get(&destination) {
            Some(key) => Ok(key.clone()),
            None => Err(self.reject(
                primitive,
                Status::NotFound,
                format!("unknown destination {}", destination),
            )),
        }
    }

    fn message_mut(&mut self, primitive: Primitive, message: u64) -> ProviderResult<&mut MessageState> {
        if !self.messages.contains_key(&message) {
            return Err(self.reject(primitive, Status::NotFound, format!("unknown message {}", message)));
        }
        self.messages
            .get_mut(&message)
            .ok_or(Status::NotFound)
    }

    fn producer_mut(&mut self, primitive: Primitive, producer: u64) -> ProviderResult<&mut ProducerState> {
        if !self.producers.contains_key(&producer) {
            return Err(self.reject(primitive, Status::NotFound, format!("unknown producer {}", producer)));
        }
        self.producers
            .get_mut(&producer)
            .ok_or(Status::NotFound)
    }

    fn enqueue(&mut self, key: QueueKey, stored: Stored) {
        self.queues.entry(key).or_default().push_back(stored);
    }

    fn take_next(&mut self, key: &QueueKey, now: Instant) -> Next {
        let Some(queue) = self.queues.get_mut(key) else {
            return Next::Pending(None);
        };
        queue.retain(|stored| !stored.expired(now));
        match queue.iter().position(|stored| stored.available_at <= now) {
            Some(index) => queue.remove(index).map_or(Next::Pending(None), Next::Ready),
            None => Next::Pending(queue.iter().map(|stored| stored.available_at).min()),
        }
    }

    fn insert_message(&mut self, message: MessageState) -> MessageHandle {
        let id = self.next_id();
        self.messages.insert(id, message);
        MessageHandle::from_raw(id)
    }

    fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            error_contexts: self.error_contexts.len(),
            factories: self.factories.len(),
            connections: self.connections.len(),
            sessions: self.sessions.len(),
            destinations: self.destinations.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
            requestors: self.requestors.len(),
            messages: self.messages.len(),
        }
    }
}

struct Shared {
    config: MemoryConfig,
    state: Mutex<State>,
    arrivals: Condvar,
}

/// A [`Provider`] whose server lives in this process.
///
/// Clones share the same server, so a test can keep one to inspect what a
/// client did with another.
#[derive(Clone)]
pub struct MemoryProvider(Arc<Shared>);

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryProvider {
    pub fn new(config: MemoryConfig) -> Self {
        Self(Arc::new(Shared {
            config,
            state: Mutex::new(State::default()),
            arrivals: Condvar::new(),
        }))
    }

    /// Make every later call of `primitive` fail with `status`.
    pub fn fail_on(&self, primitive: Primitive, status: Status) {
        self.0.state.lock().failures.insert(primitive, status);
    }

    /// Undo [`MemoryProvider::fail_on`] for `primitive`.
    pub fn recover(&self, primitive: Primitive) {
        self.0.state.lock().failures.remove(&primitive);
    }

    /// How many times `primitive` has been called, failed calls included.
    pub fn calls(&self, primitive: Primitive) -> usize {
        self.0
            .state
            .lock()
            .calls
            .get(&primitive)
            .copied()
            .unwrap_or_default()
    }

    pub fn open_resources(&self) -> ResourceCounts {
        self.0.state.lock().counts()
    }

    /// Messages waiting on queue `name`, expired ones excluded.
    pub fn pending(&self, name: &str) -> usize {
        let key = QueueKey {
            kind: DestinationKind::Queue,
            name: name.into(),
        };
        let now = Instant::now();
        self.0
            .state
            .lock()
            .queues
            .get(&key)
            .map_or(0, |queue| queue.iter().filter(|stored| !stored.expired(now)).count())
    }

    /// Delivery mode of each message waiting on queue `name`, oldest first.
    pub fn pending_delivery_modes(&self, name: &str) -> Vec<DeliveryMode> {
        let key = QueueKey {
            kind: DestinationKind::Queue,
            name: name.into(),
        };
        self.0
            .state
            .lock()
            .queues
            .get(&key)
            .map(|queue| queue.iter().map(|stored| stored.mode).collect())
            .unwrap_or_default()
    }

    /// Answer requests arriving on queue `name` with `handler` until the
    /// returned [`Responder`] is dropped.
    ///
    /// Messages without a reply destination are consumed and ignored; replies
    /// for requestors that already gave up are discarded.
    pub fn spawn_responder<F>(&self, name: &str, handler: F) -> Responder
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let kill_switch = KillSwitch::default();
        let shared = self.0.clone();
        let key = QueueKey {
            kind: DestinationKind::Queue,
            name: name.into(),
        };
        let killed = kill_switch.clone();
        let thread = thread::Builder::new()
            .name(format!("responder:{}", name))
            .spawn(move || respond(&shared, &key, &killed, handler));
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(error) => {
                tracing::error!(%error, "failed to spawn responder thread");
                None
            }
        };
        Responder {
            kill_switch,
            shared: self.0.clone(),
            thread,
        }
    }

    fn enter(&self, primitive: Primitive) -> ProviderResult<MutexGuard<'_, State>> {
        let mut state = self.0.state.lock();
        *state.calls.entry(primitive).or_default() += 1;
        if let Some(status) = state.failures.get(&primitive).copied() {
            return Err(state.reject(
                primitive,
                status,
                format!("{} failed: {}", primitive, status),
            ));
        }
        Ok(state)
    }

    /// Block until a message is deliverable on `key`, the connection goes
    /// away or `deadline` passes.
    fn wait_for(
        &self,
        state: &mut MutexGuard<'_, State>,
        primitive: Primitive,
        key: &QueueKey,
        connection: u64,
        deadline: Option<Instant>,
    ) -> ProviderResult<Stored> {
        loop {
            let started = match state.connections.get(&connection) {
                Some(started) => *started,
                None => {
                    return Err(state.reject(
                        primitive,
                        Status::Closed,
                        format!("connection {} closed while waiting", connection),
                    ))
                }
            };
            let now = Instant::now();
            let due = if started {
                match state.take_next(key, now) {
                    Next::Ready(stored) => return Ok(stored),
                    Next::Pending(due) => due,
                }
            } else {
                None
            };
            if deadline.map_or(false, |deadline| deadline <= now) {
                return Err(state.reject(
                    primitive,
                    Status::Timeout,
                    format!("no message on {} {} in time", key.kind, key.name),
                ));
            }
            match [due, deadline].into_iter().flatten().min() {
                Some(wake) => {
                    self.0.arrivals.wait_until(state, wake);
                }
                None => self.0.arrivals.wait(state),
            }
        }
    }
}

fn respond<F>(shared: &Shared, key: &QueueKey, killed: &KillSwitch, handler: F)
where
    F: Fn(&str) -> String,
{
    debug!(queue = %key.name, "responder started");
    let mut state = shared.state.lock();
    while !killed.killed() {
        let now = Instant::now();
        match state.take_next(key, now) {
            Next::Ready(request) => {
                let Some(reply_to) = request.reply_to.clone() else {
                    trace!(queue = %key.name, "ignoring message without reply destination");
                    continue;
                };
                let text = MutexGuard::unlocked(&mut state, || handler(&request.text));
                if let Some(queue) = state.queues.get_mut(&reply_to) {
                    let mut reply = Stored::new(text, request.mode, 0, 0);
                    reply.correlation_id = request.correlation_id;
                    queue.push_back(reply);
                    shared.arrivals.notify_all();
                } else {
                    trace!(reply_to = %reply_to.name, "requestor gone, dropping reply");
                }
            }
            Next::Pending(due) => {
                let wake = due.map_or(now + RESPONDER_POLL, |due| due.min(now + RESPONDER_POLL));
                shared.arrivals.wait_until(&mut state, wake);
            }
        }
    }
    debug!(queue = %key.name, "responder stopped");
}

impl Provider for MemoryProvider {
    fn create_error_context(&self) -> ProviderResult<ErrorContextHandle> {
        let mut state = self.enter(Primitive::CreateErrorContext)?;
        let id = state.next_id();
        state.error_contexts.insert(id);
        Ok(ErrorContextHandle::from_raw(id))
    }

    fn destroy_error_context(&self, context: ErrorContextHandle) -> ProviderResult<()> {
        let mut state = self.enter(Primitive::DestroyErrorContext)?;
        if state.error_contexts.remove(&context.raw()) {
            Ok(())
        } else {
            Err(state.reject(Primitive::DestroyErrorContext, Status::NotFound, "unknown error context"))
        }
    }

    fn last_error_string(&self, context: ErrorContextHandle) -> String {
        let state = self.0.state.lock();
        if !state.error_contexts.contains(&context.raw()) {
            return String::new();
        }
        state
            .last_errors
            .get(&thread::current().id())
            .map(|last| last.message.clone())
            .unwrap_or_default()
    }

    fn last_error_stack_trace(&self, context: ErrorContextHandle) -> String {
        let state = self.0.state.lock();
        if !state.error_contexts.contains(&context.raw()) {
            return String::new();
        }
        state
            .last_errors
            .get(&thread::current().id())
            .map(|last| last.stack_trace.clone())
            .unwrap_or_default()
    }

    fn create_connection_factory(&self) -> ProviderResult<FactoryHandle> {
        let mut state = self.enter(Primitive::CreateConnectionFactory)?;
        let id = state.next_id();
        state.factories.insert(id, None);
        Ok(FactoryHandle::from_raw(id))
    }

    fn destroy_connection_factory(&self, factory: FactoryHandle) -> ProviderResult<()> {
        let mut state = self.enter(Primitive::DestroyConnectionFactory)?;
        match state.factories.remove(&factory.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(
                Primitive::DestroyConnectionFactory,
                Status::NotFound,
                "unknown connection factory",
            )),
        }
    }

    fn set_server_url(&self, factory: FactoryHandle, url: &str) -> ProviderResult<()> {
        let primitive = Primitive::SetServerUrl;
        let mut state = self.enter(primitive)?;
        match state.factories.get_mut(&factory.raw()) {
            Some(slot) => {
                *slot = Some(url.into());
                Ok(())
            }
            None => Err(state.reject(primitive, Status::NotFound, "unknown connection factory")),
        }
    }

    fn create_connection(
        &self,
        factory: FactoryHandle,
        username: &str,
        password: &str,
    ) -> ProviderResult<ConnectionHandle> {
        let primitive = Primitive::CreateConnection;
        let mut state = self.enter(primitive)?;
        let url = match state.factories.get(&factory.raw()) {
            Some(Some(url)) => url.clone(),
            Some(None) => {
                return Err(state.reject(primitive, Status::IllegalState, "no server url configured"))
            }
            None => return Err(state.reject(primitive, Status::NotFound, "unknown connection factory")),
        };
        let address = match Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "tcp" | "ssl") => match parsed.host_str() {
                Some(host) => format!("{}:{}", host, parsed.port().unwrap_or(7222)),
                None => return Err(state.reject(primitive, Status::InvalidArgument, format!("no host in {}", url))),
            },
            _ => {
                return Err(state.reject(
                    primitive,
                    Status::InvalidArgument,
                    format!("invalid server url {}", url),
                ))
            }
        };
        if !self.0.config.listen.iter().any(|listen| *listen == address) {
            return Err(state.reject(
                primitive,
                Status::ServerNotFound,
                format!("Failed to connect to the server at {}", url),
            ));
        }
        let users = &self.0.config.users;
        if !users.is_empty() && users.get(username).map(String::as_str) != Some(password) {
            return Err(state.reject(
                primitive,
                Status::SecurityException,
                format!("authentication failed for user {}", username),
            ));
        }
        let id = state.next_id();
        state.connections.insert(id, false);
        debug!(connection = id, %address, %username, "connection created");
        Ok(ConnectionHandle::from_raw(id))
    }

    fn start_connection(&self, connection: ConnectionHandle) -> ProviderResult<()> {
        let primitive = Primitive::StartConnection;
        let mut state = self.enter(primitive)?;
        match state.connections.get_mut(&connection.raw()) {
            Some(started) => {
                *started = true;
                self.0.arrivals.notify_all();
                Ok(())
            }
            None => Err(state.reject(primitive, Status::Closed, "connection is closed")),
        }
    }

    fn stop_connection(&self, connection: ConnectionHandle) -> ProviderResult<()> {
        let primitive = Primitive::StopConnection;
        let mut state = self.enter(primitive)?;
        match state.connections.get_mut(&connection.raw()) {
            Some(started) => {
                *started = false;
                Ok(())
            }
            None => Err(state.reject(primitive, Status::Closed, "connection is closed")),
        }
    }

    fn close_connection(&self, connection: ConnectionHandle) -> ProviderResult<()> {
        let primitive = Primitive::CloseConnection;
        let mut state = self.enter(primitive)?;
        match state.connections.remove(&connection.raw()) {
            Some(_) => {
                self.0.arrivals.notify_all();
                Ok(())
            }
            None => Err(state.reject(primitive, Status::Closed, "connection is already closed")),
        }
    }

    fn create_session(
        &self,
        connection: ConnectionHandle,
        transacted: bool,
        acknowledge_mode: AcknowledgeMode,
    ) -> ProviderResult<SessionHandle> {
        let primitive = Primitive::CreateSession;
        let mut state = self.enter(primitive)?;
        if !state.connections.contains_key(&connection.raw()) {
            return Err(state.reject(primitive, Status::Closed, "connection is closed"));
        }
        if transacted {
            return Err(state.reject(
                primitive,
                Status::NotPermitted,
                "transacted sessions are not supported",
            ));
        }
        let id = state.next_id();
        state.sessions.insert(id, connection.raw());
        trace!(session = id, ?acknowledge_mode, "session created");
        Ok(SessionHandle::from_raw(id))
    }

    fn close_session(&self, session: SessionHandle) -> ProviderResult<()> {
        let primitive = Primitive::CloseSession;
        let mut state = self.enter(primitive)?;
        match state.sessions.remove(&session.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown session")),
        }
    }

    fn create_destination(
        &self,
        kind: DestinationKind,
        name: &str,
    ) -> ProviderResult<DestinationHandle> {
        let primitive = Primitive::CreateDestination;
        let mut state = self.enter(primitive)?;
        if name.is_empty() {
            return Err(state.reject(primitive, Status::InvalidArgument, "empty destination name"));
        }
        let id = state.next_id();
        state.destinations.insert(
            id,
            QueueKey {
                kind,
                name: name.into(),
            },
        );
        Ok(DestinationHandle::from_raw(id))
    }

    fn destroy_destination(&self, destination: DestinationHandle) -> ProviderResult<()> {
        let primitive = Primitive::DestroyDestination;
        let mut state = self.enter(primitive)?;
        match state.destinations.remove(&destination.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown destination")),
        }
    }

    fn create_producer(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<ProducerHandle> {
        let primitive = Primitive::CreateProducer;
        let mut state = self.enter(primitive)?;
        state.session_connection(primitive, session.raw())?;
        let queue = state.destination(primitive, destination.raw())?;
        let id = state.next_id();
        state.producers.insert(
            id,
            ProducerState {
                session: session.raw(),
                queue,
                delay_ms: 0,
                mode: DeliveryMode::Persistent,
                ttl_ms: 0,
            },
        );
        Ok(ProducerHandle::from_raw(id))
    }

    fn close_producer(&self, producer: ProducerHandle) -> ProviderResult<()> {
        let primitive = Primitive::CloseProducer;
        let mut state = self.enter(primitive)?;
        match state.producers.remove(&producer.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown producer")),
        }
    }

    fn set_producer_delivery_delay(
        &self,
        producer: ProducerHandle,
        delay_ms: u64,
    ) -> ProviderResult<()> {
        let primitive = Primitive::SetProducerDeliveryDelay;
        let mut state = self.enter(primitive)?;
        state.producer_mut(primitive, producer.raw())?.delay_ms = delay_ms;
        Ok(())
    }

    fn set_producer_delivery_mode(
        &self,
        producer: ProducerHandle,
        mode: DeliveryMode,
    ) -> ProviderResult<()> {
        let primitive = Primitive::SetProducerDeliveryMode;
        let mut state = self.enter(primitive)?;
        state.producer_mut(primitive, producer.raw())?.mode = mode;
        Ok(())
    }

    fn set_producer_time_to_live(
        &self,
        producer: ProducerHandle,
        ttl_ms: u64,
    ) -> ProviderResult<()> {
        let primitive = Primitive::SetProducerTimeToLive;
        let mut state = self.enter(primitive)?;
        state.producer_mut(primitive, producer.raw())?.ttl_ms = ttl_ms;
        Ok(())
    }

    fn create_consumer(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<ConsumerHandle> {
        let primitive = Primitive::CreateConsumer;
        let mut state = self.enter(primitive)?;
        state.session_connection(primitive, session.raw())?;
        let queue = state.destination(primitive, destination.raw())?;
        let id = state.next_id();
        state.consumers.insert(
            id,
            EndpointState {
                session: session.raw(),
                queue,
            },
        );
        Ok(ConsumerHandle::from_raw(id))
    }

    fn close_consumer(&self, consumer: ConsumerHandle) -> ProviderResult<()> {
        let primitive = Primitive::CloseConsumer;
        let mut state = self.enter(primitive)?;
        match state.consumers.remove(&consumer.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown consumer")),
        }
    }

    fn create_requestor(
        &self,
        session: SessionHandle,
        destination: DestinationHandle,
    ) -> ProviderResult<RequestorHandle> {
        let primitive = Primitive::CreateRequestor;
        let mut state = self.enter(primitive)?;
        state.session_connection(primitive, session.raw())?;
        let queue = state.destination(primitive, destination.raw())?;
        let id = state.next_id();
        state.requestors.insert(
            id,
            EndpointState {
                session: session.raw(),
                queue,
            },
        );
        Ok(RequestorHandle::from_raw(id))
    }

    fn close_requestor(&self, requestor: RequestorHandle) -> ProviderResult<()> {
        let primitive = Primitive::CloseRequestor;
        let mut state = self.enter(primitive)?;
        match state.requestors.remove(&requestor.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown requestor")),
        }
    }

    fn create_message(&self) -> ProviderResult<MessageHandle> {
        let mut state = self.enter(Primitive::CreateMessage)?;
        Ok(state.insert_message(MessageState::default()))
    }

    fn create_text_message(&self) -> ProviderResult<MessageHandle> {
        let mut state = self.enter(Primitive::CreateTextMessage)?;
        Ok(state.insert_message(MessageState {
            text: Some(String::new()),
            ..MessageState::default()
        }))
    }

    fn destroy_message(&self, message: MessageHandle) -> ProviderResult<()> {
        let primitive = Primitive::DestroyMessage;
        let mut state = self.enter(primitive)?;
        match state.messages.remove(&message.raw()) {
            Some(_) => Ok(()),
            None => Err(state.reject(primitive, Status::NotFound, "unknown message")),
        }
    }

    fn set_message_text(&self, message: MessageHandle, text: &str) -> ProviderResult<()> {
        let primitive = Primitive::SetMessageText;
        let mut state = self.enter(primitive)?;
        state.message_mut(primitive, message.raw())?.text = Some(text.into());
        Ok(())
    }

    fn message_text(&self, message: MessageHandle) -> ProviderResult<String> {
        let primitive = Primitive::MessageText;
        let mut state = self.enter(primitive)?;
        Ok(state
            .message_mut(primitive, message.raw())?
            .text
            .clone()
            .unwrap_or_default())
    }

    fn set_message_delivery_mode(
        &self,
        message: MessageHandle,
        mode: DeliveryMode,
    ) -> ProviderResult<()> {
        let primitive = Primitive::SetMessageDeliveryMode;
        let mut state = self.enter(primitive)?;
        state.message_mut(primitive, message.raw())?.mode = mode;
        Ok(())
    }

    fn set_message_expiration(
        &self,
        message: MessageHandle,
        expiration_ms: u64,
    ) -> ProviderResult<()> {
        let primitive = Primitive::SetMessageExpiration;
        let mut state = self.enter(primitive)?;
        state.message_mut(primitive, message.raw())?.expiration_ms = expiration_ms;
        Ok(())
    }

    fn send(&self, producer: ProducerHandle, message: MessageHandle) -> ProviderResult<()> {
        let primitive = Primitive::Send;
        let mut state = self.enter(primitive)?;
        let (session, queue, delay_ms, mode, ttl_ms) = {
            let producer = state.producer_mut(primitive, producer.raw())?;
            (
                producer.session,
                producer.queue.clone(),
                producer.delay_ms,
                producer.mode,
                producer.ttl_ms,
            )
        };
        state.session_connection(primitive, session)?;
        let text = state
            .message_mut(primitive, message.raw())?
            .text
            .clone()
            .unwrap_or_default();
        trace!(queue = %queue.name, %mode, delay_ms, ttl_ms, "enqueue");
        state.enqueue(queue, Stored::new(text, mode, delay_ms, ttl_ms));
        self.0.arrivals.notify_all();
        Ok(())
    }

    fn request(
        &self,
        requestor: RequestorHandle,
        message: MessageHandle,
        timeout_ms: Option<u64>,
    ) -> ProviderResult<MessageHandle> {
        let primitive = Primitive::Request;
        let mut state = self.enter(primitive)?;
        let (session, queue) = match state.requestors.get(&requestor.raw()) {
            Some(endpoint) => (endpoint.session, endpoint.queue.clone()),
            None => return Err(state.reject(primitive, Status::NotFound, "unknown requestor")),
        };
        let connection = state.session_connection(primitive, session)?;
        let request = state.message_mut(primitive, message.raw())?.clone();

        let reply_to = QueueKey {
            kind: DestinationKind::Queue,
            name: format!("{}{}", TEMPORARY_QUEUE_PREFIX, Uuid::new_v4()),
        };
        let correlation_id = Uuid::new_v4().to_string();
        let mut stored = Stored::new(
            request.text.unwrap_or_default(),
            request.mode,
            0,
            request.expiration_ms,
        );
        stored.reply_to = Some(reply_to.clone());
        stored.correlation_id = Some(correlation_id.clone());
        state.queues.insert(reply_to.clone(), VecDeque::new());
        trace!(queue = %queue.name, %correlation_id, "request");
        state.enqueue(queue, stored);
        self.0.arrivals.notify_all();

        let deadline = timeout_ms.map(|timeout| Instant::now() + Duration::from_millis(timeout));
        let reply = self.wait_for(&mut state, primitive, &reply_to, connection, deadline);
        state.queues.remove(&reply_to);
        let reply = reply?;
        if reply.correlation_id.as_deref() != Some(correlation_id.as_str()) {
            return Err(state.reject(
                primitive,
                Status::IllegalState,
                "reply does not match the request's correlation id",
            ));
        }
        Ok(state.insert_message(reply.into()))
    }

    fn receive(&self, consumer: ConsumerHandle, timeout_ms: u64) -> ProviderResult<MessageHandle> {
        let primitive = Primitive::Receive;
        let mut state = self.enter(primitive)?;
        let (session, queue) = match state.consumers.get(&consumer.raw()) {
            Some(endpoint) => (endpoint.session, endpoint.queue.clone()),
            None => return Err(state.reject(primitive, Status::NotFound, "unknown consumer")),
        };
        let connection = state.session_connection(primitive, session)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let stored = self.wait_for(&mut state, primitive, &queue, connection, Some(deadline))?;
        Ok(state.insert_message(stored.into()))
    }
}

impl fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryProvider");
        debug.field("config", &self.0.config);
        if let Some(state) = self.0.state.try_lock() {
            debug
                .field("resources", &state.counts())
                .field("queues", &state.queues.len());
        }
        debug.finish()
    }
}

/// Background replier started by [`MemoryProvider::spawn_responder`].
///
/// Dropping it stops and joins the thread.
pub struct Responder {
    kill_switch: KillSwitch,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.kill_switch.kill() {
            self.shared.arrivals.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("responder thread panicked");
            }
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("stopped", &self.kill_switch.killed())
            .finish()
    }
}
