use ems_client::{
    memory::{MemoryConfig, MemoryProvider, Primitive},
    Client, ClientOptions, ConnectionState, Error, Event, Received, Status,
};
use std::{
    collections::HashSet,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn options() -> ClientOptions {
    ClientOptions::default()
        .with_server_url("tcp://127.0.0.1:7222")
        .unwrap()
        .with_username("admin")
        .with_password("")
}

fn connected(provider: &MemoryProvider) -> Client {
    let client = Client::new(options(), provider.clone());
    client.connect().unwrap();
    client
}

#[test]
fn connect_reports_connected_until_disconnect() {
    let _ = tracing_subscriber::fmt::try_init();

    let provider = MemoryProvider::default();
    let client = Client::new(options(), provider);
    client.connect().unwrap();
    assert!(client.is_connected());
    assert_eq!(client.status().state(), ConnectionState::Connected);
    client.disconnect().unwrap();
    assert!(!client.is_connected());
    client.disconnect().unwrap();
}

#[test]
fn never_connected_disconnect_succeeds() {
    let client = Client::new(options(), MemoryProvider::default());
    assert_eq!(client.disconnect(), Ok(()));
}

#[test]
fn send_then_receive_hello_world() {
    let _ = tracing_subscriber::fmt::try_init();

    let provider = MemoryProvider::default();
    let client = connected(&provider);
    client
        .send("queue.sample", "hello, world", 0, "non_persistent", 10000)
        .unwrap();
    let received = client.receive("queue.sample", "queue", 1000).unwrap();
    assert_eq!(
        received,
        Received {
            text: "hello, world".into(),
            timed_out: false,
        }
    );
    assert_eq!(provider.open_resources().per_call(), 0);
}

#[test]
fn empty_receive_times_out_after_about_a_second() {
    let client = connected(&MemoryProvider::default());
    let started = Instant::now();
    let received = client.receive("queue.nothing", "queue", 1000).unwrap();
    let elapsed = started.elapsed();
    assert!(received.timed_out);
    assert!(received.text.is_empty());
    assert!(elapsed >= Duration::from_millis(1000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
}

#[test]
fn delayed_message_arrives_after_its_delay() {
    let client = connected(&MemoryProvider::default());
    client.send("queue.later", "soon", 200, "", 0).unwrap();
    assert!(client.receive("queue.later", "queue", 10).unwrap().timed_out);
    assert_eq!(
        client
            .receive("queue.later", "queue", 2000)
            .unwrap()
            .into_text()
            .as_deref(),
        Some("soon")
    );
}

#[test]
fn expired_message_is_not_delivered() {
    let client = connected(&MemoryProvider::default());
    client.send("queue.ttl", "stale", 0, "", 20).unwrap();
    thread::sleep(Duration::from_millis(60));
    assert!(client.receive("queue.ttl", "queue", 10).unwrap().timed_out);
}

#[test]
fn send_receive_against_echo_responder() {
    let _ = tracing_subscriber::fmt::try_init();

    let provider = MemoryProvider::default();
    let _responder = provider.spawn_responder("queue.sample", |text| text.to_owned());
    let client = connected(&provider);
    let reply = client
        .send_receive("queue.sample", "ping", "non_persistent", 1000)
        .unwrap();
    assert_eq!(reply, "ping");
    assert_eq!(provider.open_resources().per_call(), 0);
}

#[test]
fn send_receive_timeout_reports_missing_reply() {
    let provider = MemoryProvider::default();
    let client = connected(&provider);
    let received = client
        .send_receive_timeout("queue.unanswered", "ping", "", 0, 100)
        .unwrap();
    assert_eq!(received.into_text(), None);
    assert_eq!(provider.open_resources().per_call(), 0);
}

#[test]
fn operations_while_disconnected_fail() {
    let provider = MemoryProvider::default();
    let client = Client::new(options(), provider.clone());
    let not_connected = Error::InvalidConnectionState(ConnectionState::Disconnected);
    assert_eq!(
        client.send("queue.sample", "x", 0, "", 0),
        Err(not_connected.clone())
    );
    assert_eq!(
        client.send_receive("queue.sample", "x", "", 0),
        Err(not_connected.clone())
    );
    assert_eq!(
        client.send_receive_timeout("queue.sample", "x", "", 0, 10),
        Err(not_connected.clone())
    );
    assert_eq!(
        client.receive("queue.sample", "queue", 10),
        Err(not_connected.clone())
    );

    client.connect().unwrap();
    client.disconnect().unwrap();
    assert_eq!(
        client.send("queue.sample", "x", 0, "", 0),
        Err(not_connected)
    );
    assert_eq!(provider.calls(Primitive::CreateDestination), 0);
}

#[test]
fn concurrent_sends_use_isolated_resources() {
    let _ = tracing_subscriber::fmt::try_init();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let provider = MemoryProvider::default();
    let client = Arc::new(connected(&provider));
    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let client = client.clone();
            thread::spawn(move || {
                for n in 0..PER_THREAD {
                    client
                        .send("queue.shared", &format!("{}-{}", worker, n), 0, "", 0)
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(provider.pending("queue.shared"), THREADS * PER_THREAD);
    assert_eq!(provider.calls(Primitive::CreateSession), THREADS * PER_THREAD);
    assert_eq!(provider.open_resources().per_call(), 0);

    let mut seen = HashSet::new();
    for _ in 0..THREADS * PER_THREAD {
        let received = client.receive("queue.shared", "queue", 1000).unwrap();
        assert!(!received.timed_out);
        assert!(seen.insert(received.text));
    }
    assert!(client.receive("queue.shared", "queue", 10).unwrap().timed_out);
}

#[test]
fn concurrent_receives_and_sends() {
    let provider = MemoryProvider::default();
    let client = Arc::new(connected(&provider));
    let receiver = {
        let client = client.clone();
        thread::spawn(move || client.receive("queue.handoff", "queue", 5000))
    };
    thread::sleep(Duration::from_millis(50));
    client.send("queue.handoff", "here", 0, "", 0).unwrap();
    let received = receiver.join().unwrap().unwrap();
    assert_eq!(received.text, "here");
}

#[test]
fn every_failing_step_leaves_nothing_behind() {
    let _ = tracing_subscriber::fmt::try_init();

    let steps = [
        Primitive::CreateSession,
        Primitive::CreateProducer,
        Primitive::SetProducerDeliveryDelay,
        Primitive::SetProducerDeliveryMode,
        Primitive::SetProducerTimeToLive,
        Primitive::CreateTextMessage,
        Primitive::SetMessageText,
        Primitive::Send,
        Primitive::CreateRequestor,
        Primitive::SetMessageDeliveryMode,
        Primitive::SetMessageExpiration,
        Primitive::Request,
        Primitive::MessageText,
        Primitive::CreateConsumer,
        Primitive::Receive,
    ];
    let provider = MemoryProvider::default();
    let _responder = provider.spawn_responder("queue.echo", |text| text.to_owned());
    let client = connected(&provider);
    client.send("queue.inbox", "waiting", 0, "", 0).unwrap();

    for step in steps {
        provider.fail_on(step, Status::IllegalState);
        let outcomes = [
            client.send("queue.outbox", "x", 0, "", 0).err(),
            client.send_receive_timeout("queue.echo", "x", "", 0, 1000).err(),
            client.receive("queue.inbox", "queue", 10).err(),
        ];
        provider.recover(step);

        assert!(
            outcomes.iter().flatten().any(|err| err.status() == Some(Status::IllegalState)),
            "{} never failed",
            step
        );
        assert_eq!(provider.open_resources().per_call(), 0, "leak after {}", step);
    }
}

#[test]
fn provider_message_is_surfaced() {
    let provider = MemoryProvider::default();
    let client = connected(&provider);
    provider.fail_on(Primitive::CreateProducer, Status::NotPermitted);
    let err = client.send("queue.sample", "x", 0, "", 0).unwrap_err();
    match &err {
        Error::Provider {
            status,
            message,
            stack_trace,
        } => {
            assert_eq!(*status, Status::NotPermitted);
            assert!(message.contains("create_producer"), "{}", message);
            assert!(!stack_trace.is_empty());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("create_producer"));
}

#[test]
fn credentials_are_checked_by_the_provider() {
    let provider = MemoryProvider::new(MemoryConfig::default().with_user("admin", "secret"));
    let client = Client::new(options().with_password("wrong"), provider.clone());
    let err = client.connect().unwrap_err();
    assert_eq!(err.status(), Some(Status::SecurityException));
    assert!(!client.is_connected());

    let client = Client::new(options().with_password("secret"), provider);
    client.connect().unwrap();
    assert!(client.is_connected());
}

#[test]
fn events_follow_the_lifecycle() {
    let provider = MemoryProvider::default();
    let client = Client::new(options(), provider.clone());
    let events = client.events();

    client.connect().unwrap();
    provider.fail_on(Primitive::StopConnection, Status::IllegalState);
    assert!(client.disconnect().is_err());
    provider.recover(Primitive::StopConnection);
    client.disconnect().unwrap();

    assert_eq!(events.try_recv(), Ok(Event::Connected));
    assert!(matches!(
        events.try_recv(),
        Ok(Event::Error(Error::ConnectionStop(_)))
    ));
    assert_eq!(events.try_recv(), Ok(Event::Disconnected));
    assert!(events.try_recv().is_err());
}

#[test]
fn dropping_the_client_releases_everything() {
    let provider = MemoryProvider::default();
    {
        let client = connected(&provider);
        client.send("queue.sample", "x", 0, "", 0).unwrap();
    }
    assert_eq!(provider.open_resources(), Default::default());
}
