use ems_client::{memory::MemoryProvider, Client, ClientOptions, Event, Result};
use std::time::Duration;
use tracing::info;

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    tracing_subscriber::fmt::init();

    let url = std::env::var("EMS_URL").unwrap_or_else(|_| "tcp://127.0.0.1:7222".into());
    let options = ClientOptions::default()
        .with_server_url(&url)?
        .with_username("admin")
        .with_password("")
        .with_request_timeout(Duration::from_secs(5));

    let provider = MemoryProvider::default();
    let _echo = provider.spawn_responder("queue.echo", |text| format!("echo: {}", text));

    let client = Client::new(options, provider);
    let events = client.events();
    client.connect()?;
    info!(?client, "CONNECTED");

    client.send("queue.sample", "hello, world", 0, "non_persistent", 10000)?;
    let received = client.receive("queue.sample", "queue", 1000)?;
    info!(text = %received.text, timed_out = received.timed_out, "received");

    let received = client.receive("queue.sample", "queue", 1000)?;
    info!(timed_out = received.timed_out, "nothing left");

    let reply = client.send_receive("queue.echo", "ping", "non_persistent", 1000)?;
    info!(%reply, "got reply");

    client.disconnect()?;
    for event in events.try_iter() {
        match event {
            Event::Error(err) => info!(%err, "connection error"),
            event => info!(?event, "connection event"),
        }
    }
    Ok(())
}
