#![warn(rust_2018_idioms)]

//! ems-client
//!
//! A blocking client access layer over an enterprise message service
//! provider: one [`Client`] per logical connection, with point-to-point
//! [`send`], request/reply [`send_receive`] and bounded [`receive`] on top.
//!
//! The provider itself is abstracted by the [`Provider`] trait, an opaque
//! handle based contract in the shape vendor SDKs expose. Every operation
//! provisions its own session, producer or consumer and message, and gives
//! all of them back before returning, on success and on failure alike.
//! [`memory::MemoryProvider`] implements the contract in process.
//!
//! ## Example
//!
//! ```rust
//! use ems_client::{memory::MemoryProvider, Client, ClientOptions, Result};
//! use tracing::info;
//!
//! fn main() -> Result<()> {
//!     let _ = tracing_subscriber::fmt::try_init();
//!
//!     let provider = MemoryProvider::default();
//!     let _echo = provider.spawn_responder("queue.echo", |text| text.to_uppercase());
//!
//!     let options = ClientOptions::default()
//!         .with_server_url("tcp://127.0.0.1:7222")?
//!         .with_username("admin")
//!         .with_password("");
//!     let client = Client::new(options, provider);
//!     client.connect()?;
//!
//!     client.send("queue.sample", "hello, world", 0, "PERSISTENT", 0)?;
//!     let received = client.receive("queue.sample", "queue", 1000)?;
//!     info!(text = %received.text, "received");
//!     assert_eq!(received.text, "hello, world");
//!
//!     let reply = client.send_receive("queue.echo", "ping", "NON_PERSISTENT", 0)?;
//!     assert_eq!(reply, "PING");
//!
//!     client.disconnect()
//! }
//! ```
//!
//! [`send`]: ./struct.Client.html#method.send
//! [`send_receive`]: ./struct.Client.html#method.send_receive
//! [`receive`]: ./struct.Client.html#method.receive
//! [`Provider`]: ./provider/trait.Provider.html

pub use client::Client;
pub use client_options::ClientOptions;
pub use connection_status::{ConnectionState, ConnectionStatus};
pub use delivery_mode::{DeliveryMode, DestinationKind};
pub use error::{Error, Result};
pub use events::Event;
pub use operations::Received;
pub use provider::{Provider, Status};

pub mod memory;
pub mod provider;

mod client;
mod client_options;
mod connection_status;
mod delivery_mode;
mod error;
mod error_context;
mod events;
mod killswitch;
mod operations;
mod resource;
