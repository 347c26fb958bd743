use crate::Error;
use flume::{self, Receiver, Sender};
use std::sync::Arc;

#[derive(Clone, Debug)]
// Wrap in an arc not to temper with receiver count
pub(crate) struct Events(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
}

impl Events {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self(Arc::new(Inner { sender, receiver }))
    }

    pub(crate) fn listener(&self) -> Receiver<Event> {
        self.0.receiver.clone()
    }

    fn send(&self, event: Event) {
        // Do nothing if we don't have at least one external receiver
        if self.0.sender.receiver_count() > 1 {
            // We hold a receiver ourselves, so the channel cannot be disconnected.
            let _ = self.0.sender.send(event);
        }
    }

    pub(crate) fn connected(&self) {
        self.send(Event::Connected);
    }

    pub(crate) fn disconnected(&self) {
        self.send(Event::Disconnected);
    }

    pub(crate) fn error(&self, error: Error) {
        self.send(Event::Error(error));
    }
}

/// An event happening on a client's connection
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    Connected,
    Disconnected,
    /// `connect` or `disconnect` failed.
    Error(Error),
}
