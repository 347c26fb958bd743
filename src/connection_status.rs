use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

/// Lock-free view of a client's connection state.
///
/// Readers never take the client's lifecycle lock; only `Client::connect`
/// and `Client::disconnect` write to it, and they do so while holding the
/// lifecycle lock exclusively.
#[derive(Clone, Default)]
pub struct ConnectionStatus(Arc<AtomicU8>);

impl ConnectionStatus {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_word(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connected = 1,
}

impl ConnectionState {
    fn from_word(word: u8) -> Self {
        match word {
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStatus")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert!(status.disconnected());
        assert!(!status.connected());
    }

    #[test]
    fn clones_share_state() {
        let status = ConnectionStatus::default();
        let view = status.clone();
        status.set_state(ConnectionState::Connected);
        assert!(view.connected());
        status.set_state(ConnectionState::Disconnected);
        assert!(view.disconnected());
    }
}
