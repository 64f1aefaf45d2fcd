use super::checkin::CheckIn;
use std::time::Duration;

/// Lifecycle of the single relay connection owned by a client process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Everything a client process observes, as one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionChanged {
        state: ConnectionState,
        detail: Option<String>,
    },
    /// Initial history after a (re)connect has been received.
    HistoryReady { received: usize },
    OnlineCountChanged { count: u64 },
    CooldownTick { remaining: Duration },
    CheckInReceived { check_in: CheckIn },
    /// An `error` notice from the relay. The connection stays open.
    RelayNotice { message: String },
    /// The relay closed the connection for bad credentials. Automatic
    /// reconnects stay suspended until the next explicit connect.
    AuthenticationFailed { reason: String },
}

impl ClientEvent {
    pub fn connection(state: ConnectionState, detail: Option<String>) -> Self {
        Self::ConnectionChanged { state, detail }
    }
}
