//! Connection state of the coordinator

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Collecting,
    Stopping,
    /// Terminal until the coordinator is rebuilt
    Faulted,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self == Faulted {
            return false;
        }
        if next == Faulted || self == next {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Collecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Collecting)
                | (Connected, Disconnected)
                | (Collecting, Stopping)
                | (Stopping, Connected)
                | (Stopping, Disconnected)
        )
    }

    pub fn is_collecting(self) -> bool {
        self == ConnectionState::Collecting
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Collecting => "Collecting",
            ConnectionState::Stopping => "Stopping",
            ConnectionState::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn documented_edges_are_allowed() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Connected));
        assert!(Stopping.can_transition_to(Disconnected));
        // simulated sessions start without a port
        assert!(Disconnected.can_transition_to(Collecting));
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Collecting.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Collecting));
    }

    #[test]
    fn faulted_is_terminal() {
        for state in [Disconnected, Connecting, Connected, Collecting, Stopping] {
            assert!(state.can_transition_to(Faulted));
            assert!(!Faulted.can_transition_to(state));
        }
    }
}
