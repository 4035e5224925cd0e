//! Connection lifecycle state machine
//!
//! Provides type-safe lifecycle management for a single radio link. The state
//! must be consumed to transition, so an invalid edge can never be applied
//! silently: every transition either yields the next state or a
//! [`StateTransitionError`] leaving the caller's copy untouched.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of one peripheral link
///
/// The only legal path is
/// `Disconnected → Connecting → [Authenticating →] Connected → Disconnecting
/// → Disconnected`, with `Failed` as a terminal off-ramp from the connect
/// path. `Authenticating` is skipped only when no credential was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link to the peripheral
    Disconnected,
    /// Link establishment requested, awaiting the transport
    Connecting,
    /// Link is open, credential exchange in progress
    Authenticating,
    /// Link established and writable
    Connected,
    /// Teardown requested, awaiting transport confirmation
    Disconnecting,
    /// Connect attempt failed; eligible for reset on the next connect
    Failed { reason: String },
}

/// Events that drive lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEvent {
    /// A consumer asked to open the link
    ConnectRequested,
    /// The transport confirmed the link is open
    LinkOpened { credential_supplied: bool },
    /// The transport confirmed the secured link
    Authenticated,
    /// The transport reported a connect failure
    ConnectFailed { reason: String },
    /// A consumer asked to tear the link down
    DisconnectRequested,
    /// The transport confirmed or unilaterally reported link closure
    LinkClosed,
    /// A failed link is being returned to the pool
    Reset,
}

impl LinkEvent {
    /// Event name for guard errors and logging
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::ConnectRequested => "ConnectRequested",
            LinkEvent::LinkOpened { .. } => "LinkOpened",
            LinkEvent::Authenticated => "Authenticated",
            LinkEvent::ConnectFailed { .. } => "ConnectFailed",
            LinkEvent::DisconnectRequested => "DisconnectRequested",
            LinkEvent::LinkClosed => "LinkClosed",
            LinkEvent::Reset => "Reset",
        }
    }
}

impl ConnectionState {
    /// State name for guard errors, logging, and audit
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Authenticating => "Authenticating",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Failed { .. } => "Failed",
        }
    }

    /// Whether the link is writable (relay and file operations allowed)
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the state is an active (non-terminal, non-idle) lifecycle phase
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Connected
                | ConnectionState::Disconnecting
        )
    }

    /// Process an event and transition to the next state (consumes self)
    pub fn transition(self, event: LinkEvent) -> Result<ConnectionState, StateTransitionError> {
        use ConnectionState::*;
        use LinkEvent::*;

        let from = self.name();
        let event_name = event.name();

        match (self, event) {
            (Disconnected, ConnectRequested) => Ok(Connecting),

            (Connecting, LinkOpened { credential_supplied: true }) => Ok(Authenticating),
            (Connecting, LinkOpened { credential_supplied: false }) => Ok(Connected),
            (Authenticating, Authenticated) => Ok(Connected),

            (Connecting, ConnectFailed { reason }) => Ok(Failed { reason }),
            (Authenticating, ConnectFailed { reason }) => Ok(Failed { reason }),

            // Teardown is allowed from anywhere except idle and terminal.
            (Connecting, DisconnectRequested) => Ok(Disconnecting),
            (Authenticating, DisconnectRequested) => Ok(Disconnecting),
            (Connected, DisconnectRequested) => Ok(Disconnecting),

            (Disconnecting, LinkClosed) => Ok(Disconnected),

            // Unsolicited closure is equivalent to a completed disconnect.
            (Connecting, LinkClosed) => Ok(Disconnected),
            (Authenticating, LinkClosed) => Ok(Disconnected),
            (Connected, LinkClosed) => Ok(Disconnected),

            (Failed { .. }, Reset) => Ok(Disconnected),

            (_, _) => Err(StateTransitionError {
                from,
                event: event_name,
            }),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failed { reason } => write!(f, "Failed({reason})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<ConnectionState> {
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Failed {
                reason: "r".to_string(),
            },
        ]
    }

    fn all_events() -> Vec<LinkEvent> {
        vec![
            LinkEvent::ConnectRequested,
            LinkEvent::LinkOpened {
                credential_supplied: true,
            },
            LinkEvent::LinkOpened {
                credential_supplied: false,
            },
            LinkEvent::Authenticated,
            LinkEvent::ConnectFailed {
                reason: "r".to_string(),
            },
            LinkEvent::DisconnectRequested,
            LinkEvent::LinkClosed,
            LinkEvent::Reset,
        ]
    }

    #[test]
    fn credentialed_connect_passes_through_authenticating() {
        let state = ConnectionState::Disconnected
            .transition(LinkEvent::ConnectRequested)
            .unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        let state = state
            .transition(LinkEvent::LinkOpened {
                credential_supplied: true,
            })
            .unwrap();
        assert_eq!(state, ConnectionState::Authenticating);

        let state = state.transition(LinkEvent::Authenticated).unwrap();
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn credential_less_connect_skips_authenticating() {
        let state = ConnectionState::Connecting
            .transition(LinkEvent::LinkOpened {
                credential_supplied: false,
            })
            .unwrap();
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn connected_cannot_be_reached_from_disconnected_directly() {
        let err = ConnectionState::Disconnected
            .transition(LinkEvent::LinkOpened {
                credential_supplied: false,
            })
            .unwrap_err();
        assert_eq!(err.from, "Disconnected");
        assert_eq!(err.event, "LinkOpened");
    }

    #[test]
    fn disconnect_path_confirms_through_disconnecting() {
        let state = ConnectionState::Connected
            .transition(LinkEvent::DisconnectRequested)
            .unwrap();
        assert_eq!(state, ConnectionState::Disconnecting);

        let state = state.transition(LinkEvent::LinkClosed).unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn unsolicited_close_matches_completed_disconnect() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Connected,
        ] {
            assert_eq!(
                state.transition(LinkEvent::LinkClosed).unwrap(),
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn connect_failure_is_terminal_until_reset() {
        let failed = ConnectionState::Connecting
            .transition(LinkEvent::ConnectFailed {
                reason: "no response".to_string(),
            })
            .unwrap();
        assert_eq!(failed.name(), "Failed");

        // Every event except Reset is rejected from Failed.
        for event in all_events() {
            let again = ConnectionState::Failed {
                reason: "no response".to_string(),
            };
            match event {
                LinkEvent::Reset => {
                    assert_eq!(again.transition(event).unwrap(), ConnectionState::Disconnected)
                }
                other => assert!(again.transition(other).is_err()),
            }
        }
    }

    #[test]
    fn invalid_edges_leave_no_observable_transition() {
        // Exhaustive sweep: every (state, event) pair either follows a defined
        // edge or errors with the originating state name intact.
        let mut valid = 0;
        let mut invalid = 0;
        for state in all_states() {
            for event in all_events() {
                let from = state.name();
                match state.clone().transition(event) {
                    Ok(_) => valid += 1,
                    Err(e) => {
                        assert_eq!(e.from, from);
                        invalid += 1;
                    }
                }
            }
        }
        assert_eq!(valid, 14);
        assert_eq!(valid + invalid, 48);
    }
}
