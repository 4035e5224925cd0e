//! Error types for the XBee gateway
//!
//! This module contains all error types used throughout the gateway core:
//! transport errors bubbled up from the radio collaborator, state machine
//! guard violations, and the main [`GatewayError`] type that unifies them.

use thiserror::Error;

use crate::types::PeripheralId;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures originating in the external radio transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to start scan: {0}")]
    ScanFailed(String),

    #[error("failed to open link to {identity}: {reason}")]
    OpenFailed { identity: PeripheralId, reason: String },

    #[error("authentication failed for {identity}")]
    AuthenticationFailed { identity: PeripheralId },

    #[error("failed to close link to {identity}: {reason}")]
    CloseFailed { identity: PeripheralId, reason: String },

    #[error("failed to write to {identity}: {reason}")]
    WriteFailed { identity: PeripheralId, reason: String },

    #[error("no link available to {identity}")]
    LinkUnavailable { identity: PeripheralId },

    #[error("radio adapter not available")]
    AdapterUnavailable,
}

// ----------------------------------------------------------------------------
// State Machine Errors
// ----------------------------------------------------------------------------

/// A lifecycle event was applied to a state with no edge for it
#[derive(Debug, Clone, Error)]
#[error("no transition from {from} on {event}")]
pub struct StateTransitionError {
    /// Name of the state the machine was in
    pub from: &'static str,
    /// Name of the rejected event
    pub event: &'static str,
}

// ----------------------------------------------------------------------------
// Gateway Error
// ----------------------------------------------------------------------------

/// Core error type for the gateway protocol
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Operation attempted from an incompatible lifecycle state
    #[error("{operation} not allowed for {identity} in state {state}")]
    InvalidStateTransition {
        identity: PeripheralId,
        operation: &'static str,
        state: String,
    },

    /// Relay or file operation attempted without an active connection
    #[error("peripheral {identity} is not connected")]
    NotConnected { identity: PeripheralId },

    /// A file transfer is already running for the peripheral
    #[error("file transfer already active for {identity}")]
    SessionAlreadyActive { identity: PeripheralId },

    /// Malformed caller input (chunk size, payload, identity)
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Opaque failure bubbled from the radio transport
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A chunk or link operation exceeded its deadline
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Internal channel plumbing failure
    #[error("channel error: {message}")]
    Channel { message: String },

    /// Rejected gateway configuration
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl GatewayError {
    /// Create an invalid argument error with a reason
    pub fn invalid_argument<T: Into<String>>(reason: T) -> Self {
        GatewayError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a guard violation for an operation on a peripheral
    pub fn invalid_transition<S: Into<String>>(
        identity: PeripheralId,
        operation: &'static str,
        state: S,
    ) -> Self {
        GatewayError::InvalidStateTransition {
            identity,
            operation,
            state: state.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        GatewayError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        GatewayError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from a duration
    pub fn timeout(duration: std::time::Duration) -> Self {
        GatewayError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, GatewayError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
