//! Unified error handling for parley.
//!
//! This module provides the error hierarchy for intent handling, with
//! automatic conversions from storage and credential errors, client reply
//! generation, and metric labeling.

use crate::db::DbError;
use crate::protocol::ServerEvent;
use crate::security::CredentialError;
use thiserror::Error;

// ============================================================================
// Handler Errors (intent processing)
// ============================================================================

/// Errors that can occur while handling a client intent.
///
/// None of these are fatal: the originating connection gets a reply and
/// stays open.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("{claimed} is not the joined identity {bound}")]
    IdentityMismatch { claimed: String, bound: String },

    #[error("join before sending {0}")]
    NotJoined(&'static str),

    #[error("already joined as {0}")]
    AlreadyJoined(String),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("{0} is already online")]
    AlreadyOnline(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Get a static error code string, used on the wire and for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::Malformed(_) => "malformed",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::NotJoined(_) => "not_joined",
            Self::AlreadyJoined(_) => "already_joined",
            Self::InvalidCredential => "invalid_credential",
            Self::AlreadyOnline(_) => "already_online",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Credential(_) => "credential_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this is a client mistake rather than a server-side failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::StoreUnavailable(_) | Self::Credential(_) | Self::Internal(_)
        )
    }

    /// Convert to the event reported back to the originating connection.
    ///
    /// Failures of a `join` are reported as `join_error`; everything else as
    /// a generic `error` naming the event that failed. Server-side failures
    /// carry an opaque message.
    pub fn to_reply(&self, event: Option<&str>) -> ServerEvent {
        if event == Some("join") {
            ServerEvent::JoinError {
                reason: self.error_code(),
                message: self.client_message(),
            }
        } else {
            self.to_error_event(event)
        }
    }

    /// Convert to a generic `error` event, whatever the failed event was.
    pub fn to_error_event(&self, event: Option<&str>) -> ServerEvent {
        ServerEvent::Error {
            event: event.map(String::from),
            code: self.error_code(),
            message: self.client_message(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::StoreUnavailable(_) => "Storage is unavailable, please retry".to_string(),
            Self::Credential(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::AlreadyOnline(_) => {
                "This name is already online in another session.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for intent handlers.
pub type HandlerResult = Result<(), HandlerError>;
