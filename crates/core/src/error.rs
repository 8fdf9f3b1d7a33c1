//! Error taxonomy shared by every component of the auth core.
//!
//! Callers branch on [`ErrorKind`] only; the message and wrapped source exist
//! for diagnostics. Messages must never carry secrets, hashes or tokens.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

/// Result type used across the auth core.
pub type AuthResult<T> = Result<T, AuthError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classification of an auth failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Secret/material mismatch, or an unsupported/ambiguous linkage.
    InvalidCredentials,
    /// Token validation failure.
    InvalidToken,
    /// Material is past its expiry.
    CredentialsExpired,
    PermissionDenied,
    /// No authenticator configured.
    Unauthenticated,
    /// No linkage exists for the subject.
    NotFound,
    /// Input rejected before any storage interaction.
    InvalidInput,
    /// Role mask lookup failed after the identity was proven.
    RoleLookup,
    /// Permission mask lookup failed after the identity was proven.
    PermissionLookup,
    /// The call was canceled or its deadline elapsed.
    Canceled,
    /// Backend unreachable or uninitialized.
    StorageUnavailable,
    /// Unsupported input, material type or profile.
    NotImplemented,
    /// Anything else, including configuration errors.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::CredentialsExpired => "credentials_expired",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RoleLookup => "role_lookup",
            ErrorKind::PermissionLookup => "permission_lookup",
            ErrorKind::Canceled => "canceled",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Kinds that describe a fault of the system rather than of the caller.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            ErrorKind::Unknown | ErrorKind::StorageUnavailable | ErrorKind::NotImplemented
        )
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified auth failure with an optional wrapped cause.
#[derive(Debug)]
pub struct AuthError {
    kind: ErrorKind,
    message: String,
    source: Option<BoxError>,
}

impl AuthError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn wrap<E>(kind: ErrorKind, message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn is_internal(&self) -> bool {
        self.kind.is_internal()
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredentials, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled")
    }
}

impl core::fmt::Display for AuthError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            f.write_str(&self.message)
        }
    }
}

impl StdError for AuthError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
