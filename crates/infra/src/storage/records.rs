use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use authcore_auth::{PermissionMask, RoleMask};
use authcore_core::{
    AuthError, AuthId, AuthMaterialType, AuthStatus, LinkId, LogId, Subject, TenantId, TokenFormat,
    TokenUse,
};

/// Free-form string metadata attached to records.
pub type Metadata = BTreeMap<String, String>;

/// Identity-independent credential material.
///
/// `material_hash` is always the output of a one-way hasher, never the
/// plaintext. `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub id: AuthId,
    pub status: AuthStatus,
    pub date_added: DateTime<Utc>,
    pub date_modified: Option<DateTime<Utc>>,
    pub material_type: AuthMaterialType,
    pub material_hash: String,
    pub token_format: Option<TokenFormat>,
    pub token_use: Option<TokenUse>,
    /// `None` means the material never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AuthRecord {
    /// A fresh, active record.
    pub fn new(material_type: AuthMaterialType, material_hash: impl Into<String>) -> Self {
        Self {
            id: AuthId::new(),
            status: AuthStatus::Active,
            date_added: Utc::now(),
            date_modified: None,
            material_type,
            material_hash: material_hash.into(),
            token_format: None,
            token_use: None,
            expires_at: None,
            revoked_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AuthStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Remaining lifetime at `now`; `None` when the material never expires.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|exp| (exp - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Selection order among records: most recently created first, ties
    /// broken by ascending id. Matches the order `get_auths` returns.
    pub fn cmp_recency(&self, other: &Self) -> Ordering {
        other
            .date_added
            .cmp(&self.date_added)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl core::fmt::Debug for AuthRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthRecord")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("date_added", &self.date_added)
            .field("date_modified", &self.date_modified)
            .field("material_type", &self.material_type)
            .field("material_hash", &"<redacted>")
            .field("token_format", &self.token_format)
            .field("token_use", &self.token_use)
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Binds a subject to exactly one auth material record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAuthRecord {
    pub id: LinkId,
    pub date_added: DateTime<Utc>,
    pub date_modified: Option<DateTime<Utc>>,
    pub subject: Subject,
    pub auth_id: AuthId,
}

impl SubjectAuthRecord {
    pub fn new(subject: Subject, auth_id: AuthId) -> Self {
        Self {
            id: LinkId::new(),
            date_added: Utc::now(),
            date_modified: None,
            subject,
            auth_id,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLogEvent {
    Used,
    Validated,
    Revoked,
}

impl AuthLogEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthLogEvent::Used => "used",
            AuthLogEvent::Validated => "validated",
            AuthLogEvent::Revoked => "revoked",
        }
    }
}

impl core::fmt::Display for AuthLogEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthLogEvent {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "used" => Ok(AuthLogEvent::Used),
            "validated" => Ok(AuthLogEvent::Validated),
            "revoked" => Ok(AuthLogEvent::Revoked),
            other => Err(AuthError::invalid_input(format!("unknown auth log event: '{other}'"))),
        }
    }
}

/// Append-only audit event. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLogRecord {
    pub id: LogId,
    pub date_added: DateTime<Utc>,
    pub auth_id: AuthId,
    pub subject: Subject,
    pub event: AuthLogEvent,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AuthLogRecord {
    pub fn new(auth_id: AuthId, subject: Subject, event: AuthLogEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: LogId::new(),
            date_added: Utc::now(),
            auth_id,
            subject,
            event,
            occurred_at,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub subject: Subject,
    pub tenant: TenantId,
    pub role_mask: RoleMask,
}

/// Direct permission grants for a (subject, tenant) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub subject: Subject,
    pub tenant: TenantId,
    pub permission_mask: PermissionMask,
}
