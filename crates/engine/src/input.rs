//! Engine inputs and their normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authcore_auth::AuthProfile;
use authcore_core::{AuthError, AuthResult, Subject, TenantId};
use authcore_infra::storage::Metadata;

use crate::config::{EngineConfig, PastExpiryPolicy};

/// Kind of secret presented to [`AuthEngine::authorize`](crate::AuthEngine::authorize).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Password,
    ApiKey,
    /// Bearer tokens go through `validate_token`; `authorize` rejects them.
    Token,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            InputType::Password => "password",
            InputType::ApiKey => "api_key",
            InputType::Token => "token",
        }
    }

    /// Profile used when the input does not name one.
    pub fn default_profile(self, config: &EngineConfig) -> Option<AuthProfile> {
        match self {
            InputType::Password => Some(config.password_profile),
            InputType::ApiKey => Some(config.api_key_profile),
            InputType::Token => None,
        }
    }
}

impl core::fmt::Display for InputType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identity claim to verify.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthInput {
    pub subject: Subject,
    /// `None` resolves to [`EngineConfig::default_tenant`].
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub input_type: InputType,
    pub value: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub profile: Option<AuthProfile>,
}

impl AuthInput {
    pub fn new(subject: impl Into<String>, input_type: InputType, value: impl Into<String>) -> Self {
        Self {
            subject: Subject::new(subject),
            tenant: None,
            input_type,
            value: value.into(),
            metadata: Metadata::new(),
            profile: None,
        }
    }

    pub fn password(subject: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(subject, InputType::Password, value)
    }

    pub fn api_key(subject: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(subject, InputType::ApiKey, value)
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(TenantId::new(tenant));
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: AuthProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit tenant, or the configured default.
    pub fn resolve_tenant<'a>(&'a self, config: &'a EngineConfig) -> &'a TenantId {
        self.tenant.as_ref().unwrap_or(&config.default_tenant)
    }

    /// The explicit profile, or the default for the input type.
    ///
    /// Token inputs have no default and are `not_implemented` here.
    pub fn resolve_profile(&self, config: &EngineConfig) -> AuthResult<AuthProfile> {
        self.profile
            .or_else(|| self.input_type.default_profile(config))
            .ok_or_else(|| {
                AuthError::not_implemented(format!(
                    "input type '{}' is not supported by authorize",
                    self.input_type
                ))
            })
    }
}

impl core::fmt::Debug for AuthInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthInput")
            .field("subject", &self.subject)
            .field("tenant", &self.tenant)
            .field("input_type", &self.input_type)
            .field("value", &"<redacted>")
            .field("metadata", &self.metadata)
            .field("profile", &self.profile)
            .finish()
    }
}

/// New auth material for a subject.
#[derive(Clone, Serialize, Deserialize)]
pub struct CreateAuthInput {
    pub subject: Subject,
    /// `None` resolves to [`EngineConfig::default_tenant`].
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub profile: Option<AuthProfile>,
}

impl CreateAuthInput {
    pub fn new(subject: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            subject: Subject::new(subject),
            tenant: None,
            value: value.into(),
            expires_at: None,
            metadata: Metadata::new(),
            profile: None,
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(TenantId::new(tenant));
        self
    }

    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: AuthProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit tenant, or the configured default.
    pub fn resolve_tenant<'a>(&'a self, config: &'a EngineConfig) -> &'a TenantId {
        self.tenant.as_ref().unwrap_or(&config.default_tenant)
    }

    /// Trim subject and value and resolve a past expiry per `past_expiry`.
    ///
    /// Under [`PastExpiryPolicy::TreatAsNonExpiring`] an expiry at or before
    /// `now` is dropped; under [`PastExpiryPolicy::Reject`] it is an
    /// `invalid_input` error.
    pub fn normalize(&self, now: DateTime<Utc>, past_expiry: PastExpiryPolicy) -> AuthResult<Self> {
        let expires_at = match self.expires_at {
            Some(at) if at > now => Some(at),
            Some(_) => match past_expiry {
                PastExpiryPolicy::TreatAsNonExpiring => None,
                PastExpiryPolicy::Reject => {
                    return Err(AuthError::invalid_input("expires_at must be in the future"));
                }
            },
            None => None,
        };

        Ok(Self {
            subject: Subject::new(self.subject.as_str().trim()),
            tenant: self.tenant.clone(),
            value: self.value.trim().to_string(),
            expires_at,
            metadata: self.metadata.clone(),
            profile: self.profile,
        })
    }

    /// Subject and value must be non-empty. Call after [`normalize`](Self::normalize).
    pub fn validate(&self) -> AuthResult<()> {
        if self.subject.is_empty() {
            return Err(AuthError::invalid_input("subject is required"));
        }
        if self.value.is_empty() {
            return Err(AuthError::invalid_input("value is required"));
        }
        Ok(())
    }
}

impl core::fmt::Debug for CreateAuthInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CreateAuthInput")
            .field("subject", &self.subject)
            .field("tenant", &self.tenant)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .field("profile", &self.profile)
            .finish()
    }
}
