//! External token validation.
//!
//! Profiles whose authority is external resolve tokens through a
//! [`TokenIntrospector`] registered under the profile's name.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use authcore_auth::{AuthProfile, Claims};
use authcore_core::{AuthError, AuthResult, CallContext, Interrupted, Subject, TenantId};

/// What an external authority reports about a token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenIntrospection {
    pub active: bool,
    pub subject: Subject,
    /// Falls back to the engine's default tenant when absent.
    pub tenant: Option<TenantId>,
    pub claims: Claims,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenIntrospection {
    pub fn active(subject: impl Into<String>) -> Self {
        Self {
            active: true,
            subject: Subject::new(subject),
            tenant: None,
            claims: Claims::new(),
            expires_at: None,
        }
    }

    pub fn inactive() -> Self {
        Self {
            active: false,
            ..Self::active("")
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
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntrospectionError {
    /// The authority answered and refused the token.
    #[error("token rejected: {0}")]
    Rejected(String),

    /// The authority could not be reached.
    #[error("introspection unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Canceled(#[from] Interrupted),
}

#[async_trait::async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, ctx: &CallContext, token: &str) -> Result<TokenIntrospection, IntrospectionError>;
}

/// Introspectors by name.
#[derive(Clone, Default)]
pub struct IntrospectorRegistry {
    by_name: HashMap<String, Arc<dyn TokenIntrospector>>,
}

impl IntrospectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, introspector: Arc<dyn TokenIntrospector>) -> AuthResult<()> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::invalid_input("introspector name is required"));
        }
        if self.by_name.contains_key(name) {
            return Err(AuthError::invalid_input(format!(
                "introspector '{name}' is already registered"
            )));
        }
        self.by_name.insert(name.to_string(), introspector);
        Ok(())
    }

    /// Register under the profile's name, which is where the engine looks.
    pub fn register_for(&mut self, profile: AuthProfile, introspector: Arc<dyn TokenIntrospector>) -> AuthResult<()> {
        self.register(profile.as_str(), introspector)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TokenIntrospector>> {
        self.by_name.get(name).cloned()
    }

    pub fn for_profile(&self, profile: AuthProfile) -> Option<Arc<dyn TokenIntrospector>> {
        self.get(profile.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl core::fmt::Debug for IntrospectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("IntrospectorRegistry").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_core::ErrorKind;

    struct Fixed;

    #[async_trait::async_trait]
    impl TokenIntrospector for Fixed {
        async fn introspect(&self, _ctx: &CallContext, _token: &str) -> Result<TokenIntrospection, IntrospectionError> {
            Ok(TokenIntrospection::active("svc"))
        }
    }

    #[test]
    fn rejects_empty_and_duplicate_names() {
        let mut registry = IntrospectorRegistry::new();
        registry.register("idp", Arc::new(Fixed)).unwrap();

        let dup = registry.register(" idp ", Arc::new(Fixed)).unwrap_err();
        assert!(dup.is(ErrorKind::InvalidInput));

        let empty = registry.register("  ", Arc::new(Fixed)).unwrap_err();
        assert!(empty.is(ErrorKind::InvalidInput));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn profile_registration_is_found_by_profile() {
        let mut registry = IntrospectorRegistry::new();
        registry
            .register_for(AuthProfile::AccessOpaqueRemote, Arc::new(Fixed))
            .unwrap();

        let found = registry.for_profile(AuthProfile::AccessOpaqueRemote).unwrap();
        let result = found.introspect(&CallContext::new(), "tok").await.unwrap();
        assert_eq!(result.subject.as_str(), "svc");
        assert!(registry.for_profile(AuthProfile::AccessJwt).is_none());
    }
}
