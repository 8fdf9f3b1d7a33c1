//! The auth engine: verify identity claims, create linked auth material and
//! validate externally issued tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, instrument, warn};

use authcore_auth::{
    AuthProfile, Authority, HashError, Hasher, PermissionMask, PersistencePolicy, Pbkdf2Hasher, PolicyMatrix,
    Principal, RoleMask, StaticPolicyMatrix,
};
use authcore_core::{AuthError, AuthResult, AuthStatus, CallContext, ErrorKind, Subject, TenantId};
use authcore_infra::cache::CacheStores;
use authcore_infra::storage::{
    AuthLogEvent, AuthLogRecord, AuthMaterialStores, AuthRecord, AuthzStores, StorageError, SubjectAuthRecord,
};

use crate::cache_path::{self, CachePath, Cached};
use crate::config::EngineConfig;
use crate::input::{AuthInput, CreateAuthInput};
use crate::introspection::{IntrospectionError, IntrospectorRegistry, TokenIntrospection};
use crate::saga::LinkedWrite;

struct Inner {
    material: Option<AuthMaterialStores>,
    authz: Option<AuthzStores>,
    caches: CacheStores,
    hasher: Arc<dyn Hasher>,
    policies: Arc<dyn PolicyMatrix>,
    introspectors: IntrospectorRegistry,
    config: EngineConfig,
}

/// Stateless orchestrator over storage, cache, hasher and policy
/// collaborators. Cheap to clone; safe to share across tasks.
#[derive(Clone)]
pub struct AuthEngine {
    inner: Arc<Inner>,
}

#[derive(Default)]
pub struct AuthEngineBuilder {
    material: Option<AuthMaterialStores>,
    authz: Option<AuthzStores>,
    caches: CacheStores,
    hasher: Option<Arc<dyn Hasher>>,
    policies: Option<Arc<dyn PolicyMatrix>>,
    introspectors: IntrospectorRegistry,
    config: EngineConfig,
}

impl AuthEngineBuilder {
    #[must_use]
    pub fn material_stores(mut self, stores: AuthMaterialStores) -> Self {
        self.material = Some(stores);
        self
    }

    #[must_use]
    pub fn authz_stores(mut self, stores: AuthzStores) -> Self {
        self.authz = Some(stores);
        self
    }

    #[must_use]
    pub fn caches(mut self, caches: CacheStores) -> Self {
        self.caches = caches;
        self
    }

    #[must_use]
    pub fn hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    #[must_use]
    pub fn policies(mut self, policies: Arc<dyn PolicyMatrix>) -> Self {
        self.policies = Some(policies);
        self
    }

    #[must_use]
    pub fn introspectors(mut self, introspectors: IntrospectorRegistry) -> Self {
        self.introspectors = introspectors;
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn has_material_stores(&self) -> bool {
        self.material.is_some()
    }

    pub(crate) fn has_authz_stores(&self) -> bool {
        self.authz.is_some()
    }

    pub(crate) fn has_caches(&self) -> bool {
        !self.caches.is_empty()
    }

    /// Unset hasher and policy matrix fall back to PBKDF2 defaults and the
    /// built-in profile table.
    pub fn build(self) -> AuthEngine {
        AuthEngine {
            inner: Arc::new(Inner {
                material: self.material,
                authz: self.authz,
                caches: self.caches,
                hasher: self.hasher.unwrap_or_else(|| Arc::new(Pbkdf2Hasher::default())),
                policies: self
                    .policies
                    .unwrap_or_else(|| Arc::new(StaticPolicyMatrix::defaults())),
                introspectors: self.introspectors,
                config: self.config,
            }),
        }
    }
}

impl AuthEngine {
    pub fn builder() -> AuthEngineBuilder {
        AuthEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn policy(&self, profile: AuthProfile) -> AuthResult<PersistencePolicy> {
        self.inner
            .policies
            .policy(profile)
            .ok_or_else(|| AuthError::configuration(format!("no persistence policy for profile '{profile}'")))
    }

    fn material_stores(&self) -> AuthResult<&AuthMaterialStores> {
        self.inner
            .material
            .as_ref()
            .ok_or_else(|| AuthError::new(ErrorKind::StorageUnavailable, "auth storage is not configured"))
    }

    fn cache_path(&self, profile: AuthProfile, policy: PersistencePolicy) -> CachePath<'_> {
        CachePath::new(&self.inner.caches, profile, policy, self.inner.config.stale_grace)
    }

    /// Verify an identity claim against stored material and return the
    /// principal with its role and permission masks.
    #[instrument(
        skip_all,
        fields(subject = %input.subject, tenant = ?input.tenant, input_type = %input.input_type),
        err(Display)
    )]
    pub async fn authorize(&self, ctx: &CallContext, input: &AuthInput) -> AuthResult<Principal> {
        ctx.check()?;

        let profile = input.resolve_profile(&self.inner.config)?;
        let policy = self.policy(profile)?;
        if policy.authority != Authority::SourceOfTruth || !policy.persist_in_source_of_truth {
            return Err(AuthError::not_implemented(format!(
                "profile '{profile}' is not verified against stored material"
            )));
        }
        let stores = self.material_stores()?;

        let tenant = input.resolve_tenant(&self.inner.config);
        let cache = self.cache_path(profile, policy);
        let key = policy
            .uses_cache()
            .then(|| cache_path::principal_key(profile, tenant, &input.subject, &input.value));

        let mut stale = None;
        if let Some(key) = key.as_deref() {
            match cache.lookup_principal(ctx, key).await {
                Cached::Fresh(snapshot) => {
                    debug!(profile = %profile, "principal served from cache");
                    return Ok(snapshot.into_principal(Utc::now()));
                }
                other => stale = other.stale_for(&policy),
            }
        }

        let (principal, remaining) = match self.authenticate(ctx, stores, input, &cache).await {
            Ok(found) => found,
            Err(err) => match stale {
                Some(snapshot) if err.is(ErrorKind::StorageUnavailable) => {
                    warn!(profile = %profile, error = %err, "source of truth unavailable; serving stale principal");
                    return Ok(snapshot.into_principal(Utc::now()));
                }
                _ => return Err(err),
            },
        };

        if let Some(key) = key.as_deref() {
            cache.store_principal(ctx, key, &principal, remaining).await;
        }
        Ok(principal)
    }

    /// Source-of-truth path of `authorize`. Returns the principal and the
    /// remaining lifetime of the material that proved it.
    async fn authenticate(
        &self,
        ctx: &CallContext,
        stores: &AuthMaterialStores,
        input: &AuthInput,
        cache: &CachePath<'_>,
    ) -> AuthResult<(Principal, Option<Duration>)> {
        let material_type = cache.policy().material_type;

        let links = stores
            .subject_auth
            .list_subject_auth_by_subject(ctx, &input.subject)
            .await
            .map_err(|e| e.into_auth_error(ErrorKind::StorageUnavailable, "failed to look up subject auth records"))?;

        if links.is_empty() {
            return Err(AuthError::new(ErrorKind::NotFound, "subject not found"));
        }

        let mut auth_ids = Vec::with_capacity(links.len());
        for link in &links {
            if link.subject != input.subject {
                warn!(auth_id = %link.auth_id, "linkage resolved to a different subject");
                return Err(AuthError::wrap(
                    ErrorKind::InvalidCredentials,
                    "auth records found for different subjects",
                    StorageError::Integrity(format!("linkage {} belongs to another subject", link.id)),
                ));
            }
            auth_ids.push(link.auth_id);
        }

        let mut records = stores
            .auth
            .get_auths(ctx, &auth_ids)
            .await
            .map_err(|e| e.into_auth_error(ErrorKind::StorageUnavailable, "failed to retrieve auth records"))?;

        // Most recently created active record of the type wins.
        records.sort_by(AuthRecord::cmp_recency);
        let Some(mut record) = records
            .into_iter()
            .find(|r| r.material_type == material_type && r.is_active())
        else {
            return Err(AuthError::invalid_credentials(format!(
                "no active {material_type} auth record found for subject"
            )));
        };

        let now = Utc::now();
        if record.is_expired_at(now) {
            self.mark_expired(ctx, stores, &mut record, &input.subject).await;
            return Err(AuthError::new(ErrorKind::CredentialsExpired, "credentials have expired"));
        }

        if !self.verify(&input.value, &record.material_hash).await? {
            return Err(AuthError::invalid_credentials("authentication failed"));
        }

        let authenticated_at = Utc::now();
        let log = AuthLogRecord::new(record.id, input.subject.clone(), AuthLogEvent::Used, authenticated_at)
            .with_metadata(input.metadata.clone());
        if let Err(err) = stores.auth_log.put_auth_log(ctx, &log).await {
            warn!(auth_id = %record.id, event = %log.event, error = %err, "failed to write auth log record");
        }

        let tenant = input.resolve_tenant(&self.inner.config);
        let (role_mask, permission_mask) = self
            .resolve_masks(ctx, &input.subject, tenant, cache)
            .await?;

        let principal = Principal::new(input.subject.clone(), tenant.clone(), authenticated_at)
            .with_masks(role_mask, permission_mask);
        Ok((principal, record.remaining_at(authenticated_at)))
    }

    /// Flip the record to `expired` and persist it, best-effort.
    async fn mark_expired(
        &self,
        ctx: &CallContext,
        stores: &AuthMaterialStores,
        record: &mut AuthRecord,
        subject: &Subject,
    ) {
        record.status = AuthStatus::Expired;
        record.date_modified = Some(Utc::now());
        if let Err(err) = stores.auth.put_auth(ctx, record).await {
            error!(auth_id = %record.id, subject = %subject, error = %err, "failed to persist expired auth status");
        }
    }

    /// PBKDF2 is CPU-bound, so both directions run on the blocking pool.
    /// Hasher errors never reveal which stage failed.
    async fn verify(&self, secret: &str, encoded_hash: &str) -> AuthResult<bool> {
        let hasher = self.inner.hasher.clone();
        let secret = secret.to_string();
        let encoded_hash = encoded_hash.to_string();
        match tokio::task::spawn_blocking(move || hasher.verify(&secret, &encoded_hash)).await {
            Ok(Ok(matched)) => Ok(matched),
            Ok(Err(err)) => Err(AuthError::wrap(
                ErrorKind::InvalidCredentials,
                "unable to verify credentials",
                err,
            )),
            Err(join) => Err(AuthError::wrap(ErrorKind::Unknown, "verification task failed", join)),
        }
    }

    async fn hash(&self, secret: &str) -> AuthResult<String> {
        let hasher = self.inner.hasher.clone();
        let secret = secret.to_string();
        match tokio::task::spawn_blocking(move || hasher.hash(&secret)).await {
            Ok(Ok(hash)) => Ok(hash),
            Ok(Err(err @ HashError::InvalidConfig(_))) => Err(AuthError::wrap(
                ErrorKind::InvalidInput,
                "secret cannot be hashed",
                err,
            )),
            Ok(Err(err)) => Err(AuthError::wrap(ErrorKind::Unknown, "failed to hash secret", err)),
            Err(join) => Err(AuthError::wrap(ErrorKind::Unknown, "hashing task failed", join)),
        }
    }

    /// Role and permission masks for `(subject, tenant)`. A missing record
    /// is an empty mask; a failed lookup is surfaced by its own kind.
    async fn resolve_masks(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
        cache: &CachePath<'_>,
    ) -> AuthResult<(RoleMask, PermissionMask)> {
        let Some(authz) = self.inner.authz.as_ref() else {
            return Ok((RoleMask::NONE, PermissionMask::NONE));
        };

        let role_mask = authz
            .roles
            .get_role(ctx, subject, tenant)
            .await
            .map_err(|e| e.into_auth_error(ErrorKind::RoleLookup, "failed to get role"))?
            .map(|r| r.role_mask)
            .unwrap_or_default();

        let key = cache_path::permission_key(tenant, subject);
        if let Some(mask) = cache.lookup_permission_mask(ctx, &key).await {
            return Ok((role_mask, mask));
        }

        let permission_mask = authz
            .permissions
            .get_permission(ctx, subject, tenant)
            .await
            .map_err(|e| e.into_auth_error(ErrorKind::PermissionLookup, "failed to get permission"))?
            .map(|p| p.permission_mask)
            .unwrap_or_default();
        cache.store_permission_mask(ctx, &key, permission_mask).await;

        Ok((role_mask, permission_mask))
    }

    /// Hash the secret and write material, linkage and a `validated` audit
    /// record as one unit.
    #[instrument(skip_all, fields(subject = %input.subject, tenant = ?input.tenant), err(Display))]
    pub async fn create_auth(&self, ctx: &CallContext, input: &CreateAuthInput) -> AuthResult<()> {
        ctx.check()?;

        let profile = input.profile.unwrap_or(self.inner.config.password_profile);
        let policy = self.policy(profile)?;
        if policy.authority != Authority::SourceOfTruth || !policy.persist_in_source_of_truth {
            return Err(AuthError::not_implemented(format!(
                "profile '{profile}' does not persist material in the source of truth"
            )));
        }

        let now = Utc::now();
        let input = input.normalize(now, self.inner.config.past_expiry)?;
        input.validate()?;
        if input.expires_at.is_none() && !policy.allow_non_expiring {
            return Err(AuthError::invalid_input(format!(
                "profile '{profile}' requires an expiry"
            )));
        }

        let stores = self.material_stores()?;

        let hash = self.hash(&input.value).await?;

        let mut auth = AuthRecord::new(policy.material_type, hash);
        auth.token_format = policy.token_format;
        auth.token_use = policy.token_use;
        auth.expires_at = input.expires_at;
        auth.metadata = input.metadata.clone();

        let link = SubjectAuthRecord::new(input.subject.clone(), auth.id);
        let mut log_metadata = input.metadata.clone();
        log_metadata.insert(
            "tenant".to_string(),
            input.resolve_tenant(&self.inner.config).as_str().to_string(),
        );
        log_metadata.insert("profile".to_string(), profile.as_str().to_string());
        let log = AuthLogRecord::new(auth.id, input.subject.clone(), AuthLogEvent::Validated, now)
            .with_metadata(log_metadata);

        let write = LinkedWrite { auth, link, log };
        let mode = write.execute(ctx, stores).await.map_err(AuthError::from)?;
        debug!(auth_id = %write.auth.id, mode = ?mode, "auth material created");
        Ok(())
    }

    /// Resolve an externally issued token to a principal.
    ///
    /// `profile` defaults to the configured token profile. Only profiles
    /// backed by an external authority are supported.
    #[instrument(skip_all, fields(profile = tracing::field::Empty), err(Display))]
    pub async fn validate_token(
        &self,
        ctx: &CallContext,
        token: &str,
        profile: Option<AuthProfile>,
    ) -> AuthResult<Principal> {
        ctx.check()?;

        let profile = profile.unwrap_or(self.inner.config.token_profile);
        tracing::Span::current().record("profile", profile.as_str());

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::new(ErrorKind::InvalidToken, "token is required"));
        }

        let policy = self.policy(profile)?;
        match policy.authority {
            Authority::ExternalAuthority => {}
            Authority::SelfContained => {
                return Err(AuthError::not_implemented(format!(
                    "self-contained tokens for profile '{profile}' are not supported"
                )));
            }
            Authority::SourceOfTruth => {
                return Err(AuthError::not_implemented(format!(
                    "stored tokens for profile '{profile}' are not supported"
                )));
            }
        }

        let cache = self.cache_path(profile, policy);
        let key = cache_path::token_key(profile, token);
        let stale = match cache.lookup_token(ctx, &key).await {
            Cached::Fresh(snapshot) => {
                debug!(profile = %profile, "token served from cache");
                return Ok(snapshot.into_principal(Utc::now()));
            }
            other => other.stale_for(&policy),
        };

        let introspector = self
            .inner
            .introspectors
            .for_profile(profile)
            .ok_or_else(|| AuthError::new(ErrorKind::Unauthenticated, "no token introspector configured"))?;

        let result = match introspector.introspect(ctx, token).await {
            Ok(result) => result,
            Err(IntrospectionError::Rejected(reason)) => {
                return Err(AuthError::wrap(
                    ErrorKind::InvalidToken,
                    "token rejected",
                    IntrospectionError::Rejected(reason),
                ));
            }
            Err(IntrospectionError::Canceled(reason)) => return Err(reason.into()),
            Err(err @ IntrospectionError::Unavailable(_)) => {
                if let Some(snapshot) = stale {
                    warn!(profile = %profile, error = %err, "token authority unavailable; serving stale principal");
                    return Ok(snapshot.into_principal(Utc::now()));
                }
                return Err(AuthError::wrap(
                    ErrorKind::StorageUnavailable,
                    "token authority unavailable",
                    err,
                ));
            }
        };

        let now = Utc::now();
        let remaining = result
            .expires_at
            .map(|exp| (exp - now).to_std().unwrap_or(Duration::ZERO));
        let principal = self.principal_from_introspection(ctx, result, &cache, now).await?;
        cache.store_token(ctx, &key, &principal, remaining).await;
        Ok(principal)
    }

    async fn principal_from_introspection(
        &self,
        ctx: &CallContext,
        result: TokenIntrospection,
        cache: &CachePath<'_>,
        now: chrono::DateTime<Utc>,
    ) -> AuthResult<Principal> {
        if !result.active {
            return Err(AuthError::new(ErrorKind::InvalidToken, "token is not active"));
        }
        if result.expires_at.is_some_and(|exp| exp <= now) {
            return Err(AuthError::new(ErrorKind::InvalidToken, "token has expired"));
        }
        if result.subject.is_empty() {
            return Err(AuthError::new(ErrorKind::InvalidToken, "token has no subject"));
        }

        let tenant = result
            .tenant
            .unwrap_or_else(|| self.inner.config.default_tenant.clone());
        let (role_mask, permission_mask) = self
            .resolve_masks(ctx, &result.subject, &tenant, cache)
            .await?;

        let mut principal = Principal::new(result.subject, tenant, now).with_masks(role_mask, permission_mask);
        principal.claims = result.claims;
        Ok(principal)
    }
}

impl core::fmt::Debug for AuthEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthEngine")
            .field("material", &self.inner.material)
            .field("authz", &self.inner.authz)
            .field("caches", &self.inner.caches)
            .field("introspectors", &self.inner.introspectors)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
