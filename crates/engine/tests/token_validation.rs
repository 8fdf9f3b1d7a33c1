//! `validate_token` against a scripted introspector.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use authcore_auth::{AuthProfile, PermissionMask, RoleMask};
use authcore_core::{CallContext, ErrorKind, Subject, TenantId};
use authcore_engine::{AuthEngine, IntrospectionError, IntrospectorRegistry, TokenIntrospection, TokenIntrospector};
use authcore_infra::cache::{CacheStores, InMemoryCache};
use authcore_infra::storage::{AuthzStores, InMemoryAuthStore, RoleRecord, RoleStore};

use common::ctx;

/// Answers every call with the scripted outcome and counts the calls.
struct Scripted {
    answer: Mutex<Result<TokenIntrospection, IntrospectionError>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(answer: Result<TokenIntrospection, IntrospectionError>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            calls: AtomicUsize::new(0),
        })
    }

    fn answer_with(&self, answer: Result<TokenIntrospection, IntrospectionError>) {
        *self.answer.lock().unwrap() = answer;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenIntrospector for Scripted {
    async fn introspect(&self, ctx: &CallContext, _token: &str) -> Result<TokenIntrospection, IntrospectionError> {
        ctx.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().unwrap().clone()
    }
}

fn engine_with(introspector: Arc<Scripted>, store: Option<Arc<InMemoryAuthStore>>, cached: bool) -> AuthEngine {
    let mut registry = IntrospectorRegistry::new();
    registry
        .register_for(AuthProfile::AccessOpaqueRemote, introspector)
        .unwrap();

    let mut builder = AuthEngine::builder().introspectors(registry);
    if let Some(store) = store {
        builder = builder.authz_stores(AuthzStores::from_store(store));
    }
    if cached {
        builder = builder.caches(CacheStores::from_cache(Arc::new(InMemoryCache::new())));
    }
    builder.build()
}

#[tokio::test]
async fn active_token_becomes_a_principal() {
    let store = Arc::new(InMemoryAuthStore::new());
    store
        .put_role(&ctx(), &RoleRecord {
            subject: Subject::new("svc"),
            tenant: TenantId::new("acme"),
            role_mask: RoleMask::VIEWER,
        })
        .await
        .unwrap();

    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")
        .with_tenant("acme")
        .with_claim("scope", "orders:read")
        .expires_at(Utc::now() + chrono::Duration::minutes(5))));
    let engine = engine_with(introspector.clone(), Some(store), false);

    let principal = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap();
    assert_eq!(principal.subject.as_str(), "svc");
    assert_eq!(principal.tenant, TenantId::new("acme"));
    assert_eq!(principal.role_mask, RoleMask::VIEWER);
    assert_eq!(principal.permission_mask, PermissionMask::NONE);
    assert_eq!(principal.claims["scope"], serde_json::json!("orders:read"));
    assert_eq!(introspector.calls(), 1);
}

#[tokio::test]
async fn missing_tenant_falls_back_to_default() {
    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")));
    let engine = engine_with(introspector, None, false);

    let principal = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap();
    assert_eq!(principal.tenant, TenantId::default_tenant());
}

#[tokio::test]
async fn introspection_results_are_cached() {
    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")));
    let engine = engine_with(introspector.clone(), None, true);

    engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap();
    let again = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap();
    assert_eq!(again.subject.as_str(), "svc");
    assert_eq!(introspector.calls(), 1);

    engine.validate_token(&ctx(), "opaque-xyz", None).await.unwrap();
    assert_eq!(introspector.calls(), 2);
}

#[tokio::test]
async fn refused_tokens_are_invalid() {
    let introspector = Scripted::new(Ok(TokenIntrospection::inactive()));
    let engine = engine_with(introspector.clone(), None, true);

    let err = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidToken));

    introspector.answer_with(Err(IntrospectionError::Rejected("revoked".into())));
    let err = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidToken));

    introspector.answer_with(Ok(
        TokenIntrospection::active("svc").expires_at(Utc::now() - chrono::Duration::seconds(1))
    ));
    let err = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidToken));

    introspector.answer_with(Ok(TokenIntrospection::active("")));
    let err = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidToken));

    // Failures are never cached.
    assert_eq!(introspector.calls(), 4);
}

#[tokio::test]
async fn unreachable_authority_fails_closed() {
    let introspector = Scripted::new(Err(IntrospectionError::Unavailable("connection refused".into())));
    let engine = engine_with(introspector, None, false);

    let err = engine.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::StorageUnavailable));
}

#[tokio::test]
async fn empty_token_is_rejected_before_introspection() {
    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")));
    let engine = engine_with(introspector.clone(), None, false);

    let err = engine.validate_token(&ctx(), "   ", None).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidToken));
    assert_eq!(introspector.calls(), 0);
}

#[tokio::test]
async fn unsupported_profiles_and_missing_introspectors() {
    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")));
    let engine = engine_with(introspector, None, false);

    let err = engine
        .validate_token(&ctx(), "eyJhbGciOi", Some(AuthProfile::AccessJwt))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotImplemented));

    let err = engine
        .validate_token(&ctx(), "opaque-abc", Some(AuthProfile::AccessOpaqueLocal))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotImplemented));

    let bare = AuthEngine::builder().build();
    let err = bare.validate_token(&ctx(), "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::Unauthenticated));
}

#[tokio::test]
async fn canceled_introspection_is_canceled() {
    let introspector = Scripted::new(Ok(TokenIntrospection::active("svc")));
    let engine = engine_with(introspector.clone(), None, false);
    let canceled = ctx();
    canceled.cancel();

    let err = engine.validate_token(&canceled, "opaque-abc", None).await.unwrap_err();
    assert!(err.is(ErrorKind::Canceled));
    assert_eq!(introspector.calls(), 0);
}
