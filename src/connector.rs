//! Connector protocol: how realms plug into the engine.
//!
//! A connector owns one realm and answers three questions, in order of cost:
//!
//! 1. [`Connector::locate`]: is this reference mine, and what is its
//!    locator? `Ok(None)` means "not mine, try the next connector";
//!    a `NotFound` error means "mine, but it does not exist" and stops
//!    the dispatch chain.
//! 2. [`Connector::resolve`]: cheap metadata refresh. Checks access, reports
//!    revisions and available affordances, flags expired observations.
//!    Must not fetch content.
//! 3. [`Connector::observe`]: the expensive content read for one affordance.
//!
//! The [`ConnectorRegistry`] is built once at startup; every request gets
//! its own [`RequestContext`] carrying credentials and the per-request
//! memoization of locate/resolve results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::bundle::{Bundle, Fragment};
use crate::error::{KnowledgeError, Result};
use crate::metadata::{Locator, MetadataDelta, ResourceView};
use crate::relation::Relation;
use crate::uri::{Affordance, Observable, Reference, ResourceUri};

///
/// Results
///

/// What `resolve` reports back: a sparse metadata update, the cached
/// observations it invalidates, and whether this realm caches at all.
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    pub metadata: MetadataDelta,
    /// Root observations whose cache expired since the last resolution.
    pub expired: Vec<Observable>,
    /// When false, only an alias is kept and `resolve` reruns every access.
    pub should_cache: bool,
}

/// Ingestion switches a connector can set per observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOptions {
    /// Generate label fields for chunks and media.
    pub fields: bool,
    /// Extract `link` relations from chunk content.
    pub relations_link: bool,
    /// Extract `parent` relations from collection children.
    pub relations_parent: bool,
}

/// Content from `observe`: either a raw fragment for the ingestion
/// pipeline, or a bundle the connector built itself.
#[derive(Debug, Clone)]
pub enum ObservePayload {
    Fragment(Fragment),
    Bundle(Bundle),
}

#[derive(Debug, Clone)]
pub struct ObserveResult {
    pub payload: ObservePayload,
    pub metadata: MetadataDelta,
    pub relations: Vec<Relation>,
    /// Whether the ingested bundle is cached until `resolve` expires it.
    pub should_cache: bool,
    pub options: ObserveOptions,
}

impl ObserveResult {
    pub fn fragment(fragment: Fragment) -> ObserveResult {
        ObserveResult {
            payload: ObservePayload::Fragment(fragment),
            metadata: MetadataDelta::default(),
            relations: Vec::new(),
            should_cache: false,
            options: ObserveOptions::default(),
        }
    }

    pub fn bundle(bundle: Bundle) -> ObserveResult {
        ObserveResult {
            payload: ObservePayload::Bundle(bundle),
            metadata: MetadataDelta::default(),
            relations: Vec::new(),
            should_cache: false,
            options: ObserveOptions::default(),
        }
    }

    pub fn cached(mut self) -> ObserveResult {
        self.should_cache = true;
        self
    }
}

///
/// Connector trait
///

#[async_trait]
pub trait Connector: Send + Sync {
    /// The realm this connector owns. Registration enforces uniqueness.
    fn realm(&self) -> &str;

    /// Map a reference to this realm's locator, or decline with `Ok(None)`.
    /// Not called for URIs already cached in storage.
    async fn locate(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> Result<Option<Locator>>;

    /// Validate access and refresh the metadata that is cheap to read.
    /// `cached` is the merged view from storage, when one exists.
    async fn resolve(
        &self,
        ctx: &RequestContext,
        locator: &Locator,
        cached: Option<&ResourceView>,
    ) -> Result<ResolveResult>;

    /// Read the content of one affordance. `resolved` is the cached
    /// metadata merged with this request's `resolve` output.
    async fn observe(
        &self,
        ctx: &RequestContext,
        locator: &Locator,
        affordance: Affordance,
        resolved: &MetadataDelta,
    ) -> Result<ObserveResult>;
}

///
/// Registry
///

/// Ordered set of connectors. Dispatch tries each realm in registration
/// order, so more specific connectors should be registered first.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<()> {
        if self.find(connector.realm()).is_some() {
            return Err(KnowledgeError::bad_connector(
                connector.realm(),
                "realm already registered",
            ));
        }
        self.connectors.push(connector);
        Ok(())
    }

    pub fn find(&self, realm: &str) -> Option<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|connector| connector.realm() == realm)
            .cloned()
    }

    pub fn require(&self, realm: &str) -> Result<Arc<dyn Connector>> {
        self.find(realm).ok_or_else(|| {
            KnowledgeError::bad_request(format!("no connector for realm '{realm}'"))
        })
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Dispatch a reference through the chain. The first connector that
    /// returns a locator wins; a `NotFound` error is terminal, because the
    /// connector committed to the reference before failing.
    pub async fn locate(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> Result<Locator> {
        if let Some(memoized) = ctx.memoized_locator(reference) {
            return memoized;
        }

        let mut outcome: Result<Locator> = Err(KnowledgeError::not_found(format!(
            "no connector claimed '{reference}'"
        )));
        for connector in &self.connectors {
            match connector.locate(ctx, reference).await {
                Ok(Some(locator)) => {
                    outcome = Ok(locator);
                    break;
                }
                Ok(None) => continue,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        ctx.memoize_locator(reference, &outcome);
        outcome
    }
}

///
/// Request context
///

/// Per-request state passed to every connector call. Never shared across
/// requests: the memoization below is what guarantees at most one
/// locate/resolve chain per URI within a request.
pub struct RequestContext {
    pub timestamp: DateTime<Utc>,
    /// Per-request credentials, keyed by realm. These take precedence over
    /// the env-sourced public credentials.
    creds: HashMap<String, String>,
    locators: Mutex<HashMap<Reference, Result<Locator>>>,
    resolves: Mutex<HashMap<ResourceUri, Result<ResolveResult>>>,
}

impl RequestContext {
    pub fn new(creds: HashMap<String, String>) -> RequestContext {
        RequestContext {
            timestamp: Utc::now(),
            creds,
            locators: Mutex::new(HashMap::new()),
            resolves: Mutex::new(HashMap::new()),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> RequestContext {
        self.timestamp = timestamp;
        self
    }

    ///
    /// Authorization
    ///

    /// Basic auth header for a realm. Request credentials win; otherwise
    /// the named env vars provide public credentials. The flag reports
    /// whether the public fallback was used.
    pub fn basic_authorization(
        &self,
        realm: &str,
        public_user_var: Option<&str>,
        public_pass_var: Option<&str>,
    ) -> Result<(String, bool)> {
        if let Some(header) = self.creds.get(realm) {
            return Ok((header.clone(), false));
        }
        let user = public_user_var.and_then(|var| std::env::var(var).ok());
        let pass = public_pass_var.and_then(|var| std::env::var(var).ok());
        match (user, pass) {
            (Some(user), Some(pass)) => {
                let encoded = BASE64.encode(format!("{user}:{pass}"));
                Ok((format!("Basic {encoded}"), true))
            }
            _ => Err(KnowledgeError::forbidden(format!(
                "no credentials for realm '{realm}'"
            ))),
        }
    }

    /// Bearer token header for a realm, with the same precedence rules.
    pub fn bearer_authorization(
        &self,
        realm: &str,
        public_token_var: Option<&str>,
    ) -> Result<(String, bool)> {
        if let Some(token) = self.creds.get(realm) {
            return Ok((format!("Bearer {token}"), false));
        }
        match public_token_var.and_then(|var| std::env::var(var).ok()) {
            Some(token) => Ok((format!("Bearer {token}"), true)),
            None => Err(KnowledgeError::forbidden(format!(
                "no credentials for realm '{realm}'"
            ))),
        }
    }

    ///
    /// Memoization
    ///

    pub fn memoized_locator(&self, reference: &Reference) -> Option<Result<Locator>> {
        let locators = self.locators.lock().unwrap_or_else(|e| e.into_inner());
        locators.get(reference).cloned()
    }

    pub fn memoize_locator(&self, reference: &Reference, outcome: &Result<Locator>) {
        let mut locators = self.locators.lock().unwrap_or_else(|e| e.into_inner());
        locators.insert(reference.clone(), outcome.clone());
    }

    /// Memoized resolve outcomes, errors included: a failed resolve is not
    /// retried within the same request.
    pub fn memoized_resolve(&self, uri: &ResourceUri) -> Option<Result<ResolveResult>> {
        let resolves = self.resolves.lock().unwrap_or_else(|e| e.into_inner());
        resolves.get(uri).map(|outcome| match outcome {
            Ok(result) => Ok(ResolveResult {
                metadata: result.metadata.clone(),
                expired: result.expired.clone(),
                should_cache: result.should_cache,
            }),
            Err(err) => Err(err.clone()),
        })
    }

    pub fn memoize_resolve(&self, uri: &ResourceUri, outcome: &Result<ResolveResult>) {
        let mut resolves = self.resolves.lock().unwrap_or_else(|e| e.into_inner());
        let stored = match outcome {
            Ok(result) => Ok(ResolveResult {
                metadata: result.metadata.clone(),
                expired: result.expired.clone(),
                should_cache: result.should_cache,
            }),
            Err(err) => Err(err.clone()),
        };
        resolves.insert(uri.clone(), stored);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext::new(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticConnector {
        realm: &'static str,
        /// The URI realm this connector claims; usually its own.
        claims: &'static str,
        known_path: &'static str,
        fail_not_found: bool,
    }

    #[async_trait]
    impl Connector for StaticConnector {
        fn realm(&self) -> &str {
            self.realm
        }

        async fn locate(
            &self,
            _ctx: &RequestContext,
            reference: &Reference,
        ) -> Result<Option<Locator>> {
            let uri = match reference.as_knowledge() {
                Some(uri) if uri.resource.realm == self.claims => uri.resource_uri(),
                _ => return Ok(None),
            };
            if self.fail_not_found {
                return Err(KnowledgeError::not_found(uri.to_string()));
            }
            if uri.path.join("/") == self.known_path {
                Ok(Some(Locator::new(uri)))
            } else {
                Ok(None)
            }
        }

        async fn resolve(
            &self,
            _ctx: &RequestContext,
            _locator: &Locator,
            _cached: Option<&ResourceView>,
        ) -> Result<ResolveResult> {
            Ok(ResolveResult::default())
        }

        async fn observe(
            &self,
            _ctx: &RequestContext,
            _locator: &Locator,
            _affordance: Affordance,
            _resolved: &MetadataDelta,
        ) -> Result<ObserveResult> {
            Ok(ObserveResult::fragment(Fragment::text("stub")))
        }
    }

    fn registry(connectors: Vec<StaticConnector>) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        for connector in connectors {
            registry.register(Arc::new(connector)).unwrap();
        }
        registry
    }

    #[test]
    fn test_duplicate_realm_rejected() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register(Arc::new(StaticConnector {
                realm: "wiki",
                claims: "wiki",
                known_path: "page",
                fail_not_found: false,
            }))
            .unwrap();
        let err = registry.register(Arc::new(StaticConnector {
            realm: "wiki",
            claims: "wiki",
            known_path: "other",
            fail_not_found: false,
        }));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_locate_tries_connectors_in_order() {
        let registry = registry(vec![
            StaticConnector {
                realm: "alpha",
                claims: "alpha",
                known_path: "page",
                fail_not_found: false,
            },
            StaticConnector {
                realm: "beta",
                claims: "beta",
                known_path: "page",
                fail_not_found: false,
            },
        ]);
        let ctx = RequestContext::default();
        let reference: Reference = "ndk://beta/docs/page".parse().unwrap();
        let locator = registry.locate(&ctx, &reference).await.unwrap();
        assert_eq!(locator.realm, "beta");
    }

    #[tokio::test]
    async fn test_not_found_short_circuits_dispatch() {
        // The second connector would claim the reference, but the first
        // commits to it and fails terminally.
        let registry = registry(vec![
            StaticConnector {
                realm: "gamma",
                claims: "gamma",
                known_path: "page",
                fail_not_found: true,
            },
            StaticConnector {
                realm: "gamma-fallback",
                claims: "gamma",
                known_path: "page",
                fail_not_found: false,
            },
        ]);
        let ctx = RequestContext::default();
        let reference: Reference = "ndk://gamma/docs/page".parse().unwrap();
        let err = registry.locate(&ctx, &reference).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unclaimed_reference_is_not_found() {
        let registry = registry(vec![StaticConnector {
            realm: "alpha",
            claims: "alpha",
            known_path: "page",
            fail_not_found: false,
        }]);
        let ctx = RequestContext::default();
        let reference: Reference = "ndk://other/docs/page".parse().unwrap();
        assert!(registry.locate(&ctx, &reference).await.is_err());
    }

    #[tokio::test]
    async fn test_locate_memoized_per_request() {
        let registry = registry(vec![StaticConnector {
            realm: "alpha",
            claims: "alpha",
            known_path: "page",
            fail_not_found: false,
        }]);
        let ctx = RequestContext::default();
        let reference: Reference = "ndk://alpha/docs/page".parse().unwrap();
        registry.locate(&ctx, &reference).await.unwrap();
        assert!(ctx.memoized_locator(&reference).is_some());

        let fresh = RequestContext::default();
        assert!(fresh.memoized_locator(&reference).is_none());
    }

    #[test]
    fn test_request_creds_take_precedence() {
        let mut creds = HashMap::new();
        creds.insert("wiki".to_string(), "Basic cHJpdmF0ZQ==".to_string());
        let ctx = RequestContext::new(creds);
        let (header, is_public) = ctx.basic_authorization("wiki", None, None).unwrap();
        assert_eq!(header, "Basic cHJpdmF0ZQ==");
        assert!(!is_public);
    }

    #[test]
    fn test_missing_creds_forbidden() {
        let ctx = RequestContext::default();
        let err = ctx
            .bearer_authorization("wiki", Some("KH_TEST_TOKEN_VAR_UNSET"))
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Forbidden);
    }
}
