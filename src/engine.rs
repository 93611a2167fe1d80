//! The resolution engine: load modes, cache decisions, and the batch
//! query loop.
//!
//! A query is a batch of actions. Each action runs through the same spine:
//! locate the resource (skipped when it is already cached), resolve its
//! metadata, decide from the revision tags whether cached content is still
//! trustworthy, observe whatever is stale or requested, ingest, and commit
//! the refresh atomically. Failures stay in-band per URI so one bad action
//! never takes down its siblings.

use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{self, StreamExt};

use crate::action::{
    Action, LoadMode, ObservationEntry, QueryOutcome, Resource, ResourceEntry,
};
use crate::bundle::{Blob, Bundle, Fragment, ObservationContent};
use crate::chunk::{ApproxTokenizer, Tokenizer};
use crate::connector::{ConnectorRegistry, ObserveResult, RequestContext, ResolveResult};
use crate::error::{KnowledgeError, Result};
use crate::ingest::{ingest_observe_result, IngestLimits};
use crate::metadata::{AffordanceInfo, ResourceDelta, ResourceHistory, ResourceView};
use crate::relation::Relation;
use crate::store::{CommitSet, KnowledgeStore};
use crate::uri::{Affordance, KnowledgeUri, Observable, Reference};

/// How many actions of one batch run concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 4;

///
/// Cache decisions
///

/// What `reconcile` decided for one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDecision {
    /// Cached bundles cannot be trusted; everything observed is refetched.
    pub stale: bool,
    /// Concrete observations to record as expired in the history.
    pub expired: Vec<Observable>,
}

/// Decide whether cached content survives a resolution.
///
/// `revision_data` is authoritative when both sides carry it; `updated_at`
/// is the fallback when neither does. A tag present on only one side reads
/// as changed, and a resource with no comparable signal at all is always
/// stale. `revision_meta` never expires content; it only rides along in
/// the metadata merge.
pub fn reconcile(
    load_mode: LoadMode,
    cached: Option<&ResourceView>,
    resolved: &ResolveResult,
) -> CacheDecision {
    let stale = match (load_mode, cached) {
        (LoadMode::None, _) => false,
        (LoadMode::Force, _) => true,
        (LoadMode::Auto, None) => true,
        (LoadMode::Auto, Some(view)) => {
            let before = view.attributes();
            let after = &resolved.metadata;
            match (&before.revision_data, &after.revision_data) {
                (Some(old), Some(new)) => old != new,
                (None, None) => match (&before.updated_at, &after.updated_at) {
                    (Some(old), Some(new)) => old != new,
                    _ => true,
                },
                _ => true,
            }
        }
    };

    let mut expired = resolved.expired.clone();
    if stale {
        if let Some(view) = cached {
            for observed in &view.observed {
                for info in &observed.info_observations {
                    expired.push(info.suffix.clone());
                }
            }
        }
    }
    expired.sort();
    expired.dedup();
    CacheDecision { stale, expired }
}

///
/// Engine
///

pub struct Engine {
    store: KnowledgeStore,
    registry: Arc<ConnectorRegistry>,
    tokenizer: Arc<dyn Tokenizer>,
    limits: IngestLimits,
    batch_size: usize,
}

/// One successfully loaded resource, with the bundles touched on the way.
struct LoadedResource {
    resource: Resource,
    observations: Vec<(KnowledgeUri, ObservationContent)>,
    bundles: Vec<Bundle>,
}

impl Engine {
    pub fn new(store: KnowledgeStore, registry: Arc<ConnectorRegistry>) -> Engine {
        Engine {
            store,
            registry,
            tokenizer: Arc::new(ApproxTokenizer),
            limits: IngestLimits::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_limits(mut self, limits: IngestLimits) -> Engine {
        self.limits = limits;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Engine {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Engine {
        self.tokenizer = tokenizer;
        self
    }

    /// Run a batch of actions with bounded concurrency and fold the
    /// per-action outcomes into one response.
    pub async fn execute_query(
        &self,
        ctx: &RequestContext,
        actions: Vec<Action>,
    ) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();
        let mut results = stream::iter(actions)
            .map(|action| self.run_action(ctx, action))
            .buffered(self.batch_size);
        while let Some(partial) = results.next().await {
            outcome.merge(partial);
        }
        outcome
    }

    async fn run_action(&self, ctx: &RequestContext, action: Action) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();
        match action {
            Action::Load {
                uri,
                load_mode,
                expand_depth,
                observe,
            } => {
                self.run_load(ctx, uri, load_mode, expand_depth, observe, &mut outcome)
                    .await;
            }
            Action::Observe { uri, load_mode } => {
                match self.observe_uri(ctx, &uri, load_mode).await {
                    Ok(entry) => outcome.push_observation(entry),
                    Err(error) => outcome.push_observation(ObservationEntry::Error {
                        uri: uri.to_string(),
                        error,
                    }),
                }
            }
            Action::Attachment {
                uri,
                name,
                mime_type,
                data,
            } => match self.attach(ctx, &uri, &name, mime_type, &data).await {
                Ok(resource) => outcome.push_resource(ResourceEntry::ok(resource)),
                Err(error) => outcome.push_resource(ResourceEntry::error(&uri, error)),
            },
        }
        outcome
    }

    /// Load a resource, then walk its stored relations `expand_depth` hops
    /// out. Expanded neighbors are served from cache only, and neighbors
    /// that are not cached are skipped rather than reported as errors.
    async fn run_load(
        &self,
        ctx: &RequestContext,
        reference: Reference,
        load_mode: LoadMode,
        expand_depth: u32,
        observe: Vec<Affordance>,
        outcome: &mut QueryOutcome,
    ) {
        let mut pending = vec![(reference, load_mode, expand_depth, observe, false)];
        let mut seen: HashSet<String> = HashSet::new();

        while let Some((reference, load_mode, depth, observe, expanded)) = pending.pop() {
            if !seen.insert(reference.to_string()) {
                continue;
            }
            let loaded = match self.load_one(ctx, &reference, load_mode, &observe).await {
                Ok(loaded) => loaded,
                Err(error) => {
                    if !(expanded && error.is_not_found()) {
                        outcome.push_resource(ResourceEntry::error(&reference, error));
                    }
                    continue;
                }
            };
            seen.insert(loaded.resource.uri.to_string());

            if depth > 0 {
                for relation in &loaded.resource.relations {
                    for node in relation.nodes() {
                        if node != loaded.resource.uri {
                            pending.push((
                                node.into(),
                                LoadMode::None,
                                depth - 1,
                                Vec::new(),
                                true,
                            ));
                        }
                    }
                }
            }
            for (uri, content) in loaded.observations {
                outcome.push_observation(ObservationEntry::Ok { uri, content });
            }
            outcome.push_resource(ResourceEntry::ok(loaded.resource));
        }
    }

    /// The load spine: locate, resolve, reconcile, observe what is stale or
    /// requested, and commit the refresh.
    async fn load_one(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        load_mode: LoadMode,
        observe: &[Affordance],
    ) -> Result<LoadedResource> {
        let cached_uri = match reference {
            Reference::Knowledge(uri) => Some(uri.resource_uri()),
            Reference::Web(url) => self.store.read_alias(url).await?,
        };
        let mut history = match &cached_uri {
            Some(uri) => self.store.read_resource(uri).await?,
            None => None,
        };
        let cached_view = match &history {
            Some(history) => Some(history.merged()?),
            None => None,
        };

        if load_mode == LoadMode::None {
            let view = cached_view.ok_or_else(|| {
                KnowledgeError::not_found(format!("'{reference}' is not cached"))
            })?;
            let resource = self.project(&view).await?;
            return Ok(LoadedResource {
                resource,
                observations: Vec::new(),
                bundles: Vec::new(),
            });
        }

        let locator = match &cached_view {
            Some(view) => view.locator.clone(),
            None => self.registry.locate(ctx, reference).await?,
        };
        let uri = locator.uri.clone();
        let connector = self.registry.require(&locator.realm)?;

        let resolved = match ctx.memoized_resolve(&uri) {
            Some(memoized) => memoized?,
            None => {
                let outcome = connector.resolve(ctx, &locator, cached_view.as_ref()).await;
                ctx.memoize_resolve(&uri, &outcome);
                outcome?
            }
        };

        let decision = reconcile(load_mode, cached_view.as_ref(), &resolved);
        tracing::debug!(
            uri = %uri,
            stale = decision.stale,
            expired = decision.expired.len(),
            "resolved"
        );

        let mut delta = ResourceDelta::at(ctx.timestamp);
        if cached_view.is_none() {
            delta.locator = Some(locator.clone());
        }
        delta.metadata = resolved.metadata.clone();
        delta.expired = decision.expired.clone();

        let resolved_meta = match &cached_view {
            Some(view) => view.metadata.with_update(&resolved.metadata),
            None => resolved.metadata.clone(),
        };

        // Requested affordances, plus the advertised body and collection
        // which a plain load keeps warm.
        let advertised: Vec<Affordance> = resolved_meta
            .affordances
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|info| info.suffix)
            .collect();
        let mut candidates = observe.to_vec();
        for affordance in [Affordance::Body, Affordance::Collection] {
            if advertised.contains(&affordance) && !candidates.contains(&affordance) {
                candidates.push(affordance);
            }
        }

        let mut commit = CommitSet::new();
        let mut observations = Vec::new();
        let mut bundles = Vec::new();
        for affordance in candidates {
            let cached_bundle = self.store.read_bundle(&uri, affordance).await?;
            let refetch = decision.stale
                || cached_bundle.is_none()
                || decision
                    .expired
                    .iter()
                    .any(|observable| observable.affordance() == affordance);
            let bundle = if refetch {
                let result = connector
                    .observe(ctx, &locator, affordance, &resolved_meta)
                    .await?;
                let ingested = ingest_observe_result(
                    &uri,
                    affordance,
                    result,
                    self.tokenizer.as_ref(),
                    self.limits,
                )?;
                tracing::debug!(uri = %uri, affordance = affordance.kind(), "observed");
                delta.metadata = delta.metadata.with_update(&ingested.metadata);
                delta.observed.push(ingested.observed);
                if ingested.should_cache && resolved.should_cache {
                    commit.put_bundle(&ingested.bundle)?;
                }
                ingested.bundle
            } else {
                match cached_bundle {
                    Some(bundle) => bundle,
                    None => continue,
                }
            };
            observations.push((uri.child_affordance(affordance), bundle.read(None)?));
            bundles.push(bundle);
        }

        let old_aliases = cached_view
            .as_ref()
            .map(ResourceView::aliases)
            .unwrap_or_default();
        let old_relations = cached_view
            .as_ref()
            .map(ResourceView::relations)
            .unwrap_or_default();

        let history = match history.take() {
            Some(mut existing) => {
                existing.update(delta)?;
                existing
            }
            None => ResourceHistory::initialize(delta)?,
        };
        let view = history.merged()?;

        // The alias index covers the advertised aliases plus, for a web
        // reference, the URL that was just located, so the next load skips
        // dispatch entirely.
        let mut aliases = view.aliases();
        if let Reference::Web(url) = reference {
            let cleaned = url.clean();
            if !aliases.contains(&cleaned) {
                aliases.push(cleaned);
            }
        }
        for alias in &aliases {
            if !old_aliases.contains(alias) {
                commit.put_alias(alias, &uri)?;
            }
        }
        for alias in &old_aliases {
            if !aliases.contains(alias) {
                commit.delete_alias(alias);
            }
        }

        let relations = view.relations();
        for relation in &relations {
            if !contains_relation(&old_relations, relation) {
                commit.put_relation(relation)?;
            }
        }
        for relation in &old_relations {
            if !contains_relation(&relations, relation) {
                commit.delete_relation(relation);
            }
        }

        if resolved.should_cache {
            commit.set_history(&uri, &history)?;
            self.store.commit(commit).await?;
        } else {
            // Uncacheable realms keep only their aliases.
            let mut aliases_only = CommitSet::new();
            for alias in &aliases {
                aliases_only.put_alias(alias, &uri)?;
            }
            self.store.commit(aliases_only).await?;
        }

        let resource = self.project(&view).await?;
        Ok(LoadedResource {
            resource,
            observations,
            bundles,
        })
    }

    /// Read one observation, refreshing the owning affordance first unless
    /// the load mode forbids it.
    async fn observe_uri(
        &self,
        ctx: &RequestContext,
        uri: &KnowledgeUri,
        load_mode: LoadMode,
    ) -> Result<ObservationEntry> {
        let affordance = uri.affordance().ok_or_else(|| {
            KnowledgeError::bad_request(format!("'{uri}' does not name an observation"))
        })?;
        let resource = uri.resource_uri();

        let bundle = if load_mode == LoadMode::None {
            self.store
                .read_bundle(&resource, affordance)
                .await?
                .ok_or_else(|| KnowledgeError::not_found(format!("'{uri}' is not cached")))?
        } else {
            let reference = Reference::Knowledge(resource.clone().into());
            let loaded = self
                .load_one(ctx, &reference, load_mode, &[affordance])
                .await?;
            loaded
                .bundles
                .into_iter()
                .find(|bundle| bundle.affordance() == affordance)
                .ok_or_else(|| {
                    KnowledgeError::not_found(format!(
                        "'{resource}' has no {} content",
                        affordance.as_suffix()
                    ))
                })?
        };

        let content = bundle.read(uri.observable())?;
        Ok(ObservationEntry::Ok {
            uri: uri.clone(),
            content,
        })
    }

    /// Store caller-provided content as the body of a resource whose
    /// connector cannot read content itself.
    async fn attach(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        name: &str,
        mime_type: Option<String>,
        data: &str,
    ) -> Result<Resource> {
        let bytes = BASE64.decode(data).map_err(|err| {
            KnowledgeError::bad_request(format!("attachment data is not base64: {err}"))
        })?;
        let fragment = match String::from_utf8(bytes) {
            Ok(text) if textual(mime_type.as_deref()) => Fragment::text(text),
            Ok(text) => binary_fragment(name, mime_type.clone(), text.into_bytes()),
            Err(err) => binary_fragment(name, mime_type.clone(), err.into_bytes()),
        };

        let loaded = self.load_one(ctx, reference, LoadMode::Auto, &[]).await?;
        let uri = loaded.resource.uri.clone();
        let mut history = self.store.read_resource(&uri).await?.ok_or_else(|| {
            KnowledgeError::bad_request(format!(
                "'{uri}' is not cacheable; attachments need a cached resource"
            ))
        })?;

        let ingested = ingest_observe_result(
            &uri,
            Affordance::Body,
            ObserveResult::fragment(fragment).cached(),
            self.tokenizer.as_ref(),
            self.limits,
        )?;

        let mut delta = ResourceDelta::at(ctx.timestamp);
        delta.observed.push(ingested.observed);
        let mut affordances = loaded.resource.affordances.clone();
        if !affordances.iter().any(|info| info.suffix == Affordance::Body) {
            affordances.push(AffordanceInfo::new(Affordance::Body));
            delta.metadata.affordances = Some(affordances);
        }

        let mut commit = CommitSet::new();
        commit.put_bundle(&ingested.bundle)?;
        history.update(delta)?;
        commit.set_history(&uri, &history)?;
        self.store.commit(commit).await?;

        let view = history.merged()?;
        self.project(&view).await
    }

    /// Project a merged view into the response shape, folding in relations
    /// recorded from the other side.
    async fn project(&self, view: &ResourceView) -> Result<Resource> {
        let uri = view.locator.uri.clone();
        let mut relations = view.relations();
        for relation in self.store.relations_of(&uri).await? {
            if !contains_relation(&relations, &relation) {
                relations.push(relation);
            }
        }
        relations.sort_by_key(Relation::unique_id);
        Ok(Resource {
            uri,
            attributes: view.attributes(),
            aliases: view.aliases(),
            affordances: view.affordances(),
            labels: view.labels.clone(),
            relations,
        })
    }
}

fn contains_relation(relations: &[Relation], relation: &Relation) -> bool {
    relations
        .iter()
        .any(|existing| existing.unique_id() == relation.unique_id())
}

fn textual(mime_type: Option<&str>) -> bool {
    match mime_type {
        None => true,
        Some(mime) => {
            mime.starts_with("text/")
                || mime == "application/json"
                || mime == "application/xml"
                || mime.ends_with("+json")
                || mime.ends_with("+xml")
        }
    }
}

fn binary_fragment(name: &str, mime_type: Option<String>, data: Vec<u8>) -> Fragment {
    let mut fragment = Fragment::text(format!("![{name}]({name})"));
    fragment.blobs.insert(name.to_string(), Blob { mime_type, data });
    fragment
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::connector::{Connector, ObserveOptions};
    use crate::metadata::{Locator, MetadataDelta};
    use crate::store::{bundle_key, resource_key, MemoryStore, ObjectStore};
    use crate::uri::ResourceUri;

    /// A connector whose revision and body can be flipped between loads.
    struct ScriptedConnector {
        realm: String,
        revision: Mutex<String>,
        body: Mutex<String>,
        resolves: AtomicUsize,
        observes: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(realm: &str, revision: &str, body: &str) -> ScriptedConnector {
            ScriptedConnector {
                realm: realm.to_string(),
                revision: Mutex::new(revision.to_string()),
                body: Mutex::new(body.to_string()),
                resolves: AtomicUsize::new(0),
                observes: AtomicUsize::new(0),
            }
        }

        fn set_revision(&self, revision: &str) {
            *self.revision.lock().unwrap() = revision.to_string();
        }

        fn set_body(&self, body: &str) {
            *self.body.lock().unwrap() = body.to_string();
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn realm(&self) -> &str {
            &self.realm
        }

        async fn locate(
            &self,
            _ctx: &RequestContext,
            reference: &Reference,
        ) -> Result<Option<Locator>> {
            let Some(uri) = reference.as_knowledge() else {
                return Ok(None);
            };
            if uri.resource_uri().realm != self.realm {
                return Ok(None);
            }
            Ok(Some(Locator::new(uri.resource_uri())))
        }

        async fn resolve(
            &self,
            _ctx: &RequestContext,
            locator: &Locator,
            _cached: Option<&ResourceView>,
        ) -> Result<ResolveResult> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            let metadata = MetadataDelta {
                name: Some(locator.uri.path.join("/")),
                revision_data: Some(self.revision.lock().unwrap().clone()),
                affordances: Some(vec![AffordanceInfo::new(Affordance::Body)]),
                ..MetadataDelta::default()
            };
            Ok(ResolveResult {
                metadata,
                expired: Vec::new(),
                should_cache: true,
            })
        }

        async fn observe(
            &self,
            _ctx: &RequestContext,
            _locator: &Locator,
            affordance: Affordance,
            _resolved: &MetadataDelta,
        ) -> Result<ObserveResult> {
            self.observes.fetch_add(1, Ordering::SeqCst);
            assert_eq!(affordance, Affordance::Body);
            let mut result =
                ObserveResult::fragment(Fragment::text(self.body.lock().unwrap().clone()))
                    .cached();
            result.options = ObserveOptions {
                relations_link: true,
                ..ObserveOptions::default()
            };
            Ok(result)
        }
    }

    struct Fixture {
        objects: Arc<MemoryStore>,
        connector: Arc<ScriptedConnector>,
        engine: Engine,
    }

    fn fixture(revision: &str, body: &str) -> Fixture {
        let objects = Arc::new(MemoryStore::new());
        let connector = Arc::new(ScriptedConnector::new("wiki", revision, body));
        let mut registry = ConnectorRegistry::new();
        registry.register(connector.clone()).unwrap();
        let engine = Engine::new(
            KnowledgeStore::new(objects.clone()),
            Arc::new(registry),
        );
        Fixture {
            objects,
            connector,
            engine,
        }
    }

    fn load(uri: &str) -> Action {
        Action::load(uri.parse().unwrap())
    }

    #[tokio::test]
    async fn test_first_load_observes_and_commits() {
        let fx = fixture("r1", "Hello world.");
        let ctx = RequestContext::default();
        let outcome = fx
            .engine
            .execute_query(&ctx, vec![load("ndk://wiki/eng/page")])
            .await;

        assert_eq!(outcome.resources.len(), 1);
        match &outcome.resources[0] {
            ResourceEntry::Ok { resource } => {
                assert_eq!(resource.uri.to_string(), "ndk://wiki/eng/page");
                assert_eq!(resource.attributes.revision_data.as_deref(), Some("r1"));
            }
            other => panic!("expected loaded resource, got {other:?}"),
        }
        assert_eq!(outcome.observations.len(), 1);
        match &outcome.observations[0] {
            ObservationEntry::Ok { uri, content } => {
                assert_eq!(uri.to_string(), "ndk://wiki/eng/page/$body");
                assert_eq!(
                    content,
                    &ObservationContent::Text {
                        text: "Hello world.".to_string()
                    }
                );
            }
            other => panic!("expected observation, got {other:?}"),
        }

        let uri: ResourceUri = "ndk://wiki/eng/page".parse().unwrap();
        assert!(fx.objects.get(&resource_key(&uri)).await.unwrap().is_some());
        assert!(fx
            .objects
            .get(&bundle_key(&uri, Affordance::Body))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_auto_trusts_unchanged_revision() {
        let fx = fixture("r1", "Hello world.");
        let first = RequestContext::default();
        fx.engine
            .execute_query(&first, vec![load("ndk://wiki/eng/page")])
            .await;
        assert_eq!(fx.connector.observes.load(Ordering::SeqCst), 1);

        let second = RequestContext::default();
        let outcome = fx
            .engine
            .execute_query(&second, vec![load("ndk://wiki/eng/page")])
            .await;
        // Second load resolves again but serves the body from cache.
        assert_eq!(fx.connector.resolves.load(Ordering::SeqCst), 2);
        assert_eq!(fx.connector.observes.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_refetches_on_changed_revision() {
        let fx = fixture("r1", "Hello world.");
        fx.engine
            .execute_query(&RequestContext::default(), vec![load("ndk://wiki/eng/page")])
            .await;

        fx.connector.set_revision("r2");
        fx.connector.set_body("Changed.");
        let outcome = fx
            .engine
            .execute_query(&RequestContext::default(), vec![load("ndk://wiki/eng/page")])
            .await;

        assert_eq!(fx.connector.observes.load(Ordering::SeqCst), 2);
        match &outcome.observations[0] {
            ObservationEntry::Ok { content, .. } => assert_eq!(
                content,
                &ObservationContent::Text {
                    text: "Changed.".to_string()
                }
            ),
            other => panic!("expected observation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_force_always_observes() {
        let fx = fixture("r1", "Hello world.");
        fx.engine
            .execute_query(&RequestContext::default(), vec![load("ndk://wiki/eng/page")])
            .await;

        let action = Action::Load {
            uri: "ndk://wiki/eng/page".parse().unwrap(),
            load_mode: LoadMode::Force,
            expand_depth: 0,
            observe: Vec::new(),
        };
        fx.engine
            .execute_query(&RequestContext::default(), vec![action])
            .await;
        assert_eq!(fx.connector.observes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_none_mode_without_cache_is_an_error() {
        let fx = fixture("r1", "Hello world.");
        let action = Action::Load {
            uri: "ndk://wiki/eng/page".parse().unwrap(),
            load_mode: LoadMode::None,
            expand_depth: 0,
            observe: Vec::new(),
        };
        let outcome = fx
            .engine
            .execute_query(&RequestContext::default(), vec![action])
            .await;
        assert_eq!(fx.connector.resolves.load(Ordering::SeqCst), 0);
        match &outcome.resources[0] {
            ResourceEntry::Error { error, .. } => assert!(error.is_not_found()),
            other => panic!("expected error entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_observe_action_reads_a_chunk() {
        let fx = fixture("r1", "Hello world.");
        let action = Action::Observe {
            uri: "ndk://wiki/eng/page/$chunk/00".parse().unwrap(),
            load_mode: LoadMode::Auto,
        };
        let outcome = fx
            .engine
            .execute_query(&RequestContext::default(), vec![action])
            .await;
        match &outcome.observations[0] {
            ObservationEntry::Ok { uri, content } => {
                assert_eq!(uri.to_string(), "ndk://wiki/eng/page/$chunk/00");
                assert_eq!(
                    content,
                    &ObservationContent::Text {
                        text: "Hello world.".to_string()
                    }
                );
            }
            other => panic!("expected observation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_link_relations_expand_from_cache() {
        let fx = fixture("r1", "See ndk://wiki/eng/other for details.");
        fx.engine
            .execute_query(&RequestContext::default(), vec![load("ndk://wiki/eng/page")])
            .await;
        fx.engine
            .execute_query(&RequestContext::default(), vec![load("ndk://wiki/eng/other")])
            .await;

        let action = Action::Load {
            uri: "ndk://wiki/eng/page".parse().unwrap(),
            load_mode: LoadMode::Auto,
            expand_depth: 1,
            observe: Vec::new(),
        };
        let outcome = fx
            .engine
            .execute_query(&RequestContext::default(), vec![action])
            .await;
        let uris: Vec<String> = outcome
            .resources
            .iter()
            .map(ResourceEntry::uri)
            .collect();
        assert!(uris.contains(&"ndk://wiki/eng/page".to_string()));
        assert!(uris.contains(&"ndk://wiki/eng/other".to_string()));
    }

    #[test]
    fn test_reconcile_precedence() {
        let cached_none: Option<&ResourceView> = None;
        let resolved = ResolveResult {
            metadata: MetadataDelta {
                revision_data: Some("r1".to_string()),
                ..MetadataDelta::default()
            },
            expired: Vec::new(),
            should_cache: true,
        };
        assert!(reconcile(LoadMode::Auto, cached_none, &resolved).stale);
        assert!(!reconcile(LoadMode::None, cached_none, &resolved).stale);
        assert!(reconcile(LoadMode::Force, cached_none, &resolved).stale);
    }
}
