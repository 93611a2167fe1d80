//! Resource metadata, deltas, and the append-only resource history.
//!
//! Everything a connector learns about a resource lands in the history as a
//! [`ResourceDelta`]; the history is only ever appended to, and reads fold
//! it into an immutable [`ResourceView`]. A delta that would not change the
//! merged view is discarded before the append, so no-op refreshes leave no
//! trace.
//!
//! Deltas are sparse: `None` means "unchanged", never "cleared". Connectors
//! that need to drop a value write an explicit empty value instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, Result};
use crate::relation::Relation;
use crate::uri::{Affordance, Observable, ResourceUri, WebUrl};

///
/// Locator
///

/// The connector-private address of a resource. The canonical resource URI
/// is derived from it deterministically and stored alongside the payload,
/// which the owning connector alone interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub realm: String,
    pub uri: ResourceUri,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub citation_url: Option<WebUrl>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub payload: serde_json::Value,
}

impl Locator {
    pub fn new(uri: ResourceUri) -> Locator {
        Locator {
            realm: uri.realm.clone(),
            uri,
            citation_url: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Locator {
        self.payload = payload;
        self
    }

    pub fn with_citation(mut self, url: WebUrl) -> Locator {
        self.citation_url = Some(url);
        self
    }

    pub fn resource_uri(&self) -> &ResourceUri {
        &self.uri
    }
}

///
/// Info types
///

/// One table-of-contents entry within an affordance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub indexes: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heading: Option<String>,
}

/// Metadata of one observable within an affordance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationInfo {
    pub suffix: Observable,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

/// Metadata of one affordance of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffordanceInfo {
    pub suffix: Affordance,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub observations: Vec<ObservationInfo>,
}

impl AffordanceInfo {
    pub fn new(suffix: Affordance) -> AffordanceInfo {
        AffordanceInfo {
            suffix,
            mime_type: None,
            description: None,
            sections: Vec::new(),
            observations: Vec::new(),
        }
    }
}

/// A derived annotation on an observable. Labels are additive: content
/// resolution never requires them, and refreshes only overwrite by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub target: Observable,
    pub value: serde_json::Value,
}

impl Label {
    pub fn sort_key(&self) -> (String, String) {
        (self.name.clone(), self.target.as_suffix())
    }
}

/// Label names: lowercase words joined by single underscores.
pub fn valid_label_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('_').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

///
/// Attributes & metadata delta
///

/// The merged, client-facing attributes of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttrs {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub citation_url: Option<WebUrl>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision_meta: Option<String>,
}

fn changed<T: Clone + PartialEq>(new: &Option<T>, old: &Option<T>) -> Option<T> {
    match new {
        Some(value) if old.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

fn prefer<T: Clone>(delta: &Option<T>, base: &Option<T>) -> Option<T> {
    delta.clone().or_else(|| base.clone())
}

/// A sparse update to resource attributes, aliases, affordances, and
/// connector-level relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDelta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub citation_url: Option<WebUrl>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision_meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aliases: Option<Vec<WebUrl>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub affordances: Option<Vec<AffordanceInfo>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relations: Option<Vec<Relation>>,
}

impl MetadataDelta {
    pub fn is_empty(&self) -> bool {
        *self == MetadataDelta::default()
    }

    /// Keep only the fields that actually differ from `before`.
    pub fn diff(&self, before: &MetadataDelta) -> MetadataDelta {
        MetadataDelta {
            name: changed(&self.name, &before.name),
            mime_type: changed(&self.mime_type, &before.mime_type),
            description: changed(&self.description, &before.description),
            citation_url: changed(&self.citation_url, &before.citation_url),
            created_at: changed(&self.created_at, &before.created_at),
            updated_at: changed(&self.updated_at, &before.updated_at),
            revision_data: changed(&self.revision_data, &before.revision_data),
            revision_meta: changed(&self.revision_meta, &before.revision_meta),
            aliases: changed(&self.aliases, &before.aliases),
            affordances: changed(&self.affordances, &before.affordances),
            relations: changed(&self.relations, &before.relations),
        }
    }

    /// Overlay `delta` on top of `self`: present fields win.
    pub fn with_update(&self, delta: &MetadataDelta) -> MetadataDelta {
        MetadataDelta {
            name: prefer(&delta.name, &self.name),
            mime_type: prefer(&delta.mime_type, &self.mime_type),
            description: prefer(&delta.description, &self.description),
            citation_url: prefer(&delta.citation_url, &self.citation_url),
            created_at: prefer(&delta.created_at, &self.created_at),
            updated_at: prefer(&delta.updated_at, &self.updated_at),
            revision_data: prefer(&delta.revision_data, &self.revision_data),
            revision_meta: prefer(&delta.revision_meta, &self.revision_meta),
            aliases: prefer(&delta.aliases, &self.aliases),
            affordances: prefer(&delta.affordances, &self.affordances),
            relations: prefer(&delta.relations, &self.relations),
        }
    }
}

///
/// Observed delta
///

/// A sparse update to one observed affordance: its table of contents, the
/// observables it exposes, and the relations extracted from its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedDelta {
    pub suffix: Affordance,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub info_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub info_sections: Option<Vec<Section>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub info_observations: Option<Vec<ObservationInfo>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relations: Option<Vec<Relation>>,
}

impl ObservedDelta {
    pub fn new(suffix: Affordance) -> ObservedDelta {
        ObservedDelta {
            suffix,
            info_mime_type: None,
            info_sections: None,
            info_observations: None,
            relations: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.info_mime_type.is_none()
            && self.info_sections.is_none()
            && self.info_observations.is_none()
            && self.relations.is_none()
    }

    pub fn diff(&self, before: &ObservedDelta) -> ObservedDelta {
        debug_assert_eq!(self.suffix, before.suffix);
        ObservedDelta {
            suffix: self.suffix,
            info_mime_type: changed(&self.info_mime_type, &before.info_mime_type),
            info_sections: changed(&self.info_sections, &before.info_sections),
            info_observations: changed(&self.info_observations, &before.info_observations),
            relations: changed(&self.relations, &before.relations),
        }
    }
}

///
/// Resource delta & history
///

/// One refresh of a resource, appended to its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub refreshed_at: DateTime<Utc>,
    /// Normally set only on the first resolution; later changes are allowed
    /// and recorded when a resource moves without changing its URI.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub locator: Option<Locator>,
    /// Root observations invalidated by `resolve` and not yet re-observed.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub expired: Vec<Observable>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub labels: Vec<Label>,
    #[serde(skip_serializing_if = "MetadataDelta::is_empty", default)]
    pub metadata: MetadataDelta,
    /// Affordances refreshed by `observe` in this pass.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub observed: Vec<ObservedDelta>,
    /// Set when the body structure changed enough that old labels no longer
    /// point at meaningful targets.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub reset_labels: bool,
}

impl ResourceDelta {
    pub fn at(refreshed_at: DateTime<Utc>) -> ResourceDelta {
        ResourceDelta {
            refreshed_at,
            locator: None,
            expired: Vec::new(),
            labels: Vec::new(),
            metadata: MetadataDelta::default(),
            observed: Vec::new(),
            reset_labels: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locator.is_none()
            && self.expired.is_empty()
            && self.labels.is_empty()
            && self.metadata.is_empty()
            && self.observed.iter().all(ObservedDelta::is_empty)
    }
}

/// The full cached record of a resource. Append-only; readers fold it into
/// a [`ResourceView`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceHistory {
    pub history: Vec<ResourceDelta>,
}

impl ResourceHistory {
    /// Start a new history. The first delta must carry the locator.
    pub fn initialize(delta: ResourceDelta) -> Result<ResourceHistory> {
        if delta.locator.is_none() {
            return Err(KnowledgeError::internal(
                "missing locator in resource initialization",
            ));
        }
        Ok(ResourceHistory {
            history: vec![delta],
        })
    }

    /// Reduce `delta` to what actually changes the merged view, and append
    /// it if anything remains. Returns whether an append happened.
    pub fn update(&mut self, delta: ResourceDelta) -> Result<bool> {
        if self.history.is_empty() {
            if delta.locator.is_none() {
                return Err(KnowledgeError::internal(
                    "missing locator in resource initialization",
                ));
            }
            self.history.push(delta);
            return Ok(true);
        }

        let delta = self.diff(delta)?;
        if delta.is_empty() {
            Ok(false)
        } else {
            self.history.push(delta);
            Ok(true)
        }
    }

    fn diff(&self, delta: ResourceDelta) -> Result<ResourceDelta> {
        let merged = self.merged()?;

        let locator = delta
            .locator
            .filter(|locator| *locator != merged.locator);
        let metadata = delta.metadata.diff(&merged.metadata);

        let mut labels: Vec<Label> = delta
            .labels
            .into_iter()
            .filter(|label| {
                merged.get_label(&label.name, &label.target) != Some(&label.value)
            })
            .collect();
        labels.sort_by_key(Label::sort_key);

        let mut expired: Vec<Observable> = merged.expired.clone();
        for observable in delta.expired {
            if !expired.contains(&observable) {
                expired.push(observable);
            }
        }

        let mut observed: Vec<ObservedDelta> = Vec::new();
        for obs_delta in delta.observed {
            expired.retain(|observable| observable.affordance() != obs_delta.suffix);
            let reduced = match merged.observed(obs_delta.suffix) {
                Some(existing) => obs_delta.diff(&existing.as_delta()),
                None => obs_delta,
            };
            if !reduced.is_empty() {
                observed.push(reduced);
            }
        }
        observed.sort_by_key(|obs| obs.suffix);
        expired.sort();

        Ok(ResourceDelta {
            refreshed_at: delta.refreshed_at,
            locator,
            expired,
            labels,
            metadata,
            observed,
            reset_labels: delta.reset_labels,
        })
    }

    pub fn merged(&self) -> Result<ResourceView> {
        let first = self
            .history
            .first()
            .ok_or_else(|| KnowledgeError::corrupt("no history in cached resource"))?;
        let locator = first
            .locator
            .clone()
            .ok_or_else(|| KnowledgeError::corrupt("no locator in cached resource"))?;

        let mut view = ResourceView {
            locator,
            refreshed_at: first.refreshed_at,
            expired: Vec::new(),
            labels: Vec::new(),
            metadata: MetadataDelta::default(),
            observed: Vec::new(),
        };
        for delta in &self.history {
            view = view.with_update(delta);
        }
        Ok(view)
    }
}

///
/// Merged views
///

/// The folded state of one observed affordance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedView {
    pub suffix: Affordance,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub info_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub info_sections: Vec<Section>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub info_observations: Vec<ObservationInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relations: Vec<Relation>,
}

impl ObservedView {
    fn from_delta(delta: &ObservedDelta) -> ObservedView {
        ObservedView {
            suffix: delta.suffix,
            info_mime_type: delta.info_mime_type.clone(),
            info_sections: delta.info_sections.clone().unwrap_or_default(),
            info_observations: delta.info_observations.clone().unwrap_or_default(),
            relations: delta.relations.clone().unwrap_or_default(),
        }
    }

    fn with_update(&self, delta: &ObservedDelta) -> ObservedView {
        ObservedView {
            suffix: delta.suffix,
            info_mime_type: prefer(&delta.info_mime_type, &self.info_mime_type),
            info_sections: delta
                .info_sections
                .clone()
                .unwrap_or_else(|| self.info_sections.clone()),
            info_observations: delta
                .info_observations
                .clone()
                .unwrap_or_else(|| self.info_observations.clone()),
            relations: delta
                .relations
                .clone()
                .unwrap_or_else(|| self.relations.clone()),
        }
    }

    fn as_delta(&self) -> ObservedDelta {
        ObservedDelta {
            suffix: self.suffix,
            info_mime_type: self.info_mime_type.clone(),
            info_sections: Some(self.info_sections.clone()),
            info_observations: Some(self.info_observations.clone()),
            relations: Some(self.relations.clone()),
        }
    }
}

/// The immutable merged snapshot of a resource history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceView {
    pub locator: Locator,
    pub refreshed_at: DateTime<Utc>,
    pub expired: Vec<Observable>,
    pub labels: Vec<Label>,
    pub metadata: MetadataDelta,
    pub observed: Vec<ObservedView>,
}

impl ResourceView {
    fn with_update(&self, delta: &ResourceDelta) -> ResourceView {
        let mut expired = self.expired.clone();
        for observable in &delta.expired {
            if !expired.contains(observable) {
                expired.push(observable.clone());
            }
        }

        let mut labels: Vec<Label> = if delta.reset_labels {
            Vec::new()
        } else {
            self.labels.clone()
        };
        for new_label in &delta.labels {
            labels.retain(|label| {
                !(label.name == new_label.name && label.target == new_label.target)
            });
            labels.push(new_label.clone());
        }
        labels.sort_by_key(Label::sort_key);

        let mut observed = self.observed.clone();
        for obs_delta in &delta.observed {
            expired.retain(|observable| observable.affordance() != obs_delta.suffix);
            match observed.iter_mut().find(|obs| obs.suffix == obs_delta.suffix) {
                Some(existing) => *existing = existing.with_update(obs_delta),
                None => observed.push(ObservedView::from_delta(obs_delta)),
            }
        }
        observed.sort_by_key(|obs| obs.suffix);
        expired.sort();

        ResourceView {
            locator: delta.locator.clone().unwrap_or_else(|| self.locator.clone()),
            refreshed_at: delta.refreshed_at,
            expired,
            labels,
            metadata: self.metadata.with_update(&delta.metadata),
            observed,
        }
    }

    pub fn observed(&self, affordance: Affordance) -> Option<&ObservedView> {
        self.observed.iter().find(|obs| obs.suffix == affordance)
    }

    pub fn get_label(&self, name: &str, target: &Observable) -> Option<&serde_json::Value> {
        self.labels
            .iter()
            .find(|label| label.name == name && label.target == *target)
            .map(|label| &label.value)
    }

    /// Client-facing attributes, with fallbacks from the locator.
    pub fn attributes(&self) -> ResourceAttrs {
        ResourceAttrs {
            name: self
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| self.locator.uri.guess_filename().to_string()),
            mime_type: self.metadata.mime_type.clone(),
            description: self.metadata.description.clone(),
            citation_url: self
                .metadata
                .citation_url
                .clone()
                .or_else(|| self.locator.citation_url.clone()),
            created_at: self.metadata.created_at,
            updated_at: self.metadata.updated_at,
            revision_data: self.metadata.revision_data.clone(),
            revision_meta: self.metadata.revision_meta.clone(),
        }
    }

    pub fn aliases(&self) -> Vec<WebUrl> {
        self.metadata.aliases.clone().unwrap_or_default()
    }

    /// Connector-declared affordances, overlaid with observed information.
    pub fn affordances(&self) -> Vec<AffordanceInfo> {
        let mut affordances: Vec<AffordanceInfo> =
            self.metadata.affordances.clone().unwrap_or_default();

        for observed in &self.observed {
            let existing = affordances
                .iter()
                .position(|info| info.suffix == observed.suffix);
            let base = match existing {
                Some(index) => affordances.remove(index),
                None => AffordanceInfo::new(observed.suffix),
            };
            affordances.push(AffordanceInfo {
                suffix: observed.suffix,
                mime_type: observed.info_mime_type.clone().or(base.mime_type),
                description: base.description,
                sections: if observed.info_sections.is_empty() {
                    base.sections
                } else {
                    observed.info_sections.clone()
                },
                observations: if observed.info_observations.is_empty() {
                    base.observations
                } else {
                    observed.info_observations.clone()
                },
            });
        }

        affordances.sort_by_key(|info| info.suffix);
        affordances
    }

    /// Every relation known for this resource, deduplicated by id.
    pub fn relations(&self) -> Vec<Relation> {
        let mut relations = self.metadata.relations.clone().unwrap_or_default();
        for observed in &self.observed {
            for relation in &observed.relations {
                if !relations.iter().any(|r| r.unique_id() == relation.unique_id()) {
                    relations.push(relation.clone());
                }
            }
        }
        relations.sort_by_key(|r| r.unique_id());
        relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn locator() -> Locator {
        Locator::new("ndk://wiki/eng/page".parse().unwrap())
    }

    fn initial_delta() -> ResourceDelta {
        let mut delta = ResourceDelta::at(now());
        delta.locator = Some(locator());
        delta.metadata.name = Some("Page".to_string());
        delta.metadata.revision_data = Some("r1".to_string());
        delta
    }

    #[test]
    fn test_history_requires_locator_first() {
        let mut history = ResourceHistory::default();
        let err = history.update(ResourceDelta::at(now()));
        assert!(err.is_err());
        assert!(history.update(initial_delta()).unwrap());
    }

    #[test]
    fn test_noop_delta_not_appended() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let mut repeat = ResourceDelta::at(now());
        repeat.metadata.name = Some("Page".to_string());
        assert!(!history.update(repeat).unwrap());
        assert_eq!(history.history.len(), 1);
    }

    #[test]
    fn test_changed_field_appended_and_merged() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let mut change = ResourceDelta::at(now());
        change.metadata.revision_data = Some("r2".to_string());
        assert!(history.update(change).unwrap());
        assert_eq!(history.history.len(), 2);

        let view = history.merged().unwrap();
        assert_eq!(view.metadata.name.as_deref(), Some("Page"));
        assert_eq!(view.metadata.revision_data.as_deref(), Some("r2"));
    }

    #[test]
    fn test_none_means_unchanged() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let mut change = ResourceDelta::at(now());
        change.metadata.description = Some("About the page".to_string());
        history.update(change).unwrap();

        let view = history.merged().unwrap();
        assert_eq!(view.metadata.name.as_deref(), Some("Page"));
        assert_eq!(view.metadata.description.as_deref(), Some("About the page"));
    }

    #[test]
    fn test_observation_clears_expiry() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();

        let mut expire = ResourceDelta::at(now());
        expire.expired = vec![Observable::Chunk(vec![0])];
        history.update(expire).unwrap();
        assert_eq!(history.merged().unwrap().expired.len(), 1);

        let mut observe = ResourceDelta::at(now());
        observe.observed = vec![ObservedDelta {
            suffix: Affordance::Body,
            info_mime_type: Some("text/markdown".to_string()),
            info_sections: None,
            info_observations: None,
            relations: None,
        }];
        history.update(observe).unwrap();

        let view = history.merged().unwrap();
        assert!(view.expired.is_empty());
        assert_eq!(
            view.observed(Affordance::Body).unwrap().info_mime_type.as_deref(),
            Some("text/markdown")
        );
    }

    #[test]
    fn test_labels_latest_value_wins() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let target = Observable::Chunk(vec![0]);

        let mut first = ResourceDelta::at(now());
        first.labels = vec![Label {
            name: "summary".to_string(),
            target: target.clone(),
            value: serde_json::json!("old"),
        }];
        history.update(first).unwrap();

        let mut second = ResourceDelta::at(now());
        second.labels = vec![Label {
            name: "summary".to_string(),
            target: target.clone(),
            value: serde_json::json!("new"),
        }];
        history.update(second).unwrap();

        let view = history.merged().unwrap();
        assert_eq!(view.labels.len(), 1);
        assert_eq!(view.get_label("summary", &target), Some(&serde_json::json!("new")));
    }

    #[test]
    fn test_reset_labels_drops_previous() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let mut labelled = ResourceDelta::at(now());
        labelled.labels = vec![Label {
            name: "summary".to_string(),
            target: Observable::Chunk(vec![0]),
            value: serde_json::json!("stale"),
        }];
        history.update(labelled).unwrap();

        let mut reset = ResourceDelta::at(now());
        reset.reset_labels = true;
        reset.metadata.revision_data = Some("r2".to_string());
        history.update(reset).unwrap();

        assert!(history.merged().unwrap().labels.is_empty());
    }

    #[test]
    fn test_attributes_fall_back_to_uri() {
        let mut delta = ResourceDelta::at(now());
        delta.locator = Some(locator());
        let history = ResourceHistory::initialize(delta).unwrap();
        assert_eq!(history.merged().unwrap().attributes().name, "page");
    }

    #[test]
    fn test_affordances_overlay_observed() {
        let mut history = ResourceHistory::initialize(initial_delta()).unwrap();
        let mut observe = ResourceDelta::at(now());
        observe.observed = vec![ObservedDelta {
            suffix: Affordance::Body,
            info_mime_type: Some("text/markdown".to_string()),
            info_sections: Some(vec![Section {
                indexes: vec![0],
                heading: Some("Intro".to_string()),
            }]),
            info_observations: None,
            relations: None,
        }];
        history.update(observe).unwrap();

        let affordances = history.merged().unwrap().affordances();
        assert_eq!(affordances.len(), 1);
        assert_eq!(affordances[0].suffix, Affordance::Body);
        assert_eq!(affordances[0].sections.len(), 1);
    }

    #[test]
    fn test_label_name_grammar() {
        assert!(valid_label_name("summary"));
        assert!(valid_label_name("key_points_2"));
        assert!(!valid_label_name("Summary"));
        assert!(!valid_label_name("double__underscore"));
        assert!(!valid_label_name(""));
    }
}
