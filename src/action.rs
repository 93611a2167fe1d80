//! Query actions and response shapes.
//!
//! These are the types a transport hands to [`crate::engine`]: a batch of
//! actions in, a [`QueryOutcome`] out. Failures are carried in-band per
//! URI, so one failing action never aborts its siblings.

use serde::{Deserialize, Serialize};

use crate::bundle::ObservationContent;
use crate::error::KnowledgeError;
use crate::metadata::{AffordanceInfo, Label, ResourceAttrs};
use crate::relation::Relation;
use crate::uri::{Affordance, KnowledgeUri, Reference, ResourceUri, WebUrl};

fn default_expand_depth() -> u32 {
    0
}

/// How the cache is consulted for a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Resolve, then trust cached content while revisions match.
    #[default]
    Auto,
    /// Resolve and observe unconditionally; overwrite the cache.
    Force,
    /// Serve the cache verbatim; never dispatch to a connector.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Action {
    /// Load a resource's metadata, optionally observing affordances.
    #[serde(rename = "resources/load")]
    Load {
        uri: Reference,
        #[serde(default)]
        load_mode: LoadMode,
        /// Expand stored relations of the result into additional metadata
        /// loads, this many hops out.
        #[serde(default = "default_expand_depth")]
        expand_depth: u32,
        /// Affordances to observe alongside the metadata.
        #[serde(default)]
        observe: Vec<Affordance>,
    },
    /// Read one observation (affordance root or observable) from cache,
    /// refreshing it if needed.
    #[serde(rename = "resources/observe")]
    Observe {
        uri: KnowledgeUri,
        #[serde(default)]
        load_mode: LoadMode,
    },
    /// Attach caller-provided content as the body of a resource the
    /// connector cannot read itself.
    #[serde(rename = "resources/attachment")]
    Attachment {
        uri: Reference,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        mime_type: Option<String>,
        /// Base64-encoded content.
        data: String,
    },
}

impl Action {
    pub fn load(uri: Reference) -> Action {
        Action::Load {
            uri,
            load_mode: LoadMode::Auto,
            expand_depth: 0,
            observe: Vec::new(),
        }
    }
}

///
/// Responses
///

/// The client-facing projection of a cached resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: ResourceUri,
    pub attributes: ResourceAttrs,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aliases: Vec<WebUrl>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub affordances: Vec<AffordanceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub labels: Vec<Label>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceEntry {
    Ok {
        #[serde(flatten)]
        resource: Box<Resource>,
    },
    Error {
        uri: String,
        error: KnowledgeError,
    },
}

impl ResourceEntry {
    pub fn ok(resource: Resource) -> ResourceEntry {
        ResourceEntry::Ok {
            resource: Box::new(resource),
        }
    }

    pub fn error(uri: impl ToString, error: KnowledgeError) -> ResourceEntry {
        ResourceEntry::Error {
            uri: uri.to_string(),
            error,
        }
    }

    pub fn uri(&self) -> String {
        match self {
            ResourceEntry::Ok { resource } => resource.uri.to_string(),
            ResourceEntry::Error { uri, .. } => uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservationEntry {
    Ok {
        uri: KnowledgeUri,
        #[serde(flatten)]
        content: ObservationContent,
    },
    Error {
        uri: String,
        error: KnowledgeError,
    },
}

impl ObservationEntry {
    pub fn uri(&self) -> String {
        match self {
            ObservationEntry::Ok { uri, .. } => uri.to_string(),
            ObservationEntry::Error { uri, .. } => uri.clone(),
        }
    }
}

/// The response to a batch of actions. Entries are ordered by URI, and a
/// URI appears at most once: re-observed roots replace their children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutcome {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub observations: Vec<ObservationEntry>,
}

impl QueryOutcome {
    pub fn push_resource(&mut self, entry: ResourceEntry) {
        self.resources.retain(|existing| existing.uri() != entry.uri());
        self.resources.push(entry);
        self.resources.sort_by_key(ResourceEntry::uri);
    }

    pub fn push_observation(&mut self, entry: ObservationEntry) {
        self.observations
            .retain(|existing| existing.uri() != entry.uri());
        self.observations.push(entry);
        self.observations.sort_by_key(ObservationEntry::uri);
    }

    pub fn merge(&mut self, other: QueryOutcome) {
        for entry in other.resources {
            self.push_resource(entry);
        }
        for entry in other.observations {
            self.push_observation(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_action_defaults() {
        let action: Action = serde_json::from_str(
            r#"{"method": "resources/load", "uri": "ndk://wiki/eng/page"}"#,
        )
        .unwrap();
        match action {
            Action::Load {
                load_mode,
                expand_depth,
                observe,
                ..
            } => {
                assert_eq!(load_mode, LoadMode::Auto);
                assert_eq!(expand_depth, 0);
                assert!(observe.is_empty());
            }
            other => panic!("expected load action, got {other:?}"),
        }
    }

    #[test]
    fn test_load_action_full() {
        let action: Action = serde_json::from_str(
            r#"{
                "method": "resources/load",
                "uri": "https://example.com/page",
                "load_mode": "force",
                "expand_depth": 2,
                "observe": ["$body", "$collection"]
            }"#,
        )
        .unwrap();
        match action {
            Action::Load {
                uri,
                load_mode,
                expand_depth,
                observe,
            } => {
                assert!(uri.as_web().is_some());
                assert_eq!(load_mode, LoadMode::Force);
                assert_eq!(expand_depth, 2);
                assert_eq!(observe, vec![Affordance::Body, Affordance::Collection]);
            }
            other => panic!("expected load action, got {other:?}"),
        }
    }

    #[test]
    fn test_outcome_replaces_duplicate_uris() {
        let mut outcome = QueryOutcome::default();
        outcome.push_resource(ResourceEntry::error(
            "ndk://wiki/eng/page",
            KnowledgeError::not_found("first"),
        ));
        outcome.push_resource(ResourceEntry::error(
            "ndk://wiki/eng/page",
            KnowledgeError::not_found("second"),
        ));
        assert_eq!(outcome.resources.len(), 1);
        match &outcome.resources[0] {
            ResourceEntry::Error { error, .. } => assert_eq!(error.message, "second"),
            other => panic!("expected error entry, got {other:?}"),
        }
    }
}
