//! Typed relations between resources.
//!
//! A relation's identity is derived from its content: the canonical JSON of
//! the relation is hashed, salted, and prefixed with the relation type, so
//! re-extracting the same relation always yields the same [`RelationId`].
//! Storage indexes relations under every endpoint, so the graph can be
//! queried from either side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KnowledgeError;
use crate::uri::{KnowledgeUri, ResourceUri};

const RELATION_ID_CHARS: usize = 32;
const RELATION_ID_SALT: &str = "knowledge-relation";

/// `{type}-{hash}` identifier, deterministic over the relation definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationId(String);

impl RelationId {
    pub fn relation_type(&self) -> &str {
        self.0.split('-').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RelationId {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.split_once('-').is_some_and(|(kind, hash)| {
            !kind.is_empty()
                && kind.chars().all(|c| c.is_ascii_lowercase())
                && hash.len() == RELATION_ID_CHARS
                && hash.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        });
        if valid {
            Ok(RelationId(s.to_string()))
        } else {
            Err(KnowledgeError::bad_request(format!(
                "invalid relation id '{s}'"
            )))
        }
    }
}

impl TryFrom<String> for RelationId {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelationId> for String {
    fn from(id: RelationId) -> String {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Relation {
    /// Containment, e.g. a collection and its children.
    Parent {
        parent: ResourceUri,
        child: ResourceUri,
    },
    /// A hyperlink from one resource's content to another.
    Link {
        source: KnowledgeUri,
        target: KnowledgeUri,
    },
    /// Content of the target rendered inline within the source.
    Embed {
        source: KnowledgeUri,
        target: KnowledgeUri,
    },
    /// Connector-defined association, with a normalized `kind` tag.
    Misc {
        kind: String,
        source: ResourceUri,
        target: ResourceUri,
    },
}

impl Relation {
    pub fn misc(kind: &str, source: ResourceUri, target: ResourceUri) -> Relation {
        let kind = kind
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Relation::Misc { kind, source, target }
    }

    pub fn relation_type(&self) -> &str {
        match self {
            Relation::Parent { .. } => "parent",
            Relation::Link { .. } => "link",
            Relation::Embed { .. } => "embed",
            Relation::Misc { .. } => "misc",
        }
    }

    pub fn unique_id(&self) -> RelationId {
        // Canonical form relies on serde_json's sorted object keys.
        let canonical = serde_json::to_string(
            &serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        )
        .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(RELATION_ID_SALT.as_bytes());
        hasher.update(canonical.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        RelationId(format!(
            "{}-{}",
            self.relation_type(),
            &hash[..RELATION_ID_CHARS]
        ))
    }

    pub fn source(&self) -> ResourceUri {
        match self {
            Relation::Parent { parent, .. } => parent.clone(),
            Relation::Link { source, .. } | Relation::Embed { source, .. } => {
                source.resource_uri()
            }
            Relation::Misc { source, .. } => source.clone(),
        }
    }

    pub fn targets(&self) -> Vec<ResourceUri> {
        match self {
            Relation::Parent { child, .. } => vec![child.clone()],
            Relation::Link { target, .. } | Relation::Embed { target, .. } => {
                vec![target.resource_uri()]
            }
            Relation::Misc { target, .. } => vec![target.clone()],
        }
    }

    /// Every resource this relation should be indexed under.
    pub fn nodes(&self) -> Vec<ResourceUri> {
        let mut nodes = vec![self.source()];
        nodes.extend(self.targets());
        nodes
    }
}
