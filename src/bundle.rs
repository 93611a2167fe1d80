//! Observation bundles: the cacheable content units of an affordance.
//!
//! A connector hands content to the engine either as a raw [`Fragment`]
//! (normalized markdown plus named blobs), which the ingestion pipeline
//! turns into a [`BundleBody`], or as a pre-built [`Bundle`] that passes
//! through untouched. Bundles are immutable once written: a refresh
//! replaces the whole bundle, never patches it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, Result};
use crate::metadata::Section;
use crate::uri::{Affordance, KnowledgeUri, Observable, ResourceUri, WebUrl};

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

///
/// Fragment
///

/// A named binary attachment of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Raw connector output: normalized markdown plus the blobs it references.
/// Never persisted; ingestion turns it into a [`BundleBody`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub blobs: BTreeMap<String, Blob>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Fragment {
        Fragment {
            text: text.into(),
            blobs: BTreeMap::new(),
        }
    }
}

///
/// Bundles
///

/// One chunk of a body, addressed by its nested index path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyChunk {
    pub indexes: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heading: Option<String>,
    pub text: String,
}

impl BodyChunk {
    pub fn observable(&self) -> Observable {
        Observable::Chunk(self.indexes.clone())
    }
}

/// An extracted media attachment of a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyMedia {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl BodyMedia {
    pub fn observable(&self) -> Observable {
        Observable::Media(vec![self.name.clone()])
    }
}

/// The chunked markdown rendition of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleBody {
    pub uri: ResourceUri,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sections: Vec<Section>,
    pub chunks: Vec<BodyChunk>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub media: Vec<BodyMedia>,
}

impl BundleBody {
    pub fn chunk(&self, indexes: &[usize]) -> Option<&BodyChunk> {
        self.chunks.iter().find(|chunk| chunk.indexes == indexes)
    }

    pub fn media(&self, name: &str) -> Option<&BodyMedia> {
        self.media.iter().find(|media| media.name == name)
    }

    /// The `$body` observation itself: the content when it fits in a single
    /// chunk, a table of contents otherwise.
    pub fn render_body(&self) -> String {
        if self.chunks.len() == 1 && self.sections.is_empty() {
            return self.chunks[0].text.clone();
        }

        let mut out = String::new();
        if let Some(description) = &self.description {
            out.push_str(description);
            out.push_str("\n\n");
        }
        for chunk in &self.chunks {
            let uri = self.uri.child_observable(chunk.observable());
            let summary = chunk
                .heading
                .clone()
                .unwrap_or_else(|| first_line(&chunk.text));
            out.push_str(&format!("- {uri}: {summary}\n"));
        }
        out
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let trimmed = line.trim();
    if trimmed.chars().count() > 80 {
        let prefix: String = trimmed.chars().take(77).collect();
        format!("{prefix}...")
    } else {
        trimmed.to_string()
    }
}

/// A collection affordance: the ordered children of a container resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCollection {
    pub uri: ResourceUri,
    pub children: Vec<ResourceUri>,
}

/// How the raw bytes of a file affordance are obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Download {
    Url { url: WebUrl },
    Data {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// The file affordance: a download reference for the resource's raw form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub uri: ResourceUri,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    pub download: Download,
}

/// The plain-text affordance, consumed whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePlain {
    pub uri: ResourceUri,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bundle", rename_all = "snake_case")]
pub enum Bundle {
    Body(BundleBody),
    Collection(BundleCollection),
    File(BundleFile),
    Plain(BundlePlain),
}

impl Bundle {
    pub fn resource_uri(&self) -> &ResourceUri {
        match self {
            Bundle::Body(body) => &body.uri,
            Bundle::Collection(collection) => &collection.uri,
            Bundle::File(file) => &file.uri,
            Bundle::Plain(plain) => &plain.uri,
        }
    }

    pub fn affordance(&self) -> Affordance {
        match self {
            Bundle::Body(_) => Affordance::Body,
            Bundle::Collection(_) => Affordance::Collection,
            Bundle::File(_) => Affordance::File,
            Bundle::Plain(_) => Affordance::Plain,
        }
    }

    pub fn uri(&self) -> KnowledgeUri {
        self.resource_uri().child_affordance(self.affordance())
    }

    /// Read one observation out of the bundle. `observable` of `None` reads
    /// the affordance root.
    pub fn read(&self, observable: Option<&Observable>) -> Result<ObservationContent> {
        match (self, observable) {
            (Bundle::Body(body), None) => Ok(ObservationContent::Text {
                text: body.render_body(),
            }),
            (Bundle::Body(body), Some(Observable::Chunk(indexes))) => body
                .chunk(indexes)
                .map(|chunk| ObservationContent::Text {
                    text: chunk.text.clone(),
                })
                .ok_or_else(|| {
                    KnowledgeError::not_found(format!(
                        "no chunk {} in {}",
                        Observable::Chunk(indexes.clone()),
                        body.uri
                    ))
                }),
            (Bundle::Body(body), Some(Observable::Media(name))) => {
                let name = name.join("/");
                body.media(&name)
                    .map(|media| ObservationContent::Bytes {
                        mime_type: media.mime_type.clone(),
                        data: media.data.clone(),
                    })
                    .ok_or_else(|| {
                        KnowledgeError::not_found(format!(
                            "no media '{name}' in {}",
                            body.uri
                        ))
                    })
            }
            (Bundle::Collection(collection), None) => {
                let listing = collection
                    .children
                    .iter()
                    .map(|child| format!("- {child}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ObservationContent::Text { text: listing })
            }
            (Bundle::File(file), _) => Ok(ObservationContent::Download {
                mime_type: file.mime_type.clone(),
                size: file.size,
                download: file.download.clone(),
            }),
            (Bundle::Plain(plain), None) => {
                Ok(ObservationContent::Text {
                    text: plain.text.clone(),
                })
            }
            (bundle, Some(observable)) => Err(KnowledgeError::bad_request(format!(
                "observable '{observable}' does not belong to '{}'",
                bundle.uri()
            ))),
        }
    }
}

/// The materialized content of a single observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "content", rename_all = "snake_case")]
pub enum ObservationContent {
    Text { text: String },
    Bytes {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        mime_type: Option<String>,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Download {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        size: Option<u64>,
        download: Download,
    },
}
