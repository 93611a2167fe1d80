//! Ingestion pipeline: turns connector output into cacheable bundles.
//!
//! A raw [`Fragment`] becomes a [`BundleBody`]: markdown is chunked under
//! the token budget, referenced blobs become `$media` observables with
//! their references rewritten to absolute URIs, and relations are extracted
//! from the content when the connector opts in. Pre-built bundles pass
//! through untouched, but still yield their observed metadata.
//!
//! The pipeline is deterministic end to end; a connector returning the same
//! content always produces the same bundle, observables, and relation ids.

use std::collections::BTreeMap;

use crate::bundle::{BodyMedia, Bundle, BundleBody, BundlePlain, Fragment};
use crate::chunk::{chunk_body, Tokenizer};
use crate::connector::{ObservePayload, ObserveResult};
use crate::error::{KnowledgeError, Result};
use crate::metadata::{MetadataDelta, ObservationInfo, ObservedDelta};
use crate::relation::Relation;
use crate::uri::{Affordance, KnowledgeUri, Observable, ResourceUri};

/// Budgets for the chunker, injected from configuration.
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_tokens: usize,
    pub threshold_tokens: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        IngestLimits {
            max_tokens: crate::chunk::DEFAULT_MAX_TOKENS,
            threshold_tokens: crate::chunk::DEFAULT_THRESHOLD_TOKENS,
        }
    }
}

/// Everything the engine needs to commit one observation.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub bundle: Bundle,
    pub observed: ObservedDelta,
    pub metadata: MetadataDelta,
    pub relations: Vec<Relation>,
    pub should_cache: bool,
}

pub fn ingest_observe_result(
    uri: &ResourceUri,
    affordance: Affordance,
    result: ObserveResult,
    tokenizer: &dyn Tokenizer,
    limits: IngestLimits,
) -> Result<IngestOutcome> {
    let options = result.options;
    let bundle = match result.payload {
        ObservePayload::Bundle(bundle) => {
            if bundle.affordance() != affordance {
                return Err(KnowledgeError::bad_connector(
                    &uri.realm,
                    format!(
                        "observe returned '{}' for requested '{}'",
                        bundle.affordance().as_suffix(),
                        affordance.as_suffix()
                    ),
                ));
            }
            bundle
        }
        ObservePayload::Fragment(fragment) => match affordance {
            Affordance::Body => {
                Bundle::Body(ingest_fragment(uri, fragment, tokenizer, limits))
            }
            Affordance::Plain => Bundle::Plain(BundlePlain {
                uri: uri.clone(),
                text: fragment.text,
            }),
            other => {
                return Err(KnowledgeError::bad_connector(
                    &uri.realm,
                    format!("fragment payload for '{}'", other.as_suffix()),
                ))
            }
        },
    };

    let mut relations = result.relations;
    match &bundle {
        Bundle::Body(body) if options.relations_link => {
            extend_relations(&mut relations, extract_link_relations(body));
        }
        Bundle::Collection(collection) if options.relations_parent => {
            let parents = collection.children.iter().map(|child| Relation::Parent {
                parent: collection.uri.clone(),
                child: child.clone(),
            });
            extend_relations(&mut relations, parents);
        }
        _ => {}
    }
    relations.sort_by_key(Relation::unique_id);

    let observed = observed_delta(&bundle, tokenizer, &relations);
    Ok(IngestOutcome {
        bundle,
        observed,
        metadata: result.metadata,
        relations,
        should_cache: result.should_cache,
    })
}

fn extend_relations(
    relations: &mut Vec<Relation>,
    extracted: impl IntoIterator<Item = Relation>,
) {
    for relation in extracted {
        if !relations.iter().any(|r| r.unique_id() == relation.unique_id()) {
            relations.push(relation);
        }
    }
}

///
/// Fragment ingestion
///

fn ingest_fragment(
    uri: &ResourceUri,
    fragment: Fragment,
    tokenizer: &dyn Tokenizer,
    limits: IngestLimits,
) -> BundleBody {
    let (text, media) = extract_media(uri, &fragment.text, fragment.blobs);
    let chunked = chunk_body(&text, tokenizer, limits.max_tokens, limits.threshold_tokens);
    BundleBody {
        uri: uri.clone(),
        description: None,
        sections: chunked.sections,
        chunks: chunked.chunks,
        media,
    }
}

/// Media names must be valid URI segments; anything else is mapped to `_`.
fn normalize_media_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "media".to_string()
    } else {
        cleaned
    }
}

/// `name-2.png` for the second blob normalizing to `name.png`, and so on,
/// in occurrence order. The first keeps the plain name.
fn disambiguate(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (name.to_string(), String::new()),
    };
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}-{counter}{ext}");
        if !taken.iter().any(|t| *t == candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Rewrite `](blob-key)` references to absolute `$media` URIs, in occurrence
/// order, and collect the referenced blobs. Unreferenced blobs are dropped;
/// repeated references reuse the first rewrite.
fn extract_media(
    uri: &ResourceUri,
    text: &str,
    mut blobs: BTreeMap<String, crate::bundle::Blob>,
) -> (String, Vec<BodyMedia>) {
    let mut media: Vec<BodyMedia> = Vec::new();
    let mut taken: Vec<String> = Vec::new();
    let mut assigned: BTreeMap<String, String> = BTreeMap::new();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("](") {
        let after = &rest[open + 2..];
        let Some(close) = after.find(')') else {
            break;
        };
        let target = &after[..close];
        out.push_str(&rest[..open + 2]);

        if let Some(final_name) = assigned.get(target) {
            let media_uri =
                uri.child_observable(Observable::Media(vec![final_name.clone()]));
            out.push_str(&media_uri.to_string());
        } else if let Some(blob) = blobs.remove(target) {
            let final_name = disambiguate(&normalize_media_name(target), &taken);
            taken.push(final_name.clone());
            assigned.insert(target.to_string(), final_name.clone());
            media.push(BodyMedia {
                name: final_name.clone(),
                mime_type: blob.mime_type,
                data: blob.data,
            });
            let media_uri = uri.child_observable(Observable::Media(vec![final_name]));
            out.push_str(&media_uri.to_string());
        } else {
            out.push_str(target);
        }
        out.push(')');
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    (out, media)
}

///
/// Relation extraction
///

/// Every well-formed `ndk://` URI inside chunk text becomes a `link`
/// relation from that chunk, excluding self references.
fn extract_link_relations(body: &BundleBody) -> Vec<Relation> {
    let mut relations = Vec::new();
    for chunk in &body.chunks {
        let source = body.uri.child_observable(chunk.observable());
        for target in scan_knowledge_uris(&chunk.text) {
            if target.resource_uri() == body.uri {
                continue;
            }
            relations.push(Relation::Link {
                source: source.clone(),
                target,
            });
        }
    }
    relations
}

fn scan_knowledge_uris(text: &str) -> Vec<KnowledgeUri> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("ndk://") {
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| {
                c.is_whitespace() || matches!(c, ')' | ']' | '>' | '"' | '\'' | ',')
            })
            .unwrap_or(tail.len());
        let candidate = tail[..end].trim_end_matches(['.', ';', ':']);
        if let Ok(uri) = candidate.parse::<KnowledgeUri>() {
            found.push(uri);
        }
        rest = &tail[end.max(6)..];
    }
    found
}

///
/// Observed metadata
///

fn observed_delta(
    bundle: &Bundle,
    tokenizer: &dyn Tokenizer,
    relations: &[Relation],
) -> ObservedDelta {
    let mut delta = ObservedDelta::new(bundle.affordance());
    delta.relations = Some(relations.to_vec());

    match bundle {
        Bundle::Body(body) => {
            delta.info_mime_type = Some("text/markdown".to_string());
            delta.info_sections = Some(body.sections.clone());
            let mut observations: Vec<ObservationInfo> = body
                .chunks
                .iter()
                .map(|chunk| ObservationInfo {
                    suffix: chunk.observable(),
                    num_tokens: Some(tokenizer.count(&chunk.text)),
                    mime_type: None,
                    description: chunk.heading.clone(),
                })
                .collect();
            observations.extend(body.media.iter().map(|media| ObservationInfo {
                suffix: media.observable(),
                num_tokens: None,
                mime_type: media.mime_type.clone(),
                description: None,
            }));
            delta.info_observations = Some(observations);
        }
        Bundle::Collection(_) => {
            delta.info_mime_type = Some("text/markdown".to_string());
            delta.info_observations = Some(Vec::new());
        }
        Bundle::File(file) => {
            delta.info_mime_type = file.mime_type.clone();
            delta.info_observations = Some(Vec::new());
        }
        Bundle::Plain(plain) => {
            delta.info_mime_type = Some("text/plain".to_string());
            delta.info_observations = Some(vec![ObservationInfo {
                suffix: Observable::Chunk(vec![0]),
                num_tokens: Some(tokenizer.count(&plain.text)),
                mime_type: None,
                description: None,
            }]);
        }
    }
    delta
}
