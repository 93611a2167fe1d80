//! Knowledge URI model.
//!
//! Every resource is addressed by a three-tier URI:
//!
//! ```text
//! ndk://{realm}/{subrealm}/{path...}[/$affordance[/observable-path...]]
//! ```
//!
//! - `realm` routes to the connector that owns the resource;
//! - `subrealm` scopes it to a location within the realm;
//! - `path` identifies it within the subrealm (one or more segments).
//!
//! A URI without a suffix names the resource itself (its metadata). A
//! `$suffix` selects an affordance (a perspective on the content) or an
//! observable (an addressable part within an affordance). Parsing is purely
//! syntactic: a well-formed URI guarantees neither existence nor access.
//!
//! These are identifiers, not locations. Their job is to deduplicate the many
//! ways of pointing at the same content and to let resources reference each
//! other, forming a graph that can be traversed by URI alone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

pub const SCHEME: &str = "ndk://";

fn valid_realm(s: &str) -> bool {
    s.split('-').enumerate().all(|(i, part)| {
        let min_len = if i == 0 { 2 } else { 1 };
        part.len() >= min_len
            && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && (i > 0 || part.starts_with(|c: char| c.is_ascii_lowercase()))
    })
}

/// Path segments follow a conservative file-name grammar: ASCII letters,
/// digits, `.`, `_`, `-`, no leading dot.
pub(crate) fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn parse_segments(uri: &str, parts: &[&str]) -> Result<Vec<String>, KnowledgeError> {
    parts
        .iter()
        .map(|part| {
            if valid_segment(part) {
                Ok((*part).to_string())
            } else {
                Err(KnowledgeError::invalid_uri(format!(
                    "invalid path segment '{part}' in '{uri}'"
                )))
            }
        })
        .collect()
}

///
/// Affordance
///

/// A perspective on a resource's content. `$body` is the markdown rendition
/// broken into chunks and media; `$collection` lists child resources;
/// `$file` is the raw file; `$plain` is an unstructured text rendition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Affordance {
    Body,
    Collection,
    File,
    Plain,
}

impl Affordance {
    pub fn kind(self) -> &'static str {
        match self {
            Affordance::Body => "body",
            Affordance::Collection => "collection",
            Affordance::File => "file",
            Affordance::Plain => "plain",
        }
    }

    pub fn as_suffix(self) -> String {
        format!("${}", self.kind())
    }

    /// Whether parts of this affordance can be addressed individually.
    /// `$collection` and `$plain` are consumed whole.
    pub fn has_observables(self) -> bool {
        matches!(self, Affordance::Body | Affordance::File)
    }
}

impl fmt::Display for Affordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.kind())
    }
}

impl FromStr for Affordance {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$body" => Ok(Affordance::Body),
            "$collection" => Ok(Affordance::Collection),
            "$file" => Ok(Affordance::File),
            "$plain" => Ok(Affordance::Plain),
            _ => Err(KnowledgeError::invalid_uri(format!(
                "unknown affordance '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for Affordance {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Affordance> for String {
    fn from(affordance: Affordance) -> String {
        affordance.as_suffix()
    }
}

///
/// Observable
///

/// An addressable part within an affordance. Chunk indexes are rendered as
/// two-digit zero-padded decimals, nested one level per heading depth.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Observable {
    Chunk(Vec<usize>),
    Media(Vec<String>),
    File(Vec<String>),
}

impl Observable {
    pub fn kind(&self) -> &'static str {
        match self {
            Observable::Chunk(_) => "chunk",
            Observable::Media(_) => "media",
            Observable::File(_) => "file",
        }
    }

    /// The affordance this observable lives under.
    pub fn affordance(&self) -> Affordance {
        match self {
            Observable::Chunk(_) | Observable::Media(_) => Affordance::Body,
            Observable::File(_) => Affordance::File,
        }
    }

    /// The top-level observable containing this one. Nested chunks roll up
    /// to their first index; media and file paths are their own roots.
    pub fn root(&self) -> Observable {
        match self {
            Observable::Chunk(indexes) if indexes.len() > 1 => {
                Observable::Chunk(vec![indexes[0]])
            }
            other => other.clone(),
        }
    }

    pub fn as_suffix(&self) -> String {
        match self {
            Observable::Chunk(indexes) => {
                let mut out = String::from("$chunk");
                for index in indexes {
                    out.push('/');
                    out.push_str(&format!("{index:02}"));
                }
                out
            }
            Observable::Media(name) => format!("$media/{}", name.join("/")),
            Observable::File(path) => format!("$file/{}", path.join("/")),
        }
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_suffix())
    }
}

impl FromStr for Observable {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Suffix::from_str(s)? {
            Suffix::Observable(obs) => Ok(obs),
            Suffix::Affordance(aff) => Err(KnowledgeError::invalid_uri(format!(
                "expected an observable, got affordance '{aff}'"
            ))),
        }
    }
}

impl TryFrom<String> for Observable {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Observable> for String {
    fn from(observable: Observable) -> String {
        observable.as_suffix()
    }
}

///
/// Suffix
///

/// Either side of the `$` suffix grammar. `$file` alone is the affordance;
/// `$file/{path}` is an observable within it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Suffix {
    Affordance(Affordance),
    Observable(Observable),
}

impl Suffix {
    pub fn as_suffix(&self) -> String {
        match self {
            Suffix::Affordance(aff) => aff.as_suffix(),
            Suffix::Observable(obs) => obs.as_suffix(),
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_suffix())
    }
}

impl FromStr for Suffix {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('$').ok_or_else(|| {
            KnowledgeError::invalid_uri(format!("suffix must start with '$', got '{s}'"))
        })?;
        let mut parts = body.split('/');
        let kind = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();
        parse_suffix_parts(s, kind, &rest)
    }
}

impl TryFrom<String> for Suffix {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Suffix> for String {
    fn from(suffix: Suffix) -> String {
        suffix.as_suffix()
    }
}

fn parse_suffix_parts(
    raw: &str,
    kind: &str,
    rest: &[&str],
) -> Result<Suffix, KnowledgeError> {
    match kind {
        "body" | "collection" | "plain" => {
            if rest.is_empty() {
                Ok(Suffix::Affordance(match kind {
                    "body" => Affordance::Body,
                    "collection" => Affordance::Collection,
                    _ => Affordance::Plain,
                }))
            } else {
                Err(KnowledgeError::invalid_uri(format!(
                    "'${kind}' takes no observable path, got '{raw}'"
                )))
            }
        }
        "file" => {
            if rest.is_empty() {
                Ok(Suffix::Affordance(Affordance::File))
            } else {
                Ok(Suffix::Observable(Observable::File(parse_segments(
                    raw, rest,
                )?)))
            }
        }
        "chunk" => {
            if rest.is_empty() {
                return Err(KnowledgeError::invalid_uri(format!(
                    "'$chunk' requires at least one index, got '{raw}'"
                )));
            }
            let indexes = rest
                .iter()
                .map(|part| {
                    if part.len() == 2 && part.chars().all(|c| c.is_ascii_digit()) {
                        part.parse::<usize>().map_err(|_| {
                            KnowledgeError::invalid_uri(format!(
                                "invalid chunk index in '{raw}'"
                            ))
                        })
                    } else {
                        Err(KnowledgeError::invalid_uri(format!(
                            "chunk indexes are two zero-padded digits, got '{raw}'"
                        )))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Suffix::Observable(Observable::Chunk(indexes)))
        }
        "media" => {
            if rest.is_empty() {
                return Err(KnowledgeError::invalid_uri(format!(
                    "'$media' requires a name, got '{raw}'"
                )));
            }
            Ok(Suffix::Observable(Observable::Media(parse_segments(
                raw, rest,
            )?)))
        }
        other => Err(KnowledgeError::invalid_uri(format!(
            "unknown suffix kind '${other}' in '{raw}'"
        ))),
    }
}

///
/// Resource URI
///

/// The unique identifier of a resource, without any affordance suffix.
/// Loading it yields the resource's metadata and capabilities; its content
/// is read through affordance URIs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceUri {
    pub realm: String,
    pub subrealm: String,
    pub path: Vec<String>,
}

impl ResourceUri {
    pub fn new(
        realm: &str,
        subrealm: &str,
        path: &[&str],
    ) -> Result<Self, KnowledgeError> {
        format!("{SCHEME}{realm}/{subrealm}/{}", path.join("/")).parse()
    }

    pub fn child(&self, child_path: &[String]) -> ResourceUri {
        let mut path = self.path.clone();
        path.extend(child_path.iter().cloned());
        ResourceUri {
            realm: self.realm.clone(),
            subrealm: self.subrealm.clone(),
            path,
        }
    }

    pub fn child_affordance(&self, affordance: Affordance) -> KnowledgeUri {
        KnowledgeUri {
            resource: self.clone(),
            suffix: Some(Suffix::Affordance(affordance)),
        }
    }

    pub fn child_observable(&self, observable: Observable) -> KnowledgeUri {
        KnowledgeUri {
            resource: self.clone(),
            suffix: Some(Suffix::Observable(observable)),
        }
    }

    /// Default filename when one is required, e.g. for attachments.
    pub fn guess_filename(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}/{}/{}",
            self.realm,
            self.subrealm,
            self.path.join("/")
        )
    }
}

impl FromStr for ResourceUri {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| {
            KnowledgeError::invalid_uri(format!("missing '{SCHEME}' scheme in '{s}'"))
        })?;
        if rest.contains('$') {
            return Err(KnowledgeError::invalid_uri(format!(
                "resource URI must not carry a suffix, got '{s}'"
            )));
        }

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() < 3 {
            return Err(KnowledgeError::invalid_uri(format!(
                "expected realm/subrealm/path, got '{s}'"
            )));
        }
        let realm = parts[0].to_ascii_lowercase();
        if !valid_realm(&realm) {
            return Err(KnowledgeError::invalid_uri(format!(
                "invalid realm '{}' in '{s}'",
                parts[0]
            )));
        }
        if !valid_segment(parts[1]) {
            return Err(KnowledgeError::invalid_uri(format!(
                "invalid subrealm '{}' in '{s}'",
                parts[1]
            )));
        }
        let path = parse_segments(s, &parts[2..])?;

        Ok(ResourceUri {
            realm,
            subrealm: parts[1].to_string(),
            path,
        })
    }
}

impl TryFrom<String> for ResourceUri {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceUri> for String {
    fn from(uri: ResourceUri) -> String {
        uri.to_string()
    }
}

///
/// Knowledge URI
///

/// A resource URI with an optional affordance or observable suffix. Parsing
/// and serialization round-trip losslessly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KnowledgeUri {
    pub resource: ResourceUri,
    pub suffix: Option<Suffix>,
}

impl KnowledgeUri {
    pub fn is_resource(&self) -> bool {
        self.suffix.is_none()
    }

    pub fn is_affordance(&self) -> bool {
        matches!(self.suffix, Some(Suffix::Affordance(_)))
    }

    pub fn is_observable(&self) -> bool {
        matches!(self.suffix, Some(Suffix::Observable(_)))
    }

    pub fn resource_uri(&self) -> ResourceUri {
        self.resource.clone()
    }

    pub fn affordance(&self) -> Option<Affordance> {
        match &self.suffix {
            Some(Suffix::Affordance(aff)) => Some(*aff),
            Some(Suffix::Observable(obs)) => Some(obs.affordance()),
            None => None,
        }
    }

    pub fn observable(&self) -> Option<&Observable> {
        match &self.suffix {
            Some(Suffix::Observable(obs)) => Some(obs),
            _ => None,
        }
    }

    /// The affordance URI containing this one, e.g. the `$body` of a chunk.
    pub fn affordance_uri(&self) -> Option<KnowledgeUri> {
        self.affordance()
            .map(|aff| self.resource.child_affordance(aff))
    }
}

impl From<ResourceUri> for KnowledgeUri {
    fn from(resource: ResourceUri) -> Self {
        KnowledgeUri {
            resource,
            suffix: None,
        }
    }
}

impl fmt::Display for KnowledgeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}/{}", self.resource, suffix.as_suffix()),
            None => self.resource.fmt(f),
        }
    }
}

impl FromStr for KnowledgeUri {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("/$") {
            None => Ok(KnowledgeUri {
                resource: s.parse()?,
                suffix: None,
            }),
            Some((resource_str, suffix_str)) => {
                let resource: ResourceUri = resource_str.parse()?;
                let suffix: Suffix = format!("${suffix_str}").parse()?;
                Ok(KnowledgeUri {
                    resource,
                    suffix: Some(suffix),
                })
            }
        }
    }
}

impl TryFrom<String> for KnowledgeUri {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KnowledgeUri> for String {
    fn from(uri: KnowledgeUri) -> String {
        uri.to_string()
    }
}

///
/// Web URL
///

/// A normalized HTTPS URL, the external side of an alias. Normalization
/// lowercases the host, drops a default port, and keeps query order; `clean`
/// additionally sorts the query so equivalent URLs hash identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WebUrl {
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub fragment: String,
}

impl WebUrl {
    pub fn clean(&self) -> WebUrl {
        let mut query = self.query.clone();
        query.sort();
        WebUrl {
            domain: self.domain.clone(),
            port: self.port,
            path: self.path.clone(),
            query,
            fragment: self.fragment.clone(),
        }
    }

    pub fn get_query(&self, param: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == param)
            .map(|(_, value)| value.as_str())
    }

    /// Last path component, used as a filename heuristic for downloads.
    pub fn guess_filename(&self) -> Option<&str> {
        let last = self.path.trim_end_matches('/').rsplit('/').next()?;
        if last.is_empty() {
            None
        } else {
            Some(last)
        }
    }
}

impl fmt::Display for WebUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}", self.domain)?;
        if self.port != 443 {
            write!(f, ":{}", self.port)?;
        }
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        if !self.query.is_empty() {
            let encoded: Vec<String> = self
                .query
                .iter()
                .map(|(key, value)| {
                    if value.is_empty() {
                        key.clone()
                    } else {
                        format!("{key}={value}")
                    }
                })
                .collect();
            write!(f, "?{}", encoded.join("&"))?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

impl FromStr for WebUrl {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("https://").ok_or_else(|| {
            KnowledgeError::invalid_uri(format!("only https URLs are supported: '{s}'"))
        })?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((head, frag)) => (head, frag.to_string()),
            None => (rest, String::new()),
        };
        let (rest, query_str) = match rest.split_once('?') {
            Some((head, query)) => (head, query),
            None => (rest, ""),
        };
        let (netloc, path) = match rest.split_once('/') {
            Some((netloc, path)) => (netloc, path.to_string()),
            None => (rest, String::new()),
        };

        let (domain, port) = match netloc.split_once(':') {
            Some((domain, port_str)) => {
                let port = port_str.parse::<u16>().map_err(|_| {
                    KnowledgeError::invalid_uri(format!("invalid port in '{s}'"))
                })?;
                (domain.to_ascii_lowercase(), port)
            }
            None => (netloc.to_ascii_lowercase(), 443),
        };
        if domain.is_empty() || !domain.contains('.') {
            return Err(KnowledgeError::invalid_uri(format!(
                "invalid domain in '{s}'"
            )));
        }

        let query = query_str
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Ok(WebUrl {
            domain,
            port,
            path,
            query,
            fragment,
        })
    }
}

impl TryFrom<String> for WebUrl {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WebUrl> for String {
    fn from(url: WebUrl) -> String {
        url.to_string()
    }
}

///
/// Reference
///

/// Anything a caller may hand to `locate`: a knowledge URI, or an external
/// HTTPS URL to be aliased into one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Reference {
    Knowledge(KnowledgeUri),
    Web(WebUrl),
}

impl Reference {
    pub fn as_knowledge(&self) -> Option<&KnowledgeUri> {
        match self {
            Reference::Knowledge(uri) => Some(uri),
            Reference::Web(_) => None,
        }
    }

    pub fn as_web(&self) -> Option<&WebUrl> {
        match self {
            Reference::Web(url) => Some(url),
            Reference::Knowledge(_) => None,
        }
    }
}

impl From<ResourceUri> for Reference {
    fn from(uri: ResourceUri) -> Self {
        Reference::Knowledge(uri.into())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Knowledge(uri) => uri.fmt(f),
            Reference::Web(url) => url.fmt(f),
        }
    }
}

impl FromStr for Reference {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(SCHEME) {
            Ok(Reference::Knowledge(s.parse()?))
        } else if s.starts_with("https://") {
            Ok(Reference::Web(s.parse()?))
        } else {
            Err(KnowledgeError::invalid_uri(format!(
                "reference must be '{SCHEME}' or 'https://', got '{s}'"
            )))
        }
    }
}

impl TryFrom<String> for Reference {
    type Error = KnowledgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> String {
        reference.to_string()
    }
}
