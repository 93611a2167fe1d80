//! The built-in filesystem connector: realm `file`, one subrealm per
//! configured root directory.
//!
//! `ndk://file/<subrealm>/<path...>` addresses a file or directory under
//! that subrealm's root. Files offer `$body` (when textual) and `$file`;
//! directories offer `$collection`. The data revision is derived from
//! (mtime, size), so an unchanged file never gets re-read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::FilesystemConnectorConfig;
use crate::connector::{
    Connector, ObserveOptions, ObserveResult, RequestContext, ResolveResult,
};
use crate::error::{KnowledgeError, Result};
use crate::metadata::{AffordanceInfo, Locator, MetadataDelta, ResourceView};
use crate::bundle::{Bundle, BundleCollection, BundleFile, Download, Fragment};
use crate::uri::{Affordance, Reference, ResourceUri};

pub const FILE_REALM: &str = "file";

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

struct FsRoot {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

pub struct FilesystemConnector {
    roots: BTreeMap<String, FsRoot>,
}

impl FilesystemConnector {
    pub fn new(
        configs: &BTreeMap<String, FilesystemConnectorConfig>,
    ) -> Result<FilesystemConnector> {
        let mut roots = BTreeMap::new();
        for (subrealm, config) in configs {
            let mut excludes: Vec<String> =
                DEFAULT_EXCLUDES.iter().map(|glob| glob.to_string()).collect();
            excludes.extend(config.exclude_globs.iter().cloned());
            roots.insert(
                subrealm.clone(),
                FsRoot {
                    root: config.root.clone(),
                    include: build_globset(&config.include_globs)?,
                    exclude: build_globset(&excludes)?,
                    follow_symlinks: config.follow_symlinks,
                },
            );
        }
        Ok(FilesystemConnector { roots })
    }

    fn place(&self, uri: &ResourceUri) -> Result<(&FsRoot, PathBuf)> {
        let root = self.roots.get(&uri.subrealm).ok_or_else(|| {
            KnowledgeError::not_found(format!("no filesystem root named '{}'", uri.subrealm))
        })?;
        // URI segments never contain separators or leading dots, so the
        // joined path cannot escape the root.
        let mut path = root.root.clone();
        for segment in &uri.path {
            path.push(segment);
        }
        Ok((root, path))
    }

    /// Whether a file is served at all: its path relative to the root must
    /// match the include globs and dodge the excludes.
    fn serves_file(&self, root: &FsRoot, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&root.root) else {
            return false;
        };
        let relative = relative.to_string_lossy();
        root.include.is_match(relative.as_ref()) && !root.exclude.is_match(relative.as_ref())
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn realm(&self) -> &str {
        FILE_REALM
    }

    async fn locate(
        &self,
        _ctx: &RequestContext,
        reference: &Reference,
    ) -> Result<Option<Locator>> {
        let Some(uri) = reference.as_knowledge() else {
            return Ok(None);
        };
        let uri = uri.resource_uri();
        if uri.realm != FILE_REALM || !self.roots.contains_key(&uri.subrealm) {
            return Ok(None);
        }
        let (root, path) = self.place(&uri)?;
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            return Ok(None);
        };
        if metadata.is_file() && !self.serves_file(root, &path) {
            return Ok(None);
        }
        Ok(Some(Locator::new(uri)))
    }

    async fn resolve(
        &self,
        _ctx: &RequestContext,
        locator: &Locator,
        _cached: Option<&ResourceView>,
    ) -> Result<ResolveResult> {
        let (_, path) = self.place(&locator.uri)?;
        let stat = tokio::fs::metadata(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                KnowledgeError::not_found(format!("'{}' no longer exists", locator.uri))
            } else {
                KnowledgeError::from(err)
            }
        })?;

        let mut metadata = MetadataDelta {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            updated_at: modified_at(&stat),
            ..MetadataDelta::default()
        };
        if stat.is_dir() {
            metadata.affordances = Some(vec![AffordanceInfo::new(Affordance::Collection)]);
        } else {
            metadata.revision_data = Some(format!(
                "{}-{}",
                modified_at(&stat)
                    .map(|at| at.timestamp().to_string())
                    .unwrap_or_else(|| "0".to_string()),
                stat.len()
            ));
            metadata.mime_type = mime_for(&path).map(str::to_string);
            let mut affordances = Vec::new();
            if is_textual(&path) {
                affordances.push(AffordanceInfo::new(Affordance::Body));
            }
            affordances.push(AffordanceInfo::new(Affordance::File));
            metadata.affordances = Some(affordances);
        }

        Ok(ResolveResult {
            metadata,
            expired: Vec::new(),
            should_cache: true,
        })
    }

    async fn observe(
        &self,
        _ctx: &RequestContext,
        locator: &Locator,
        affordance: Affordance,
        _resolved: &MetadataDelta,
    ) -> Result<ObserveResult> {
        let (root, path) = self.place(&locator.uri)?;
        match affordance {
            Affordance::Body => {
                if !is_textual(&path) {
                    return Err(KnowledgeError::bad_request(format!(
                        "'{}' is not a text file",
                        locator.uri
                    )));
                }
                let text = tokio::fs::read_to_string(&path).await?;
                let mut result = ObserveResult::fragment(Fragment::text(text)).cached();
                result.options = ObserveOptions {
                    relations_link: true,
                    ..ObserveOptions::default()
                };
                Ok(result)
            }
            Affordance::Collection => {
                let children = self.list_children(root, &locator.uri, &path).await?;
                let bundle = Bundle::Collection(BundleCollection {
                    uri: locator.uri.clone(),
                    children,
                });
                let mut result = ObserveResult::bundle(bundle).cached();
                result.options = ObserveOptions {
                    relations_parent: true,
                    ..ObserveOptions::default()
                };
                Ok(result)
            }
            Affordance::File => {
                let data = tokio::fs::read(&path).await?;
                let bundle = Bundle::File(BundleFile {
                    uri: locator.uri.clone(),
                    mime_type: mime_for(&path).map(str::to_string),
                    size: Some(data.len() as u64),
                    download: Download::Data { data },
                });
                Ok(ObserveResult::bundle(bundle).cached())
            }
            Affordance::Plain => Err(KnowledgeError::bad_request(format!(
                "'{}' has no plain-text rendition",
                locator.uri
            ))),
        }
    }
}

impl FilesystemConnector {
    async fn list_children(
        &self,
        root: &FsRoot,
        uri: &ResourceUri,
        path: &Path,
    ) -> Result<Vec<ResourceUri>> {
        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() && !root.follow_symlinks {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !crate::uri::valid_segment(&name) {
                continue;
            }
            if file_type.is_file() && !self.serves_file(root, &entry.path()) {
                continue;
            }
            children.push(uri.child(&[name]));
        }
        children.sort();
        Ok(children)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            KnowledgeError::bad_connector(FILE_REALM, format!("bad glob '{pattern}': {err}"))
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| {
        KnowledgeError::bad_connector(FILE_REALM, format!("glob set failed: {err}"))
    })
}

fn modified_at(stat: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    stat.modified().ok().map(DateTime::<Utc>::from)
}

fn mime_for(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "md" | "markdown" => Some("text/markdown"),
        "txt" => Some("text/plain"),
        "html" | "htm" => Some("text/html"),
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/yaml"),
        "toml" => Some("application/toml"),
        "csv" => Some("text/csv"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

fn is_textual(path: &Path) -> bool {
    matches!(
        mime_for(path),
        Some(mime) if mime.starts_with("text/")
            || mime == "application/json"
            || mime == "application/yaml"
            || mime == "application/toml"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> BTreeMap<String, FilesystemConnectorConfig> {
        let mut configs = BTreeMap::new();
        configs.insert(
            "docs".to_string(),
            FilesystemConnectorConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: vec!["**/secret/**".to_string()],
                follow_symlinks: false,
            },
        );
        configs
    }

    fn reference(s: &str) -> Reference {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_locate_accepts_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guides")).unwrap();
        std::fs::write(dir.path().join("guides/setup.md"), "# Setup\n").unwrap();
        std::fs::write(dir.path().join("guides/build.log"), "noise").unwrap();
        let connector = FilesystemConnector::new(&config(dir.path())).unwrap();
        let ctx = RequestContext::default();

        let located = connector
            .locate(&ctx, &reference("ndk://file/docs/guides/setup.md"))
            .await
            .unwrap();
        assert!(located.is_some());

        // Wrong extension, missing file, unknown subrealm, foreign realm.
        for miss in [
            "ndk://file/docs/guides/build.log",
            "ndk://file/docs/guides/absent.md",
            "ndk://file/other/guides/setup.md",
            "ndk://wiki/eng/page",
        ] {
            assert!(
                connector.locate(&ctx, &reference(miss)).await.unwrap().is_none(),
                "expected no locator for {miss}"
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_revision_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "first").unwrap();
        let connector = FilesystemConnector::new(&config(dir.path())).unwrap();
        let ctx = RequestContext::default();
        let locator = Locator::new("ndk://file/docs/note.md".parse().unwrap());

        let first = connector.resolve(&ctx, &locator, None).await.unwrap();
        assert!(first.metadata.revision_data.is_some());
        assert_eq!(first.metadata.mime_type.as_deref(), Some("text/markdown"));

        std::fs::write(&file, "second, longer content").unwrap();
        let second = connector.resolve(&ctx, &locator, None).await.unwrap();
        assert_ne!(first.metadata.revision_data, second.metadata.revision_data);
    }

    #[tokio::test]
    async fn test_observe_collection_lists_children() {
        let dir = tempfile::tempdir().unwrap();
        let guides = dir.path().join("guides");
        std::fs::create_dir_all(guides.join("secret")).unwrap();
        std::fs::write(guides.join("a.md"), "a").unwrap();
        std::fs::write(guides.join("b.txt"), "b").unwrap();
        std::fs::write(guides.join("c.log"), "c").unwrap();
        let connector = FilesystemConnector::new(&config(dir.path())).unwrap();
        let ctx = RequestContext::default();
        let locator = Locator::new("ndk://file/docs/guides".parse().unwrap());

        let result = connector
            .observe(&ctx, &locator, Affordance::Collection, &MetadataDelta::default())
            .await
            .unwrap();
        match result.payload {
            crate::connector::ObservePayload::Bundle(Bundle::Collection(collection)) => {
                let children: Vec<String> =
                    collection.children.iter().map(|c| c.to_string()).collect();
                assert_eq!(
                    children,
                    vec![
                        "ndk://file/docs/guides/a.md".to_string(),
                        "ndk://file/docs/guides/b.txt".to_string(),
                        "ndk://file/docs/guides/secret".to_string(),
                    ]
                );
            }
            other => panic!("expected collection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_observe_body_reads_fragment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.md"), "# Note\n\nText.\n").unwrap();
        let connector = FilesystemConnector::new(&config(dir.path())).unwrap();
        let ctx = RequestContext::default();
        let locator = Locator::new("ndk://file/docs/note.md".parse().unwrap());

        let result = connector
            .observe(&ctx, &locator, Affordance::Body, &MetadataDelta::default())
            .await
            .unwrap();
        assert!(result.should_cache);
        assert!(result.options.relations_link);
        match result.payload {
            crate::connector::ObservePayload::Fragment(fragment) => {
                assert_eq!(fragment.text, "# Note\n\nText.\n");
            }
            other => panic!("expected fragment, got {other:?}"),
        }
    }
}
