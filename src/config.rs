use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::chunk::{DEFAULT_MAX_TOKENS, DEFAULT_THRESHOLD_TOKENS};
use crate::engine::DEFAULT_BATCH_SIZE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_threshold_tokens")]
    pub threshold_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            threshold_tokens: DEFAULT_THRESHOLD_TOKENS,
        }
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}
fn default_threshold_tokens() -> usize {
    DEFAULT_THRESHOLD_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    /// One filesystem root per subrealm of the `file` realm.
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

/// Names of environment variables holding credentials for a realm. The
/// values themselves never live in the config file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CredentialConfig {
    #[serde(default)]
    pub user_var: Option<String>,
    #[serde(default)]
    pub pass_var: Option<String>,
    #[serde(default)]
    pub token_var: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.threshold_tokens < config.chunking.max_tokens {
        anyhow::bail!("chunking.threshold_tokens must be >= chunking.max_tokens");
    }

    // Validate query
    if config.query.batch_size == 0 {
        anyhow::bail!("query.batch_size must be > 0");
    }

    // Validate connectors
    for (name, filesystem) in &config.connectors.filesystem {
        if !crate::uri::valid_segment(name) || name.contains('/') {
            anyhow::bail!("connectors.filesystem.{name}: invalid subrealm name");
        }
        if filesystem.root.as_os_str().is_empty() {
            anyhow::bail!("connectors.filesystem.{name}: root must not be empty");
        }
        if filesystem.include_globs.is_empty() {
            anyhow::bail!("connectors.filesystem.{name}: include_globs must not be empty");
        }
    }

    // Validate credentials
    for (realm, credential) in &config.credentials {
        let basic = credential.user_var.is_some() && credential.pass_var.is_some();
        let partial_basic = credential.user_var.is_some() != credential.pass_var.is_some();
        if partial_basic {
            anyhow::bail!("credentials.{realm}: user_var and pass_var go together");
        }
        if !basic && credential.token_var.is_none() {
            anyhow::bail!("credentials.{realm}: set user_var/pass_var or token_var");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let file = write_config(
            r#"
            [storage]
            root = ".kh/cache"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.chunking.threshold_tokens, DEFAULT_THRESHOLD_TOKENS);
        assert_eq!(config.query.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.connectors.filesystem.is_empty());
    }

    #[test]
    fn test_filesystem_connectors_by_subrealm() {
        let file = write_config(
            r#"
            [storage]
            root = ".kh/cache"

            [connectors.filesystem.docs]
            root = "/srv/docs"
            exclude_globs = ["**/drafts/**"]

            [connectors.filesystem.notes]
            root = "/srv/notes"
            include_globs = ["**/*.md"]
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connectors.filesystem.len(), 2);
        let docs = &config.connectors.filesystem["docs"];
        assert_eq!(docs.include_globs, default_include_globs());
        assert_eq!(docs.exclude_globs, vec!["**/drafts/**".to_string()]);
    }

    #[test]
    fn test_rejects_partial_basic_credentials() {
        let file = write_config(
            r#"
            [storage]
            root = ".kh/cache"

            [credentials.wiki]
            user_var = "WIKI_USER"
            "#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("user_var and pass_var"));
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let file = write_config(
            r#"
            [storage]
            root = ".kh/cache"

            [chunking]
            max_tokens = 0
            "#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
