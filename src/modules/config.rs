//! Share descriptors and the server configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::str::FromStr;
use std::sync::Arc;

use super::permission::{GlobPermissionsMapper, PermissionsMapper};
pub use super::permission::PermissionsConfig;

/// A local directory to expose in the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareConfig {
    /// Absolute, normalized path of the shared directory
    pub path: PathBuf,
    /// Explicit alias; derived from `path` when absent
    #[serde(default)]
    pub alias: Option<String>,
    /// Nest the default alias below the explicit one
    #[serde(default)]
    pub append_default_alias: bool,
    /// Attribute overrides for this share
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
    /// Overrides for paths below the share matching a glob
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub glob_permissions: BTreeMap<String, PermissionsConfig>,
}

/// Splits `"path[:alias]"` on its last `:`.
///
/// A colon at byte index 0 or 1 is part of the path, so a drive letter such
/// as `C:\data` is never mistaken for an alias separator.
pub fn split_share(share: &str) -> (&str, Option<&str>) {
    match share.rfind(':') {
        Some(index) if index > 1 => (&share[..index], Some(&share[index + 1..])),
        _ => (share, None),
    }
}

/// Makes `path` absolute against the working directory and removes `.`/`..`.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the working directory")?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

impl ShareConfig {
    pub fn new(path: &Path) -> Result<Self> {
        Ok(Self {
            path: absolute(path)?,
            alias: None,
            append_default_alias: false,
            permissions: None,
            glob_permissions: BTreeMap::new(),
        })
    }

    pub fn with_alias(path: &Path, alias: &str) -> Result<Self> {
        Ok(Self {
            alias: Some(alias.to_string()),
            ..Self::new(path)?
        })
    }

    /// Alias derived from the shared path: drive punctuation dropped,
    /// separators turned into `/`, always rooted.
    pub fn default_alias(&self) -> String {
        let alias = self
            .path
            .to_string_lossy()
            .replace(':', "")
            .replace(MAIN_SEPARATOR, "/");
        if alias.starts_with('/') {
            alias
        } else {
            format!("/{}", alias)
        }
    }

    /// Alias the share is attached at.
    pub fn alias(&self) -> String {
        match (&self.alias, self.append_default_alias) {
            (Some(alias), true) => {
                format!("{}{}", alias.trim_end_matches('/'), self.default_alias())
            }
            (Some(alias), false) => alias.clone(),
            (None, _) => self.default_alias(),
        }
    }
}

impl ShareConfig {
    /// Attribute mapper for files served from this share.
    pub fn mapper(&self) -> Result<Arc<dyn PermissionsMapper>> {
        let base = self.permissions.clone().unwrap_or_default();
        if self.glob_permissions.is_empty() {
            return Ok(base.mapper());
        }
        let mapper = GlobPermissionsMapper::new(&base, &self.glob_permissions)
            .with_context(|| format!("Invalid glob permissions for {:?}", self.path))?;
        Ok(Arc::new(mapper))
    }
}

impl FromStr for ShareConfig {
    type Err = anyhow::Error;

    fn from_str(share: &str) -> Result<Self> {
        match split_share(share) {
            (path, Some(alias)) => Self::with_alias(Path::new(path), alias),
            (path, None) => Self::new(Path::new(path)),
        }
    }
}

/// Server configuration, usually read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Where the namespace is mounted
    pub mount_point: Option<PathBuf>,
    /// Attribute overrides of the root tree
    pub permissions: PermissionsConfig,
    /// Shares attached at startup
    pub shares: Vec<ShareConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        Ok(config)
    }
}
