//! Attribute mapping policies injected into backends.

use fuser::{FileAttr, FileType};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Ownership and mode overrides applied to every attribute a backend reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PermissionsConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub dir_mode: Option<u16>,
    pub file_mode: Option<u16>,
}

impl PermissionsConfig {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fields of `self`, falling back to `base` where unset.
    pub fn or(&self, base: &PermissionsConfig) -> PermissionsConfig {
        PermissionsConfig {
            uid: self.uid.or(base.uid),
            gid: self.gid.or(base.gid),
            dir_mode: self.dir_mode.or(base.dir_mode),
            file_mode: self.file_mode.or(base.file_mode),
        }
    }

    /// Builds the mapper matching this configuration.
    pub fn mapper(&self) -> Arc<dyn PermissionsMapper> {
        if self.is_empty() {
            Arc::new(NativePermissions)
        } else {
            Arc::new(SimplePermissionsMapper::new(self.clone()))
        }
    }
}

/// Rewrites the ownership and permission bits of attributes.
pub trait PermissionsMapper: Send + Sync + fmt::Debug {
    fn map(&self, attr: &mut FileAttr);

    /// Maps the attributes of the object at `relative`, a path below the
    /// backend root.
    fn map_at(&self, _relative: &Path, attr: &mut FileAttr) {
        self.map(attr)
    }
}

/// Reports attributes exactly as the storage medium has them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePermissions;

impl PermissionsMapper for NativePermissions {
    fn map(&self, _attr: &mut FileAttr) {}
}

/// Applies fixed overrides from a [`PermissionsConfig`].
#[derive(Debug, Clone)]
pub struct SimplePermissionsMapper {
    config: PermissionsConfig,
}

impl SimplePermissionsMapper {
    pub fn new(config: PermissionsConfig) -> Self {
        Self { config }
    }
}

impl PermissionsMapper for SimplePermissionsMapper {
    fn map(&self, attr: &mut FileAttr) {
        if let Some(uid) = self.config.uid {
            attr.uid = uid;
        }
        if let Some(gid) = self.config.gid {
            attr.gid = gid;
        }
        let mode = match attr.kind {
            FileType::Directory => self.config.dir_mode,
            // Symlink modes are not meaningful
            FileType::Symlink => None,
            _ => self.config.file_mode,
        };
        if let Some(mode) = mode {
            attr.perm = mode & 0o7777;
        }
    }
}

/// Picks overrides by matching the backend-relative path against globs.
///
/// Globs are tried in key order and the first match wins; its fields fall
/// back to the base configuration. Paths matching no glob get the base.
#[derive(Debug)]
pub struct GlobPermissionsMapper {
    globs: GlobSet,
    mappers: Vec<Arc<dyn PermissionsMapper>>,
    base: Arc<dyn PermissionsMapper>,
}

impl GlobPermissionsMapper {
    pub fn new(
        base: &PermissionsConfig,
        globs: &BTreeMap<String, PermissionsConfig>,
    ) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        let mut mappers = Vec::with_capacity(globs.len());
        for (pattern, config) in globs {
            builder.add(Glob::new(pattern)?);
            mappers.push(config.or(base).mapper());
        }
        Ok(Self {
            globs: builder.build()?,
            mappers,
            base: base.mapper(),
        })
    }
}

impl PermissionsMapper for GlobPermissionsMapper {
    fn map(&self, attr: &mut FileAttr) {
        self.base.map(attr)
    }

    fn map_at(&self, relative: &Path, attr: &mut FileAttr) {
        match self.globs.matches(relative).into_iter().min() {
            Some(index) => self.mappers[index].map(attr),
            None => self.base.map(attr),
        }
    }
}
