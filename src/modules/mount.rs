use super::backend::Backend;
use super::config::{Config, ShareConfig};
use super::local::LocalFs;
use super::namespace::{Attachment, Namespace};
use super::proto::NamespaceFs;
use anyhow::{Context, Result};
use fuser::MountOption;
use libc::{SIGINT, SIGTERM};
use log::info;
use signal_hook::iterator::Signals;
use std::path::Path;
use std::sync::Arc;

/// Owns a namespace and exposes it through FUSE.
pub struct FilesystemManager {
    namespace: Arc<Namespace>,
}

impl FilesystemManager {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self { namespace }
    }

    /// Builds a namespace from `config` and attaches every configured share.
    pub fn from_config(config: &Config) -> Result<Self> {
        let manager = Self::new(Arc::new(Namespace::new(&config.permissions)));
        for share in &config.shares {
            manager.share(share)?;
        }
        Ok(manager)
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Serves the directory of `share` at its alias.
    pub fn share(&self, share: &ShareConfig) -> Result<Attachment> {
        let mapper = share.mapper()?;
        let backend = LocalFs::new(&share.path, self.namespace.handles().clone(), mapper)
            .with_context(|| format!("Cannot share {:?}", share.path))?;

        let alias = share.alias();
        let attachment = self
            .namespace
            .attach(Arc::new(backend), &alias)
            .with_context(|| format!("Cannot attach {:?} at {}", share.path, alias))?;
        info!("Sharing {:?} at {}", share.path, attachment.alias);
        Ok(attachment)
    }

    /// Stops serving whatever is attached at `alias`.
    pub fn unshare(&self, alias: &str) -> Result<Arc<dyn Backend>> {
        let backend = self.namespace.detach(alias)?;
        info!("Stopped sharing {}", alias);
        Ok(backend)
    }

    /// Mounts the namespace at `mount_point` and blocks until SIGINT or
    /// SIGTERM, then unmounts and releases every attachment.
    pub fn mount(&self, mount_point: &Path) -> Result<()> {
        if !mount_point.is_dir() {
            anyhow::bail!("Mount point does not exist: {:?}", mount_point);
        }
        let fs = NamespaceFs::new(self.namespace.clone())?;
        let options = [
            MountOption::FSName("aliasfs".to_string()),
            MountOption::DefaultPermissions,
        ];

        let session = fuser::spawn_mount2(fs, mount_point, &options)
            .with_context(|| format!("Failed to mount at {:?}", mount_point))?;
        info!("Mounted namespace at {:?}", mount_point);

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, unmounting...", sig);
        }

        drop(session);
        self.namespace.detach_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::permission::PermissionsConfig;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_manager() -> FilesystemManager {
        FilesystemManager::new(Arc::new(Namespace::new(&PermissionsConfig::default())))
    }

    fn create_temp_dir_with_files() -> Result<TempDir> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("test.txt"), "test content")?;
        Ok(dir)
    }

    #[test]
    fn test_share_directory() -> Result<()> {
        let manager = setup_test_manager();
        let source_dir = create_temp_dir_with_files()?;

        let share = ShareConfig::with_alias(source_dir.path(), "/data")?;
        let attachment = manager.share(&share)?;
        assert_eq!(attachment.alias.as_path(), Path::new("/data"));

        let ns = manager.namespace();
        let data = ns.lookup(ns.root_handle()?, "data")?;
        let file = ns.lookup(data, "test.txt")?;
        let mut buf = [0u8; 64];
        let n = ns.read(file, &mut buf, 0)?;
        assert_eq!(&buf[..n], b"test content");
        Ok(())
    }

    #[test]
    fn test_share_default_alias() -> Result<()> {
        let manager = setup_test_manager();
        let source_dir = create_temp_dir_with_files()?;

        let share = ShareConfig::new(source_dir.path())?;
        let attachment = manager.share(&share)?;
        assert_eq!(attachment.alias.to_string(), share.default_alias());
        Ok(())
    }

    #[test]
    fn test_share_collision() -> Result<()> {
        let manager = setup_test_manager();
        let first = create_temp_dir_with_files()?;
        let second = create_temp_dir_with_files()?;

        manager.share(&ShareConfig::with_alias(first.path(), "/data")?)?;
        let err = manager
            .share(&ShareConfig::with_alias(second.path(), "/data/")?)
            .unwrap_err();
        assert!(err.to_string().contains("Cannot attach"));
        assert_eq!(manager.namespace().attachments().len(), 1);
        Ok(())
    }

    #[test]
    fn test_share_missing_directory() {
        let manager = setup_test_manager();
        let share = ShareConfig::with_alias(Path::new("/nonexistent/share"), "/x").unwrap();
        assert!(manager.share(&share).is_err());
        assert!(manager.namespace().attachments().is_empty());
    }

    #[test]
    fn test_unshare() -> Result<()> {
        let manager = setup_test_manager();
        let source_dir = create_temp_dir_with_files()?;

        manager.share(&ShareConfig::with_alias(source_dir.path(), "/data")?)?;
        manager.unshare("/data")?;
        assert!(manager.namespace().attachments().is_empty());
        assert!(manager.unshare("/data").is_err());
        Ok(())
    }

    #[test]
    fn test_from_config() -> Result<()> {
        let a = create_temp_dir_with_files()?;
        let b = create_temp_dir_with_files()?;
        let config = Config {
            shares: vec![
                ShareConfig::with_alias(a.path(), "/a")?,
                ShareConfig::with_alias(b.path(), "/b")?,
            ],
            ..Config::default()
        };

        let manager = FilesystemManager::from_config(&config)?;
        assert_eq!(manager.namespace().attachments().len(), 2);
        Ok(())
    }

    #[test]
    fn test_mount_missing_point() {
        let manager = setup_test_manager();
        assert!(manager.mount(Path::new("/nonexistent/mount")).is_err());
    }
}
