#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! aliasfs: a virtual filesystem composed of backends attached at aliases
//!
//! An in-memory root tree hosts the namespace. Every other filesystem is
//! attached at an absolute alias path; operations on handles are routed to
//! the backend that owns them, and listings of the root tree show each
//! attached backend's root in place of its alias directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aliasfs::{FilesystemManager, Namespace, PermissionsConfig, ShareConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let namespace = Arc::new(Namespace::new(&PermissionsConfig::default()));
//! let manager = FilesystemManager::new(namespace);
//!
//! // Serve /srv/photos at /media/photos
//! manager.share(&ShareConfig::with_alias(Path::new("/srv/photos"), "/media/photos")?)?;
//!
//! // Block until SIGINT/SIGTERM
//! manager.mount(Path::new("/mnt/tree"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Attach rules
//!
//! - A backend instance holds at most one alias
//! - An alias holds at most one backend; aliases are compared after
//!   normalization, so `/a/` and `/a/./b/..` are the same alias
//! - Detaching releases the backend; dropping the namespace detaches all

pub mod modules;

pub use modules::alias::Alias;
pub use modules::backend::{Backend, HostBackend};
pub use modules::config::{Config, ShareConfig};
pub use modules::error::AttachError;
pub use modules::handle::{HandleGenerator, ObjectHandle};
pub use modules::local::LocalFs;
pub use modules::memory::MemoryFs;
pub use modules::mount::FilesystemManager;
pub use modules::namespace::{Attachment, Namespace};
pub use modules::permission::PermissionsConfig;
pub use modules::proto::NamespaceFs;
