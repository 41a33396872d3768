use std::io;
use std::sync::Arc;
use thiserror::Error;

use super::alias::Alias;
use super::backend::Backend;

/// Failures of attachment registry management.
#[derive(Debug, Error)]
pub enum AttachError {
    /// The backend instance already holds an alias
    #[error("backend is already attached at {0}")]
    AlreadyAttached(Alias),

    /// Another backend already occupies the alias
    #[error("alias {alias} is already occupied by {existing:?}")]
    AliasCollision {
        /// The contested alias
        alias: Alias,
        /// The backend currently attached there
        existing: Arc<dyn Backend>,
    },

    /// Nothing is attached at the alias
    #[error("no backend attached at {0}")]
    NoSuchAlias(Alias),

    /// The alias directory could not be created in the host tree
    #[error("failed to create alias directory {alias}: {source}")]
    Io {
        /// The alias being created
        alias: Alias,
        /// Underlying host error
        #[source]
        source: io::Error,
    },
}
