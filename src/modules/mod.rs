//! Core filesystem modules.
//!
//! - `backend`: operation set every attachable filesystem implements
//! - `namespace`: alias registry and request routing
//! - `listing`: merged directory listings of the host tree
//! - `memory`, `local`: in-memory root tree and local directory backends
//! - `proto`: FUSE presentation of a namespace
//! - `mount`: sharing directories and mounting the namespace

pub mod alias;
pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod handle;
pub mod listing;
pub mod local;
pub mod memory;
pub mod mount;
pub mod namespace;
pub mod permission;
pub mod proto;
