//! Attaches two directories and an in-memory scratch tree, then prints the
//! merged namespace without mounting it.

use aliasfs::modules::backend::Verifier;
use aliasfs::{
    Backend, FilesystemManager, MemoryFs, Namespace, ObjectHandle, PermissionsConfig, ShareConfig,
};
use anyhow::Result;
use std::env;
use std::path::Path;
use std::sync::Arc;

fn print_tree(ns: &Namespace, dir: ObjectHandle, depth: usize, max_depth: usize) -> Result<()> {
    let stream = ns.list(dir, &Verifier::default(), 0)?;
    for entry in stream.entries {
        println!("{}{} ({})", "  ".repeat(depth), entry.name, entry.handle);
        if entry.attr.kind == fuser::FileType::Directory && depth < max_depth {
            print_tree(ns, entry.handle, depth + 1, max_depth)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let namespace = Arc::new(Namespace::new(&PermissionsConfig::default()));
    let manager = FilesystemManager::new(namespace.clone());

    let tmp = env::temp_dir();
    manager.share(&ShareConfig::with_alias(&tmp, "/shares/tmp")?)?;
    if let Some(home) = env::var_os("HOME") {
        manager.share(&ShareConfig::with_alias(Path::new(&home), "/shares/home")?)?;
    }

    let scratch: Arc<dyn Backend> = Arc::new(MemoryFs::new(
        namespace.handles().clone(),
        &PermissionsConfig::default(),
    ));
    namespace.attach(scratch, "/scratch")?;

    for attachment in namespace.attachments() {
        println!("{} -> {}", attachment.alias, attachment.backend.root_handle()?);
    }
    println!();
    print_tree(&namespace, namespace.root_handle()?, 0, 1)?;
    Ok(())
}
