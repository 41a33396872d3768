#![no_main]
use aliasfs::modules::config::split_share;
use aliasfs::{Alias, ShareConfig};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::path::Path;

#[derive(Debug, Arbitrary)]
struct ShareInput {
    path: String,
    alias: Option<String>,
    append_default_alias: bool,
    json: String,
}

fuzz_target!(|input: ShareInput| {
    // Parse as a command line descriptor
    let descriptor = match &input.alias {
        Some(alias) => format!("{}:{}", input.path, alias),
        None => input.path.clone(),
    };
    let (path, alias) = split_share(&descriptor);
    assert!(descriptor.starts_with(path));
    if let Some(alias) = alias {
        assert_eq!(path.len() + 1 + alias.len(), descriptor.len());
    }
    if let Ok(share) = descriptor.parse::<ShareConfig>() {
        assert!(share.default_alias().starts_with('/'));
        let _ = share.alias();
    }

    // Build directly and resolve the attach alias
    if let Ok(mut share) = ShareConfig::new(Path::new(&input.path)) {
        share.alias = input.alias.clone();
        share.append_default_alias = input.append_default_alias;
        assert!(Alias::new(share.alias()).as_path().is_absolute());
    }

    // Parse as a config file entry
    if let Ok(share) = serde_json::from_str::<ShareConfig>(&input.json) {
        let _ = share.alias();
        let _ = share.mapper();
    }
});
