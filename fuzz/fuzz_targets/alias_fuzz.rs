#![no_main]
use aliasfs::Alias;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(path) = std::str::from_utf8(data) {
        let alias = Alias::new(path);
        assert!(alias.as_path().is_absolute());

        // Normalization is idempotent
        let again = Alias::new(alias.as_path());
        assert_eq!(alias, again);
    }
});
