use std::path::Path;
use std::sync::Arc;
use zext_core::provider::{SourceSpec, StageContext};
use zext_core::{CancellationToken, FormatProvider, ProviderRegistry, StageError};

#[derive(Debug)]
struct FakeProvider {
    name: &'static str,
    extensions: &'static [&'static str],
}

impl FakeProvider {
    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e))
            .unwrap_or(false)
    }
}

impl FormatProvider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_extract(&self, path: &Path) -> bool {
        self.matches(path)
    }

    fn can_compress_from(&self, _path: &Path) -> bool {
        true
    }

    fn can_compress_as_destination(&self, path: &Path) -> bool {
        self.matches(path)
    }

    fn extractable_extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn compressible_extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn compressible_source_extensions(&self) -> SourceSpec {
        SourceSpec::Any
    }

    fn supports_piped_conflict_detection(&self) -> bool {
        true
    }

    fn scan_conflicts(
        &self,
        _source: &Path,
        _destination: &Path,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, StageError> {
        Ok(Vec::new())
    }

    fn extract(
        &self,
        _source: &Path,
        _destination: &Path,
        _ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn compress(
        &self,
        _source: &Path,
        _destination: &Path,
        _ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        Ok(())
    }
}

fn registry() -> ProviderRegistry {
    ProviderRegistry::new(vec![
        Arc::new(FakeProvider {
            name: "first",
            extensions: &["foo", "one"],
        }),
        Arc::new(FakeProvider {
            name: "second",
            extensions: &["foo", "two"],
        }),
    ])
}

#[test]
fn test_extraction_lookup_last_match_wins() {
    let registry = registry();
    let found = registry.find_for_extraction(Path::new("x.foo")).unwrap();
    assert_eq!(found.name(), "second");
}

#[test]
fn test_extraction_lookup_single_and_no_match() {
    let registry = registry();
    assert_eq!(
        registry.find_for_extraction(Path::new("x.one")).unwrap().name(),
        "first"
    );
    assert_eq!(
        registry.find_for_extraction(Path::new("x.two")).unwrap().name(),
        "second"
    );
    assert!(registry.find_for_extraction(Path::new("x.bar")).is_none());
}

#[test]
fn test_aggregated_extensions_are_deduplicated() {
    let registry = registry();
    let exts = registry.all_extractable_extensions();
    assert_eq!(exts.iter().filter(|e| e.as_str() == "foo").count(), 1);
    assert!(registry.is_extractable_extension("TWO"));
    assert!(!registry.is_compressible_extension("bar"));
}

#[test]
fn test_default_registry_covers_shipped_formats() {
    let registry = ProviderRegistry::with_defaults();
    for ext in ["zip", "7z", "jar", "xz", "gz", "zst", "br", "tar"] {
        assert!(registry.is_extractable_extension(ext), "{ext}");
    }
    for ext in ["7z", "jar"] {
        assert!(!registry.is_compressible_extension(ext), "{ext}");
    }
}

#[test]
fn test_compression_destination_lookup_first_match_wins() {
    let registry = registry();
    let found = registry
        .find_for_compression_destination(Path::new("x.foo"))
        .unwrap();
    assert_eq!(found.name(), "first");
    assert_eq!(
        registry
            .find_for_compression_destination(Path::new("x.two"))
            .unwrap()
            .name(),
        "second"
    );
    assert!(registry
        .find_for_compression_destination(Path::new("x.bar"))
        .is_none());

    let defaults = ProviderRegistry::with_defaults();
    assert_eq!(
        defaults
            .find_for_compression_destination(Path::new("backup.tar"))
            .unwrap()
            .name(),
        "tar"
    );
    assert!(defaults
        .find_for_compression_destination(Path::new("backup.7z"))
        .is_none());
}
