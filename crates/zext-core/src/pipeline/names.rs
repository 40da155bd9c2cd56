//! File name parsing for compound extensions
//!
//! Everything here works on plain strings so the walk rules can be tested
//! without touching the filesystem.

/// Split a file name at its first dot.
///
/// `"backup.tar.gz"` gives `("backup", ["tar", "gz"])`. A name without a dot
/// has no extensions. Empty segments (as in `"a..gz"`) are kept so that the
/// walk stops on them.
pub fn split_extensions(file_name: &str) -> (&str, Vec<&str>) {
    match file_name.split_once('.') {
        Some((base, tail)) => (base, tail.split('.').collect()),
        None => (file_name, Vec::new()),
    }
}

/// Drop the final `.ext` from a name, if any
pub fn strip_last_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Extensions an extraction chain consumes, outermost first.
///
/// The walk goes from the rightmost extension leftwards and stops at the
/// first extension that equals `stop_at` (case-insensitive) or that
/// `is_supported` rejects.
pub fn extraction_walk<'a, F>(
    extensions: &[&'a str],
    stop_at: Option<&str>,
    is_supported: F,
) -> Vec<&'a str>
where
    F: Fn(&str) -> bool,
{
    let mut consumed = Vec::new();
    for ext in extensions.iter().rev() {
        if stop_at.is_some_and(|stop| ext.eq_ignore_ascii_case(stop)) || !is_supported(ext) {
            break;
        }
        consumed.push(*ext);
    }
    consumed
}

/// Extensions a compression chain has to apply, outermost first.
///
/// The walk goes from the rightmost destination extension leftwards and
/// stops at the first extension that is unsupported or equal to the last
/// extension the source already carries; that extension and everything to
/// its left pass through unchanged.
pub fn compression_walk<'a, F>(
    destination_extensions: &[&'a str],
    source_last_extension: Option<&str>,
    is_supported: F,
) -> Vec<&'a str>
where
    F: Fn(&str) -> bool,
{
    let mut consumed = Vec::new();
    for ext in destination_extensions.iter().rev() {
        let passthrough = source_last_extension.is_some_and(|src| ext.eq_ignore_ascii_case(src));
        if passthrough || !is_supported(ext) {
            break;
        }
        consumed.push(*ext);
    }
    consumed
}
