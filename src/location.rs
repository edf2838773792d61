//! Page location resolution.
//!
//! Derives the two per-page values the rest of the pipeline consumes: the
//! base path (the `../` prefix that reaches the site root from the page's
//! directory depth) and the page identifier used for active-state matching.
//! Both are computed once per enrichment pass and carried by value in
//! [`PageLocation`] rather than stashed anywhere ambient.

/// Filename substituted when the URL path ends in a trailing slash.
const ROOT_FILENAME: &str = "index.html";

/// Extension stripped from filenames to produce page identifiers.
const HTML_EXT: &str = ".html";

/// Per-page location context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    /// Relative prefix reaching the site root: `""`, `"../"`, `"../../"`, …
    pub base_path: String,
    /// Current page identifier (filename without the `.html` extension).
    pub page_id: String,
}

impl PageLocation {
    /// Resolve a root-relative URL path such as `/evidence/research/index.html`.
    pub fn resolve(pathname: &str) -> Self {
        Self {
            base_path: base_path_for(pathname),
            page_id: page_id_for(pathname),
        }
    }
}

/// Compute the relative prefix to the site root for a URL path.
///
/// Splits on `/` and drops empty segments, which collapses leading,
/// trailing, and doubled slashes. A path with `n` non-empty segments yields
/// `n - 1` repetitions of `../`, floored at zero, so root-level pages get
/// the empty string. Always succeeds.
pub fn base_path_for(pathname: &str) -> String {
    let segments = pathname.split('/').filter(|s| !s.is_empty()).count();
    "../".repeat(segments.saturating_sub(1))
}

/// Derive the page identifier for a URL path.
///
/// Takes the substring after the final `/` — an empty tail means a
/// directory request and becomes `index.html` — then strips a trailing
/// `.html`. Always succeeds.
pub fn page_id_for(pathname: &str) -> String {
    let filename = match pathname.rsplit('/').next() {
        Some("") | None => ROOT_FILENAME,
        Some(name) => name,
    };
    filename
        .strip_suffix(HTML_EXT)
        .unwrap_or(filename)
        .to_owned()
}
