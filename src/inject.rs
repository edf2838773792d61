//! Fragment fetch and insertion.
//!
//! Fragments are plain HTML files read from the site root once per page
//! load and spliced into the host document as text. Fetch failure is not an
//! error here: chrome is a progressive enhancement, so a fragment that
//! cannot be read simply never appears and the page ships without it.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::marker;

/// Class added to a freshly injected nav container on fullscreen pages,
/// letting it float over the content instead of reserving layout space.
pub const OVERLAY_CLASS: &str = "nav-overlay";

/// Bare attribute on `<body>` declaring an immersive fullscreen page.
static FULLSCREEN_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\sdata-fullscreen(?:\s|=|/|$)").expect("fullscreen pattern compiles")
});

/// Where an injected fragment lands in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Immediately after the opening `<body …>` tag (navigation).
    BodyStart,
    /// Immediately before the `</body>` close tag (footer, scripts).
    BodyEnd,
}

/// Read a fragment template from the site root.
///
/// Every failure — missing file, permission, non-UTF-8 — collapses into
/// `None` and one stderr line. Callers skip the injection and move on; no
/// distinction is kept between the failure kinds.
pub async fn fetch_fragment(root: &Path, name: &str) -> Option<String> {
    match tokio::fs::read_to_string(root.join(name)).await {
        Ok(text) => Some(text),
        Err(e) => {
            eprintln!(
                "[inject] fragment={name} status=skipped reason={:?}",
                e.kind()
            );
            None
        }
    }
}

/// Splice `fragment` into `document` at `position`.
///
/// A document without a `<body>` tag degrades to prepending or appending
/// the raw text, so chrome still lands on partial documents.
pub fn insert_fragment(document: &str, fragment: &str, position: InsertAt) -> String {
    let at = match position {
        InsertAt::BodyStart => body_open_end(document).unwrap_or(0),
        InsertAt::BodyEnd => body_close_start(document).unwrap_or(document.len()),
    };
    let mut out = String::with_capacity(document.len() + fragment.len());
    out.push_str(&document[..at]);
    out.push_str(fragment);
    out.push_str(&document[at..]);
    out
}

/// True when the page's `<body>` tag carries the `data-fullscreen` marker.
pub fn is_fullscreen_page(document: &str) -> bool {
    let Some(tag_start) = find_body_tag(document) else {
        return false;
    };
    let Some(tag_end) = document[tag_start..].find('>') else {
        return false;
    };
    FULLSCREEN_ATTR.is_match(&document[tag_start..tag_start + tag_end])
}

/// Add the overlay class to the container tagged `id="<container_id>"`
/// inside a freshly fetched fragment. Missing container: unchanged.
pub fn add_overlay_class(fragment: &str, container_id: &str) -> String {
    let Some(tag) = marker::opening_tag_range(fragment, container_id) else {
        return fragment.to_owned();
    };
    let rewritten = marker::add_class(&fragment[tag.clone()], OVERLAY_CLASS);
    let mut out = String::with_capacity(fragment.len() + OVERLAY_CLASS.len() + 8);
    out.push_str(&fragment[..tag.start]);
    out.push_str(&rewritten);
    out.push_str(&fragment[tag.end..]);
    out
}

// ---------------------------------------------------------------------------
// Body tag location
// ---------------------------------------------------------------------------

/// Byte offset of the `<body` tag, skipping near-misses like `<bodyguard`.
fn find_body_tag(document: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = document[from..].find("<body") {
        let at = from + rel;
        match document[at + 5..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_ascii_whitespace() => return Some(at),
            _ => from = at + 5,
        }
    }
    None
}

/// Offset just past the `>` of the opening body tag.
fn body_open_end(document: &str) -> Option<usize> {
    let start = find_body_tag(document)?;
    document[start..].find('>').map(|i| start + i + 1)
}

/// Offset of the `</body>` close tag.
fn body_close_start(document: &str) -> Option<usize> {
    document.rfind("</body>")
}
