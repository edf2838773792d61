//! Active-page marking.
//!
//! A chrome container (primary nav, mobile panel, or footer) holds link
//! entries tagged with a `data-page` attribute. Marking scans the
//! container's subtree and toggles the active designation on every entry:
//! the one matching the current page id gains the `active` class and
//! `aria-current="page"`, every other one loses both — whether or not it
//! carried them before, so repeated calls converge on the same state.
//!
//! Containers are located by element id with plain text scanning, the same
//! way the rest of this crate treats pages: as text to be spliced, never a
//! parsed DOM.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Class token carried by the entry for the current page.
const ACTIVE_CLASS: &str = "active";

/// Opening tags that carry a `data-page` attribute.
static ENTRY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[A-Za-z][^>]*\bdata-page="([^"]*)"[^>]*>"#).expect("entry pattern compiles")
});

/// `class` attribute inside a single opening tag.
static CLASS_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bclass="([^"]*)""#).expect("class pattern compiles"));

/// `aria-current` attribute, with the whitespace that precedes it.
static ARIA_CURRENT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s*\baria-current="[^"]*""#).expect("aria pattern compiles"));

/// True when an element with the given id exists anywhere in the document.
///
/// This is the pre-rendered-chrome guard: pages may ship their navigation
/// inline, and injection must not duplicate it.
pub fn has_element_id(document: &str, id: &str) -> bool {
    document.contains(&format!(r#"id="{id}""#))
}

/// Re-mark the container identified by `container_id` for `page_id`.
///
/// A missing container is a no-op: the document comes back unchanged.
/// Entries outside the container are never touched, so each of the three
/// chrome containers can be marked independently as it appears.
pub fn mark_active(document: &str, container_id: &str, page_id: &str) -> String {
    let Some(extent) = container_extent(document, container_id) else {
        return document.to_owned();
    };

    let marked = ENTRY_TAG.replace_all(&document[extent.clone()], |caps: &Captures<'_>| {
        if &caps[1] == page_id {
            activate_entry(&caps[0])
        } else {
            deactivate_entry(&caps[0])
        }
    });

    let mut out = String::with_capacity(document.len() + 32);
    out.push_str(&document[..extent.start]);
    out.push_str(&marked);
    out.push_str(&document[extent.end..]);
    out
}

// ---------------------------------------------------------------------------
// Entry toggling
// ---------------------------------------------------------------------------

/// Give one opening tag the active designation.
///
/// `aria-current` is removed before re-adding so a stale value is replaced
/// rather than kept.
fn activate_entry(tag: &str) -> String {
    let tag = add_class(tag, ACTIVE_CLASS);
    let tag = ARIA_CURRENT_ATTR.replace(&tag, "").into_owned();
    insert_attr(&tag, r#"aria-current="page""#)
}

/// Strip the active designation from one opening tag.
fn deactivate_entry(tag: &str) -> String {
    let tag = remove_class(tag, ACTIVE_CLASS);
    ARIA_CURRENT_ATTR.replace(&tag, "").into_owned()
}

/// Add a class token to an opening tag, creating the attribute if needed.
pub(crate) fn add_class(tag: &str, class: &str) -> String {
    match CLASS_ATTR.captures(tag) {
        Some(caps) => {
            let existing = caps.get(1).expect("class capture group");
            if existing.as_str().split_whitespace().any(|t| t == class) {
                return tag.to_owned();
            }
            let mut out = String::with_capacity(tag.len() + class.len() + 1);
            out.push_str(&tag[..existing.end()]);
            if !existing.as_str().is_empty() {
                out.push(' ');
            }
            out.push_str(class);
            out.push_str(&tag[existing.end()..]);
            out
        }
        None => insert_attr(tag, &format!(r#"class="{class}""#)),
    }
}

/// Remove a class token from an opening tag. The attribute itself stays,
/// mirroring `classList.remove`.
fn remove_class(tag: &str, class: &str) -> String {
    let Some(caps) = CLASS_ATTR.captures(tag) else {
        return tag.to_owned();
    };
    let existing = caps.get(1).expect("class capture group");
    if !existing.as_str().split_whitespace().any(|t| t == class) {
        return tag.to_owned();
    }
    let kept: Vec<&str> = existing
        .as_str()
        .split_whitespace()
        .filter(|t| *t != class)
        .collect();
    format!(
        "{}{}{}",
        &tag[..existing.start()],
        kept.join(" "),
        &tag[existing.end()..]
    )
}

/// Insert an attribute just before the tag's closing delimiter.
pub(crate) fn insert_attr(tag: &str, attr: &str) -> String {
    let close = if tag.ends_with("/>") {
        tag.len() - 2
    } else {
        tag.len() - 1
    };
    format!("{} {attr}{}", tag[..close].trim_end(), &tag[close..])
}

// ---------------------------------------------------------------------------
// Container location
// ---------------------------------------------------------------------------

/// Byte range of the opening tag that carries `id="<id>"`.
pub(crate) fn opening_tag_range(document: &str, id: &str) -> Option<Range<usize>> {
    let attr_at = document.find(&format!(r#"id="{id}""#))?;
    let tag_start = document[..attr_at].rfind('<')?;
    let tag_end = document[tag_start..].find('>').map(|i| tag_start + i + 1)?;
    // The id we found must sit inside this tag, not in some later one.
    if attr_at > tag_end {
        return None;
    }
    Some(tag_start..tag_end)
}

/// Byte range of the whole container element identified by `id`, from its
/// opening `<` through its matching close tag.
///
/// Tracks same-name nesting so a `<div id="…">` holding inner `<div>`s ends
/// at the right close tag. Degrades predictably on malformed markup: a
/// self-closing container is just its tag, and an unclosed one runs to the
/// end of the document.
fn container_extent(document: &str, id: &str) -> Option<Range<usize>> {
    let open = opening_tag_range(document, id)?;
    let name: String = document[open.start + 1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if name.is_empty() {
        return None;
    }
    if document[..open.end].ends_with("/>") {
        return Some(open);
    }

    let open_marker = format!("<{name}");
    let close_marker = format!("</{name}");
    let mut depth = 1usize;
    let mut pos = open.end;

    loop {
        let next_open = find_tag_marker(&document[pos..], &open_marker);
        let next_close = find_tag_marker(&document[pos..], &close_marker);
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                let tag_at = pos + o;
                if !tag_is_self_closing(document, tag_at) {
                    depth += 1;
                }
                pos = tag_at + open_marker.len();
            }
            (_, Some(c)) => {
                let close_at = pos + c;
                depth -= 1;
                pos = close_at + close_marker.len();
                if depth == 0 {
                    let end = document[pos..].find('>').map(|i| pos + i + 1)?;
                    return Some(open.start..end);
                }
            }
            // No close tag left: clamp to the end of the document.
            (_, None) => return Some(open.start..document.len()),
        }
    }
}

/// Find `marker` at a position where it is a complete tag name, not a
/// prefix of a longer one (`<nav` must not match `<navigator`).
fn find_tag_marker(haystack: &str, marker: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(marker) {
        let at = from + rel;
        match haystack[at + marker.len()..].chars().next() {
            Some(c) if c.is_ascii_alphanumeric() || c == '-' => from = at + marker.len(),
            _ => return Some(at),
        }
    }
    None
}

/// True when the tag opening at `tag_at` ends in `/>`.
fn tag_is_self_closing(document: &str, tag_at: usize) -> bool {
    match document[tag_at..].find('>') {
        Some(i) => document[..tag_at + i + 1].ends_with("/>"),
        None => false,
    }
}
