//! Relative-link rewriting for injected fragments.
//!
//! Fragment templates are written as if they lived at the site root. When a
//! page deeper in the tree receives one, every same-site `.html` link must
//! be prefixed with the page's base path or it would resolve against the
//! page's own directory instead of the root.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Matches any `href` attribute. Filtering happens in [`rewritten_href`] so
/// the exclusion rules live in one inspectable place.
static HREF_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("href pattern compiles"));

/// Rewrite the same-site `.html` links of a fragment for a page whose
/// location yields `base_path`.
///
/// An empty base path means the page already sits at the root; the fragment
/// is returned unchanged.
pub fn rewrite_links(fragment: &str, base_path: &str) -> String {
    if base_path.is_empty() {
        return fragment.to_owned();
    }
    HREF_ATTR
        .replace_all(fragment, |caps: &Captures<'_>| {
            match rewritten_href(&caps[1], base_path) {
                Some(href) => format!(r#"href="{href}""#),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// Decide whether a single href value gets the prefix.
///
/// Values that are already correct at any page depth are left alone:
/// absolute URLs, in-page anchors, and mail links. Everything else whose
/// path part — before any `#` or `?` — ends in `.html` is prefixed.
fn rewritten_href(href: &str, base_path: &str) -> Option<String> {
    if href.starts_with("http://")
        || href.starts_with("https://")
        || href.starts_with('#')
        || href.starts_with("mailto:")
    {
        return None;
    }

    let path_part = match href.find(|c| c == '#' || c == '?') {
        Some(pos) => &href[..pos],
        None => href,
    };
    if !path_part.ends_with(".html") {
        return None;
    }

    Some(format!("{base_path}{href}"))
}
