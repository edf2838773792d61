//! The per-page enrichment sequence.
//!
//! One pass per page load, in fixed order: resolve the page location, short
//! circuit on pre-rendered navigation, inject the navigation and footer
//! fragments, publish the base-path global, append the dependent scripts.
//! The pass never fails — every degraded branch (unreadable fragment,
//! absent container) leaves the rest of the page intact, and the page's
//! primary content is never touched at all.

use std::path::Path;

use crate::config::SiteConfig;
use crate::inject::{self, InsertAt};
use crate::location::PageLocation;
use crate::marker;
use crate::rewrite;

/// Enrich one page of HTML, identified by its root-relative URL path.
///
/// `root` is the directory fragments are fetched from. The two fragment
/// reads are issued together and may complete in either order; each failure
/// suppresses only its own injection.
pub async fn enrich_page(
    document: &str,
    pathname: &str,
    root: &Path,
    config: &SiteConfig,
) -> String {
    let location = PageLocation::resolve(pathname);

    // Pages shipping pre-rendered navigation: no fetches at all. Re-mark
    // the containers that are already there and go straight to the
    // dependent scripts.
    if marker::has_element_id(document, &config.chrome.nav_id) {
        eprintln!("[enrich] path={pathname} branch=preexisting-nav");
        let mut page = document.to_owned();
        for id in [
            &config.chrome.nav_id,
            &config.chrome.mobile_panel_id,
            &config.chrome.footer_id,
        ] {
            page = marker::mark_active(&page, id, &location.page_id);
        }
        return append_scripts(&page, &location, config, true);
    }

    let (nav, footer) = tokio::join!(
        inject::fetch_fragment(root, &config.chrome.nav_template),
        inject::fetch_fragment(root, &config.chrome.footer_template),
    );

    let mut page = document.to_owned();
    let mut nav_present = false;

    if let Some(text) = nav {
        let mut fragment = rewrite::rewrite_links(&text, &location.base_path);
        // Fullscreen pages get the nav floating over their content. Only a
        // freshly fetched nav is eligible; pre-rendered navs keep whatever
        // the page author gave them.
        if inject::is_fullscreen_page(document) {
            fragment = inject::add_overlay_class(&fragment, &config.chrome.nav_id);
        }
        fragment = marker::mark_active(&fragment, &config.chrome.nav_id, &location.page_id);
        fragment = marker::mark_active(&fragment, &config.chrome.mobile_panel_id, &location.page_id);
        page = inject::insert_fragment(&page, &fragment, InsertAt::BodyStart);
        nav_present = true;
        eprintln!(
            "[enrich] path={pathname} inject=nav base_path={:?}",
            location.base_path
        );
    }

    // The footer carries its own existence check, separate from the nav's.
    if !marker::has_element_id(&page, &config.chrome.footer_id) {
        if let Some(text) = footer {
            let mut fragment = rewrite::rewrite_links(&text, &location.base_path);
            fragment = marker::mark_active(&fragment, &config.chrome.footer_id, &location.page_id);
            page = inject::insert_fragment(&page, &fragment, InsertAt::BodyEnd);
            eprintln!("[enrich] path={pathname} inject=footer");
        }
    }

    append_scripts(&page, &location, config, nav_present)
}

/// Publish the base-path global and append the deferred dependent scripts.
///
/// The global assignment precedes both script tags in document order, so a
/// dependent script can always read it. The menu-toggle script rides on
/// navigation markup existing — pre-rendered or freshly injected — while
/// live-stats is appended unconditionally, exactly once per pass.
fn append_scripts(
    document: &str,
    location: &PageLocation,
    config: &SiteConfig,
    nav_present: bool,
) -> String {
    let mut tags = format!(
        "<script>window.{}={};</script>\n",
        config.scripts.base_path_global,
        js_string(&location.base_path),
    );
    if nav_present {
        tags.push_str(&script_tag(&location.base_path, &config.scripts.menu_toggle));
    }
    tags.push_str(&script_tag(&location.base_path, &config.scripts.live_stats));
    inject::insert_fragment(document, &tags, InsertAt::BodyEnd)
}

/// A deferred script reference resolved against the base path.
fn script_tag(base_path: &str, name: &str) -> String {
    format!("<script src=\"{base_path}{name}\" defer></script>\n")
}

/// Quote a value as a JS double-quoted string literal. Base paths are only
/// ever `../` repetitions, but the escaping is kept explicit anyway.
fn js_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
