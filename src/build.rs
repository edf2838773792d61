//! Batch enrichment of a site tree.
//!
//! Walks the site directory breadth-first and writes a mirror of it under
//! the output directory: every page enriched with the shared chrome, every
//! other file copied through untouched. Pages built this way ship their
//! navigation inline, so serving the output again (or re-building it) takes
//! the pre-rendered-navigation short circuit instead of re-injecting.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{SiteConfig, CONFIG_FILE};
use crate::enrich;

/// Directories never worth walking into.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", ".jj"];

/// Per-run tally, reported on stdout when the walk finishes.
#[derive(Debug, Default)]
struct BuildCounters {
    pages: usize,
    assets: usize,
    skipped: usize,
}

/// Enrich the site rooted at `dir` into `out`.
///
/// The output directory is created if needed and excluded from the walk, so
/// an `out` nested inside the site root does not feed back into itself. The
/// fragment templates and the config file stay behind: built pages carry
/// their chrome inline and have no further use for either.
pub async fn run_build(dir: String, out: String) -> io::Result<()> {
    let root = fs::canonicalize(&dir).map_err(|e| {
        eprintln!("Error: cannot open site root '{}': {}", dir, e);
        e
    })?;

    let config = SiteConfig::load(&root).map_err(|e| {
        eprintln!("Error: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e)
    })?;

    fs::create_dir_all(&out)?;
    let out_root = fs::canonicalize(&out)?;

    println!("sitechrome build");
    println!("root:  {}", root.display());
    println!("out:   {}", out_root.display());

    let mut counters = BuildCounters::default();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.clone());

    while let Some(current) = queue.pop_front() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!(
                    "[build] skipping path='{}' reason='read-error: {}'",
                    current.display(),
                    e
                );
                continue;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();

            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if SKIP_DIRS.contains(&name) || path == out_root {
                    continue;
                }
                queue.push_back(path);
                continue;
            }

            let rel = match path.strip_prefix(&root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if rel == CONFIG_FILE
                || rel == config.chrome.nav_template
                || rel == config.chrome.footer_template
            {
                eprintln!("[build] path={rel} branch=omitted");
                counters.skipped += 1;
                continue;
            }

            let dest = out_root.join(Path::new(&rel));
            if let Some(parent) = dest.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!("[build] path={rel} branch=error reason='mkdir: {e}'");
                    counters.skipped += 1;
                    continue;
                }
            }

            if is_page(&path) {
                match build_page(&path, &rel, &dest, &root, &config).await {
                    Ok(()) => counters.pages += 1,
                    Err(e) => {
                        eprintln!("[build] path={rel} branch=error reason='{e}'");
                        counters.skipped += 1;
                    }
                }
            } else {
                match fs::copy(&path, &dest) {
                    Ok(_) => counters.assets += 1,
                    Err(e) => {
                        eprintln!("[build] path={rel} branch=error reason='copy: {e}'");
                        counters.skipped += 1;
                    }
                }
            }
        }
    }

    eprintln!(
        "[build] pages={} assets={} skipped={}",
        counters.pages, counters.assets, counters.skipped
    );
    println!(
        "built {} pages, {} assets ({} skipped)",
        counters.pages, counters.assets, counters.skipped
    );
    Ok(())
}

/// Enrich a single page and write it to its destination.
async fn build_page(
    path: &Path,
    rel: &str,
    dest: &Path,
    root: &Path,
    config: &SiteConfig,
) -> io::Result<()> {
    let content = fs::read_to_string(path)?;
    let pathname = format!("/{rel}");
    let page = enrich::enrich_page(&content, &pathname, root, config).await;
    fs::write(dest, page)?;
    eprintln!("[build] path={rel} branch=enriched");
    Ok(())
}

/// `.html`/`.htm` files are pages; everything else passes through.
fn is_page(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAV_TEMPLATE: &str = concat!(
        "<nav id=\"site-nav\">\n",
        "<a data-page=\"index\" href=\"index.html\">Home</a>\n",
        "<a data-page=\"search\" href=\"database/search.html\">Search</a>\n",
        "</nav>\n",
    );

    const PAGE: &str = "<!DOCTYPE html>\n<body>\n<main>x</main>\n</body>\n";

    fn fixture(tag: &str) -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!("sitechrome_build_{tag}_{}", std::process::id()));
        let root = base.join("site");
        let sub = root.join("database");
        fs::create_dir_all(&sub).unwrap();
        fs::write(root.join("nav_template.html"), NAV_TEMPLATE).unwrap();
        fs::write(root.join("index.html"), PAGE).unwrap();
        fs::write(sub.join("search.html"), PAGE).unwrap();
        fs::write(root.join("style.css"), "body{}\n").unwrap();
        (base, root)
    }

    // --- run_build ---

    #[tokio::test]
    async fn output_tree_mirrors_input_with_enriched_pages() {
        let (base, root) = fixture("mirror");
        let out = base.join("dist");

        run_build(
            root.to_string_lossy().into_owned(),
            out.to_string_lossy().into_owned(),
        )
        .await
        .expect("build succeeds");

        let index = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.contains("id=\"site-nav\""), "got: {index}");
        assert!(index.contains(r#"href="index.html""#), "root links unprefixed: {index}");

        let search = fs::read_to_string(out.join("database/search.html")).unwrap();
        assert!(
            search.contains(r#"href="../index.html""#),
            "subdir links must be depth-prefixed: {search}"
        );
        assert!(
            search.contains("<script>window.__basePath=\"../\";</script>"),
            "got: {search}"
        );

        assert_eq!(fs::read_to_string(out.join("style.css")).unwrap(), "body{}\n");
        assert!(
            !out.join("nav_template.html").exists(),
            "fragment template must not be copied"
        );

        let _ = fs::remove_dir_all(&base);
    }

    #[tokio::test]
    async fn output_inside_root_is_not_rewalked() {
        let (base, root) = fixture("nested");
        let out = root.join("dist");

        run_build(
            root.to_string_lossy().into_owned(),
            out.to_string_lossy().into_owned(),
        )
        .await
        .expect("build succeeds");

        assert!(out.join("index.html").exists());
        assert!(
            !out.join("dist").exists(),
            "output directory recursed into itself"
        );

        let _ = fs::remove_dir_all(&base);
    }

    // --- is_page ---

    #[test]
    fn page_detection_is_extension_based() {
        assert!(is_page(Path::new("a/b.html")));
        assert!(is_page(Path::new("a/B.HTM")));
        assert!(!is_page(Path::new("a/b.css")));
        assert!(!is_page(Path::new("a/b")));
    }
}
