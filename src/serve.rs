use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::Response,
    Router,
};
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::config::SiteConfig;
use crate::enrich;

/// Maximum number of consecutive ports to try before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

/// Maximum file size that will be read and served (16 MiB).
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Shared application state passed to all request handlers via `Arc<AppState>`.
pub struct AppState {
    /// Site root directory pages and fragments are served from.
    pub serve_root: PathBuf,
    /// Canonicalized `serve_root` used for symlink-safe containment checks.
    pub canonical_root: PathBuf,
    /// Chrome configuration loaded at startup.
    pub config: SiteConfig,
}

/// Attempt to bind a TCP listener on `bind_addr` starting at `start_port`.
///
/// On `EADDRINUSE` the port is incremented by one and the attempt is retried
/// up to `MAX_PORT_ATTEMPTS` times. Any other OS error causes an immediate
/// failure without further retries.
pub fn bind_with_retry(bind_addr: &str, start_port: u16) -> Result<(TcpListener, u16), String> {
    let mut port = start_port;
    eprintln!("[bind] trying port={}", port);
    for _ in 0..MAX_PORT_ATTEMPTS {
        let addr = format!("{}:{}", bind_addr, port);
        match TcpListener::bind(&addr) {
            Ok(listener) => {
                eprintln!("[bind] success port={}", port);
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let next = port.wrapping_add(1);
                eprintln!("[bind] EADDRINUSE, trying {}", next);
                port = next;
            }
            Err(e) => {
                return Err(format!("bind {}:{} failed: {}", bind_addr, port, e));
            }
        }
    }
    Err(format!(
        "exhausted {} port candidates starting at {}; all ports in use",
        MAX_PORT_ATTEMPTS, start_port,
    ))
}

// ---------------------------------------------------------------------------
// Path resolution helpers
// ---------------------------------------------------------------------------

/// Percent-decode a URL path byte-by-byte.
///
/// Returns `Err(())` if the encoding is malformed (truncated `%XX` sequence
/// or non-hex digit) or if the decoded byte sequence is not valid UTF-8.
pub fn percent_decode(encoded: &str) -> Result<String, ()> {
    let bytes = encoded.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(()); // truncated sequence
            }
            let hi = hex_digit(bytes[i + 1])?;
            let lo = hex_digit(bytes[i + 2])?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ())
}

fn hex_digit(b: u8) -> Result<u8, ()> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(()),
    }
}

/// Normalize a decoded URL path, stripping `.` and `..` components.
///
/// Splits on `/`, ignores empty components and `.`, resolves `..` by popping
/// the stack. Returns `None` if a `..` would escape the root (stack
/// underflow), which signals a path-traversal attempt.
pub fn normalize_path(decoded: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return None;
                }
            }
            name => parts.push(name),
        }
    }
    let mut path = PathBuf::new();
    for part in &parts {
        path.push(part);
    }
    Some(path)
}

/// Derive the `Content-Type` value from a file extension (case-insensitive).
///
/// Returns `application/octet-stream` for any unrecognised extension so that
/// browsers never perform MIME sniffing on unknown types.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Attempt to resolve a candidate path to an existing file.
///
/// Resolution order:
/// 1. `candidate` itself (exact file).
/// 2. If `candidate` is a directory: `candidate/index.html`.
/// 3. If `candidate` has no extension: `candidate.html` (extensionless).
///
/// Returns `(resolved_path, branch_name)` on success, `None` if not found.
async fn resolve_candidate(candidate: &Path) -> Option<(PathBuf, &'static str)> {
    match tokio::fs::metadata(candidate).await {
        Ok(meta) if meta.is_file() => {
            return Some((candidate.to_path_buf(), "exact"));
        }
        Ok(meta) if meta.is_dir() => {
            let index = candidate.join("index.html");
            if tokio::fs::metadata(&index)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some((index, "index"));
            }
            return None;
        }
        _ => {}
    }

    // Extensionless fallback: append ".html" when the candidate has none.
    if candidate.extension().is_none() {
        let with_html = candidate.with_extension("html");
        if tokio::fs::metadata(&with_html)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Some((with_html, "extensionless"));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// 404 Not Found with mandatory security headers.
fn not_found_response() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from("Not Found"))
        .expect("not_found_response builder is infallible")
}

/// 413 Content Too Large with mandatory security headers.
fn too_large_response(norm_path: &str, size: u64) -> Response {
    let body = format!(
        "Content Too Large: {} ({} bytes exceeds {} byte limit)",
        norm_path, size, MAX_FILE_SIZE
    );
    Response::builder()
        .status(StatusCode::PAYLOAD_TOO_LARGE)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from(body))
        .expect("too_large_response builder is infallible")
}

/// Return `true` when the query string contains the `raw=1` parameter.
fn is_raw_mode(query: &str) -> bool {
    query.split('&').any(|param| param == "raw=1")
}

/// Fragment templates are fetched internally by the enricher; a direct
/// request for one must not be enriched (injecting a nav into the nav
/// template would be nonsense), so it is served as a plain asset.
fn is_fragment_template(rel_path: &str, config: &SiteConfig) -> bool {
    rel_path == config.chrome.nav_template || rel_path == config.chrome.footer_template
}

// ---------------------------------------------------------------------------
// Axum request handler
// ---------------------------------------------------------------------------

/// Main request handler: secure path resolution, then enrich-or-pass-through.
///
/// Steps:
/// 1. Percent-decode the raw request path (before any normalisation).
/// 2. Normalise: strip `.`/`..` via component iteration; reject traversal.
/// 3. Construct candidate = `serve_root` + normalised path.
/// 4. Fallback resolution: exact → directory `index.html` → `.html`.
/// 5. Canonicalise the resolved path and re-verify containment in the root.
/// 6. Stat the file; reject with 413 if it exceeds `MAX_FILE_SIZE`.
/// 7. Dispatch: `.html`/`.htm` pages are enriched with the shared chrome
///    (unless requested raw or the file is itself a fragment template); all
///    other files are served as static assets.
///
/// All responses include `X-Content-Type-Options: nosniff`.
async fn serve_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let raw_path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or("").to_owned();

    // Step 1: percent-decode.
    let decoded = match percent_decode(&raw_path) {
        Ok(d) => d,
        Err(_) => {
            eprintln!("[resolve] path={raw_path} branch=denied reason=invalid-percent-encoding");
            return not_found_response();
        }
    };

    // Reject null bytes anywhere in the decoded path.
    if decoded.contains('\0') {
        eprintln!("[resolve] path={raw_path} branch=denied reason=null-byte");
        return not_found_response();
    }

    // Step 2: normalise.
    let normalized = match normalize_path(&decoded) {
        Some(n) => n,
        None => {
            eprintln!("[resolve] path={raw_path} branch=denied reason=path-traversal");
            return not_found_response();
        }
    };

    let norm_display = normalized.display().to_string();

    // Step 3: construct candidate.
    let candidate = state.serve_root.join(&normalized);

    // Step 4: fallback resolution.
    let (resolved, branch) = match resolve_candidate(&candidate).await {
        Some(r) => r,
        None => {
            eprintln!("[resolve] path={norm_display} branch=denied reason=not-found");
            return not_found_response();
        }
    };

    // Step 5: canonicalise and re-verify containment (symlink-safe).
    let canonical = match tokio::fs::canonicalize(&resolved).await {
        Ok(c) => c,
        Err(_) => {
            eprintln!("[resolve] path={norm_display} branch=denied reason=canonicalize-failed");
            return not_found_response();
        }
    };

    if !canonical.starts_with(&state.canonical_root) {
        eprintln!(
            "[resolve] path={norm_display} branch=denied reason=outside-root canonical={}",
            canonical.display()
        );
        return not_found_response();
    }

    // Step 6: file size guard — stat before reading.
    let size = match tokio::fs::metadata(&canonical).await {
        Ok(m) => m.len(),
        Err(_) => {
            eprintln!("[resolve] path={norm_display} branch=denied reason=metadata-failed");
            return not_found_response();
        }
    };

    if size > MAX_FILE_SIZE {
        eprintln!("[resolve] path={norm_display} branch=denied reason=too-large size={size}");
        return too_large_response(&norm_display, size);
    }

    eprintln!("[resolve] path={norm_display} branch={branch} size={size}");

    // Step 7: dispatch on extension.
    let ext = canonical.extension().and_then(|e| e.to_str()).unwrap_or("");

    // Root-relative path of the file actually being served; this is what
    // the enricher sees as the page's pathname, so a directory request for
    // `/evidence/` is enriched exactly like `/evidence/index.html`.
    let rel_path = canonical
        .strip_prefix(&state.canonical_root)
        .map(|r| r.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    let is_page = ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm");
    if is_page && !is_raw_mode(&query) && !is_fragment_template(&rel_path, &state.config) {
        let content = match tokio::fs::read_to_string(&canonical).await {
            Ok(c) => c,
            Err(_) => return not_found_response(),
        };

        let pathname = format!("/{rel_path}");
        let page = enrich::enrich_page(&content, &pathname, &state.serve_root, &state.config).await;
        eprintln!("[request] path={norm_display} mode=enriched");
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff")
            .body(Body::from(page))
            .expect("serve_handler page response builder is infallible")
    } else {
        // Serve as a static asset with the derived MIME type; covers raw
        // mode, fragment templates, scripts, styles, and media.
        let bytes = match tokio::fs::read(&canonical).await {
            Ok(b) => b,
            Err(_) => return not_found_response(),
        };
        eprintln!("[request] path={norm_display} mode=asset");
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime_for_ext(ext))
            .header("X-Content-Type-Options", "nosniff")
            .body(Body::from(bytes))
            .expect("serve_handler asset response builder is infallible")
    }
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Start the dev server for the site rooted at `dir`.
///
/// Binds to `bind_addr` starting at `start_port`, retrying on `EADDRINUSE`
/// up to 100 times. The server shuts down cleanly when SIGINT (Ctrl+C) is
/// received.
pub async fn run_serve(dir: String, bind_addr: String, start_port: u16) -> io::Result<()> {
    let canonical_root = std::fs::canonicalize(&dir).map_err(|e| {
        eprintln!("Error: cannot open site root '{}': {}", dir, e);
        e
    })?;

    let config = SiteConfig::load(&canonical_root).map_err(|e| {
        eprintln!("Error: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e)
    })?;

    let state = Arc::new(AppState {
        serve_root: canonical_root.clone(),
        canonical_root,
        config,
    });

    let (std_listener, bound_port) = bind_with_retry(&bind_addr, start_port).map_err(|msg| {
        eprintln!("Error: {}", msg);
        io::Error::new(io::ErrorKind::AddrInUse, msg)
    })?;

    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    let app = Router::new()
        .fallback(serve_handler)
        .layer(CompressionLayer::new())
        .with_state(state.clone());

    println!("sitechrome serve");
    println!("root:  {}", state.serve_root.display());
    println!("url:   http://{}:{}/", bind_addr, bound_port);
    eprintln!("[serve] listening on {}:{}", bind_addr, bound_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
            eprintln!("[shutdown] complete");
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // --- is_raw_mode ---

    #[test]
    fn raw_mode_detected_when_param_present() {
        assert!(is_raw_mode("raw=1"));
        assert!(is_raw_mode("foo=bar&raw=1"));
    }

    #[test]
    fn raw_mode_not_detected_when_absent() {
        assert!(!is_raw_mode(""));
        assert!(!is_raw_mode("raw=0"));
        assert!(!is_raw_mode("raw=1x"));
        assert!(!is_raw_mode("xraw=1"));
    }

    // --- is_fragment_template ---

    #[test]
    fn fragment_templates_are_recognised_at_the_root_only() {
        let config = SiteConfig::default();
        assert!(is_fragment_template("nav_template.html", &config));
        assert!(is_fragment_template("footer_template.html", &config));
        assert!(!is_fragment_template("index.html", &config));
        assert!(!is_fragment_template("sub/nav_template.html", &config));
    }

    // --- percent_decode ---

    #[test]
    fn decode_plain_ascii() {
        assert_eq!(
            percent_decode("/evidence/research").unwrap(),
            "/evidence/research"
        );
    }

    #[test]
    fn decode_dot_dot_both_cases() {
        assert_eq!(percent_decode("%2e%2e").unwrap(), "..");
        assert_eq!(percent_decode("%2E%2E").unwrap(), "..");
    }

    #[test]
    fn decode_encoded_slash() {
        assert_eq!(percent_decode("%2f").unwrap(), "/");
        assert_eq!(percent_decode("%2F").unwrap(), "/");
    }

    #[test]
    fn decode_truncated_sequence_is_error() {
        assert!(percent_decode("%2").is_err());
        assert!(percent_decode("%").is_err());
    }

    #[test]
    fn decode_invalid_hex_is_error() {
        assert!(percent_decode("%zz").is_err());
    }

    #[test]
    fn decode_invalid_utf8_sequence_is_error() {
        // %80 is a lone continuation byte — invalid UTF-8.
        assert!(percent_decode("%80").is_err());
    }

    // --- normalize_path ---

    #[test]
    fn normalize_simple_path() {
        assert_eq!(
            normalize_path("/database/search.html").unwrap(),
            PathBuf::from("database/search.html")
        );
    }

    #[test]
    fn normalize_root_gives_empty() {
        assert_eq!(normalize_path("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn normalize_dotdot_within_root() {
        assert_eq!(normalize_path("/a/b/../c").unwrap(), PathBuf::from("a/c"));
    }

    #[test]
    fn normalize_traversal_above_root_rejected() {
        assert!(normalize_path("/../etc/passwd").is_none());
        assert!(normalize_path("/../../etc/passwd").is_none());
        assert!(normalize_path("/a/../../etc/passwd").is_none());
    }

    #[test]
    fn normalize_encoded_traversal_after_decode() {
        let decoded = percent_decode("/%2e%2e/etc/passwd").unwrap();
        assert!(
            normalize_path(&decoded).is_none(),
            "traversal via %2e%2e must be rejected"
        );
    }

    #[test]
    fn normalize_trailing_slash_ok() {
        assert_eq!(
            normalize_path("/evidence/").unwrap(),
            PathBuf::from("evidence")
        );
    }

    // --- mime_for_ext ---

    #[test]
    fn mime_page_extensions() {
        assert_eq!(mime_for_ext("html"), "text/html; charset=utf-8");
        assert_eq!(mime_for_ext("htm"), "text/html; charset=utf-8");
    }

    #[test]
    fn mime_css_js() {
        assert_eq!(mime_for_ext("css"), "text/css");
        assert_eq!(mime_for_ext("js"), "text/javascript");
    }

    #[test]
    fn mime_unknown_extension_is_octet_stream() {
        assert_eq!(mime_for_ext("xyz"), "application/octet-stream");
        assert_eq!(mime_for_ext(""), "application/octet-stream");
    }

    #[test]
    fn mime_extension_case_insensitive() {
        assert_eq!(mime_for_ext("PNG"), "image/png");
        assert_eq!(mime_for_ext("HTML"), "text/html; charset=utf-8");
    }

    // --- resolve_candidate ---

    #[tokio::test]
    async fn resolve_exact_file() {
        let dir = std::env::temp_dir().join(format!("sitechrome_exact_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page.html"), b"<body></body>").unwrap();

        let candidate = dir.join("page.html");
        let (path, branch) = resolve_candidate(&candidate).await.unwrap();
        assert_eq!(branch, "exact");
        assert_eq!(path, candidate);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resolve_extensionless_falls_back_to_html() {
        let dir = std::env::temp_dir().join(format!("sitechrome_ext_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("about.html"), b"<body></body>").unwrap();

        let candidate = dir.join("about");
        let (path, branch) = resolve_candidate(&candidate).await.unwrap();
        assert_eq!(branch, "extensionless");
        assert_eq!(path, dir.join("about.html"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resolve_directory_index() {
        let dir = std::env::temp_dir().join(format!("sitechrome_index_{}", std::process::id()));
        let sub = dir.join("evidence");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("index.html"), b"<body></body>").unwrap();

        let (path, branch) = resolve_candidate(&sub).await.unwrap();
        assert_eq!(branch, "index");
        assert_eq!(path, sub.join("index.html"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resolve_nonexistent_returns_none() {
        let dir = std::env::temp_dir().join(format!("sitechrome_missing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        assert!(resolve_candidate(&dir.join("no_such_file")).await.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    // --- Symlink containment check ---

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_outside_root_fails_containment_check() {
        use std::os::unix::fs::symlink;

        let base = std::env::temp_dir().join(format!("sitechrome_symlink_{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();

        let outside =
            std::env::temp_dir().join(format!("sitechrome_outside_{}.html", std::process::id()));
        std::fs::write(&outside, b"secret").unwrap();

        let link = base.join("evil.html");
        let _ = std::fs::remove_file(&link);
        symlink(&outside, &link).unwrap();

        let canonical_root = std::fs::canonicalize(&base).unwrap();
        let canonical_link = tokio::fs::canonicalize(&link).await.unwrap();

        assert!(
            !canonical_link.starts_with(&canonical_root),
            "symlink to outside file should fail containment check"
        );

        let _ = std::fs::remove_file(&link);
        let _ = std::fs::remove_file(&outside);
        let _ = std::fs::remove_dir(&base);
    }
}
