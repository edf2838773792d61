//! Site configuration.
//!
//! An optional `sitechrome.toml` at the site root overrides the container
//! ids, fragment filenames, and script names the enricher works with. A
//! missing file means defaults; an unreadable or malformed file is a
//! startup error — a half-applied config would silently inject the wrong
//! chrome on every page.
//!
//! The `data-page` attribute, `active` class, `aria-current="page"`, and
//! `nav-overlay` class are protocol constants shared with the templates and
//! stylesheets, not configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the optional per-site configuration file.
pub const CONFIG_FILE: &str = "sitechrome.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse `{0}`")]
    Parse(PathBuf, #[source] toml::de::Error),
}

/// Chrome container ids and fragment template filenames.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChromeConfig {
    /// Element id of the primary navigation container.
    pub nav_id: String,
    /// Element id of the mobile navigation panel.
    pub mobile_panel_id: String,
    /// Element id of the footer container.
    pub footer_id: String,
    /// Navigation fragment filename, relative to the site root.
    pub nav_template: String,
    /// Footer fragment filename, relative to the site root.
    pub footer_template: String,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            nav_id: "site-nav".to_owned(),
            mobile_panel_id: "site-mobile-panel".to_owned(),
            footer_id: "site-footer".to_owned(),
            nav_template: "nav_template.html".to_owned(),
            footer_template: "footer_template.html".to_owned(),
        }
    }
}

/// Dependent behavior scripts and the published page global.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScriptsConfig {
    /// Menu-toggle script, loaded once navigation markup exists.
    pub menu_toggle: String,
    /// Live-statistics script, loaded unconditionally once per page.
    pub live_stats: String,
    /// Name of the page-global variable publishing the computed base path
    /// for sibling scripts on the page.
    pub base_path_global: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            menu_toggle: "nav-toggle.js".to_owned(),
            live_stats: "live-stats.js".to_owned(),
            base_path_global: "__basePath".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SiteConfig {
    pub chrome: ChromeConfig,
    pub scripts: ScriptsConfig,
}

impl SiteConfig {
    /// Load `sitechrome.toml` from the site root.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(path, e)),
        };
        let config =
            toml::from_str::<Self>(&text).map_err(|e| ConfigError::Parse(path.clone(), e))?;
        eprintln!("[config] loaded path={}", path.display());
        Ok(config)
    }
}
