//! Configuration for grove

use crate::GroveError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Grove Configuration

[repository]
# Interval between full reindex cycles (e.g., "30s", "5m"). "0s" disables them.
reindex_interval = "0s"

[scan]
# Reserved folder for repository metadata (never classified as an item)
meta_folder = ".grove"
# Reserved folder holding an item's attachments
files_folder = "files"
# Extensions recognised as markdown documents (case-insensitive)
markdown_extensions = ["md", "markdown", "mdown"]
# How many levels below a directory are probed for markdown before it is
# considered a plain file collection
virtual_probe_depth = 3

[watch]
# Levels below a changed route that a watcher-triggered rescan covers
rescan_depth = 2
# Quiet period after the first change signal before rescanning
debounce = "250ms"
"#;

/// Name of the config file inside the meta folder
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Grove configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_reindex_interval")]
    pub reindex_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_meta_folder")]
    pub meta_folder: String,
    #[serde(default = "default_files_folder")]
    pub files_folder: String,
    #[serde(default = "default_markdown_extensions")]
    pub markdown_extensions: Vec<String>,
    #[serde(default = "default_virtual_probe_depth")]
    pub virtual_probe_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_rescan_depth")]
    pub rescan_depth: usize,
    #[serde(default = "default_debounce")]
    pub debounce: String,
}

// Default value functions
fn default_reindex_interval() -> String {
    "0s".to_string()
}
fn default_meta_folder() -> String {
    ".grove".to_string()
}
fn default_files_folder() -> String {
    "files".to_string()
}
fn default_markdown_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string(), "mdown".to_string()]
}
fn default_virtual_probe_depth() -> usize {
    3
}
fn default_rescan_depth() -> usize {
    2
}
fn default_debounce() -> String {
    "250ms".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            reindex_interval: default_reindex_interval(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            meta_folder: default_meta_folder(),
            files_folder: default_files_folder(),
            markdown_extensions: default_markdown_extensions(),
            virtual_probe_depth: default_virtual_probe_depth(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            rescan_depth: default_rescan_depth(),
            debounce: default_debounce(),
        }
    }
}

impl ScanConfig {
    /// Whether a directory name is the meta or files folder (case-insensitive)
    pub fn is_reserved(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.meta_folder) || name.eq_ignore_ascii_case(&self.files_folder)
    }

    /// Whether a subdirectory is skipped during child discovery: reserved
    /// names and anything starting with a dot
    pub fn is_excluded(&self, name: &str) -> bool {
        name.starts_with('.') || self.is_reserved(name)
    }

    /// Whether a file name carries one of the markdown extensions
    pub fn is_markdown(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.markdown_extensions
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(ext))
            })
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| GroveError::ConfigParse(e.to_string()))
    }

    /// Load `<root>/<meta_folder>/config.toml` if present, defaults otherwise
    pub fn discover(root: &Path) -> crate::Result<Self> {
        let path = root
            .join(default_meta_folder())
            .join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default config to `<root>/<meta_folder>/config.toml`.
    /// Refuses to overwrite an existing file.
    pub fn init(root: &Path) -> crate::Result<PathBuf> {
        let meta = root.join(default_meta_folder());
        let path = meta.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Err(GroveError::ConfigExists(path));
        }

        std::fs::create_dir_all(&meta)?;
        std::fs::write(&path, DEFAULT_CONFIG)?;
        Ok(path)
    }

    /// Periodic reindex interval; `None` when disabled
    pub fn reindex_interval(&self) -> Option<Duration> {
        parse_duration(&self.repository.reindex_interval).filter(|d| !d.is_zero())
    }

    /// Debounce window for watcher signals
    pub fn debounce(&self) -> Duration {
        parse_duration(&self.watch.debounce).unwrap_or(Duration::from_millis(250))
    }
}

/// Parse duration string (e.g., "250ms", "30s", "5m", "1h", "1d")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }

    if !s.is_char_boundary(s.len() - 1) {
        return None;
    }
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    let seconds_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    num.checked_mul(seconds_per_unit).map(Duration::from_secs)
}
