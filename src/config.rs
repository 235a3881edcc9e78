use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repo: RepoConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    /// Path to the git repository (bare or with a worktree).
    pub path: PathBuf,
    /// Ref the published content is read from.
    #[serde(default = "default_ref")]
    pub refname: String,
}

fn default_ref() -> String {
    "HEAD".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Path to the SQLite index database.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// UTC offset used for day-window queries, e.g. "-08:00" or "+00:00".
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Statuses visible by default. Queries never run unfiltered.
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            statuses: default_statuses(),
        }
    }
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

fn default_statuses() -> Vec<String> {
    vec!["published".to_string()]
}

/// Policy for a current page that fails structural or extraction checks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPagePolicy {
    /// Abort the whole rebuild (default). The prior generation stays live.
    Abort,
    /// Log a warning, skip the page, and continue.
    Skip,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_malformed_policy")]
    pub on_malformed_page: MalformedPagePolicy,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            on_malformed_page: default_malformed_policy(),
        }
    }
}

fn default_malformed_policy() -> MalformedPagePolicy {
    MalformedPagePolicy::Abort
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Persist pre-rendered HTML for pages and revisions at build time.
    #[serde(default)]
    pub precompute: bool,
    /// Heading level the document title renders at; body headings shift below it.
    #[serde(default = "default_heading_level")]
    pub initial_heading_level: u8,
    /// Syntax-highlight fenced code blocks.
    #[serde(default = "default_true")]
    pub highlight: bool,
    /// Convert straight quotes and dashes to typographic forms.
    #[serde(default = "default_true")]
    pub smart_quotes: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            precompute: false,
            initial_heading_level: default_heading_level(),
            highlight: true,
            smart_quotes: true,
        }
    }
}

fn default_heading_level() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

impl SiteConfig {
    /// Parse the configured offset into a chrono `FixedOffset`.
    pub fn timezone_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
            .with_context(|| format!("invalid site.timezone: '{}'", self.timezone))
    }
}

fn parse_offset(s: &str) -> Result<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1i32, &s[1..]),
        Some(b'-') => (-1i32, &s[1..]),
        _ => anyhow::bail!("offset must start with '+' or '-'"),
    };
    let (hh, mm) = rest
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("offset must look like '+HH:MM'"))?;
    let hours: i32 = hh.parse()?;
    let minutes: i32 = mm.parse()?;
    if hours > 14 || minutes > 59 {
        anyhow::bail!("offset out of range");
    }
    let secs = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(secs).ok_or_else(|| anyhow::anyhow!("offset out of range"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.site.statuses.is_empty() {
        anyhow::bail!("site.statuses must list at least one status");
    }

    if config.repo.refname.is_empty() {
        anyhow::bail!("repo.refname must not be empty");
    }

    if config.render.initial_heading_level == 0 || config.render.initial_heading_level > 6 {
        anyhow::bail!("render.initial_heading_level must be in 1..=6");
    }

    // Fail early on an unparseable timezone rather than at query time.
    config.site.timezone_offset()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[repo]
path = "/tmp/repo"

[index]
path = "/tmp/index.sqlite"
"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        assert_eq!(config.repo.refname, "HEAD");
        assert_eq!(config.site.statuses, vec!["published"]);
        assert_eq!(config.build.on_malformed_page, MalformedPagePolicy::Abort);
        assert!(!config.render.precompute);
        assert_eq!(config.render.initial_heading_level, 2);
    }

    #[test]
    fn test_timezone_offset_parsing() {
        let mut site = SiteConfig::default();
        site.timezone = "-08:00".to_string();
        let offset = site.timezone_offset().unwrap();
        assert_eq!(offset.local_minus_utc(), -8 * 3600);

        site.timezone = "+05:30".to_string();
        let offset = site.timezone_offset().unwrap();
        assert_eq!(offset.local_minus_utc(), 5 * 3600 + 30 * 60);
    }

    #[test]
    fn test_timezone_offset_rejects_garbage() {
        let mut site = SiteConfig::default();
        for bad in ["PST", "08:00", "+8", "+25:00"] {
            site.timezone = bad.to_string();
            assert!(site.timezone_offset().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_skip_policy_parses() {
        let toml_str = format!("{}\n[build]\non_malformed_page = \"skip\"", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.build.on_malformed_page, MalformedPagePolicy::Skip);
    }
}
