use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ScrapeError};

const ENV_PREFIX: &str = "SCRAPER";
pub const DEFAULT_CONFIG_FILE: &str = "scraper.toml";

/// What a run does with an output file left by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Replace the file; duplicates are only suppressed within this run.
    Overwrite,
    /// Keep existing rows and treat their keys as already seen.
    Append,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Overwrite => f.write_str("overwrite"),
            OutputMode::Append => f.write_str("append"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub output_mode: OutputMode,
    /// Target names to run; empty means all known targets.
    pub targets: Vec<String>,
    pub run_timeout_secs: Option<u64>,
    /// Per-target cap on admitted records.
    pub max_records: Option<usize>,
    pub resume: bool,
    pub state_db: PathBuf,
    pub browser: BrowserSettings,
    pub navigation: NavigationSettings,
    pub github: GithubSettings,
    pub stepstone: StepstoneSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_dir: PathBuf::from("data"),
            output_mode: OutputMode::Overwrite,
            targets: Vec::new(),
            run_timeout_secs: None,
            max_records: Some(1_000),
            resume: false,
            state_db: PathBuf::from("data/progress.sqlite"),
            browser: BrowserSettings::default(),
            navigation: NavigationSettings::default(),
            github: GithubSettings::default(),
            stepstone: StepstoneSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_path: Option<PathBuf>,
    /// Passed to Chromium as `--proxy-server`.
    pub proxy: Option<String>,
    pub launch_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        BrowserSettings {
            headless: true,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            viewport_width: 1366,
            viewport_height: 900,
            chrome_path: None,
            proxy: None,
            launch_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationSettings {
    pub nav_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    /// Total tries per page, including the first.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_pages: u32,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        NavigationSettings {
            nav_timeout_ms: 30_000,
            ready_timeout_ms: 7_000,
            max_attempts: 3,
            base_backoff_ms: 2_000,
            max_pages: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    /// `owner/repo` issue trackers used as job boards.
    pub repos: Vec<String>,
    /// `open` or `closed`.
    pub state: String,
}

impl Default for GithubSettings {
    fn default() -> Self {
        GithubSettings {
            repos: vec!["frontendbr/vagas".into(), "backend-br/vagas".into()],
            state: "open".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Search {
    pub keyword: String,
    pub city: String,
    pub radius: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StepstoneSettings {
    pub searches: Vec<Search>,
    /// Follow each lead to its company page and read the open-jobs total.
    pub enrich: bool,
    pub min_jobs: u32,
    pub max_jobs: u32,
}

impl Default for StepstoneSettings {
    fn default() -> Self {
        let search = |keyword: &str, city: &str| Search {
            keyword: keyword.into(),
            city: city.into(),
            radius: 50,
        };
        StepstoneSettings {
            searches: vec![
                search("gesundheits-und-krankenpfleger", "regensburg"),
                search("pflegehilfskraft", "würzburg"),
                search("servicetechniker", "stuttgart"),
            ],
            enrich: true,
            min_jobs: 8,
            max_jobs: 45,
        }
    }
}

/// Load settings from defaults, an optional TOML file and `SCRAPER_*` env vars.
pub fn load(file: Option<&Path>) -> Result<Settings> {
    let path = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let built = config::Config::builder()
        .add_source(config::File::from(path).required(file.is_some()))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("targets"),
        )
        .build()
        .map_err(|e| ScrapeError::Config(e.to_string()))?;

    built
        .try_deserialize()
        .map_err(|e| ScrapeError::Config(e.to_string()))
}

impl Settings {
    /// Reject combinations that can only fail later.
    pub fn validate(&self) -> Result<()> {
        let nav = &self.navigation;
        if nav.max_pages == 0 {
            return Err(ScrapeError::Config("navigation.max_pages must be at least 1".into()));
        }
        if nav.max_attempts == 0 {
            return Err(ScrapeError::Config("navigation.max_attempts must be at least 1".into()));
        }
        if nav.nav_timeout_ms == 0 || nav.ready_timeout_ms == 0 {
            return Err(ScrapeError::Config("navigation timeouts must be positive".into()));
        }
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(ScrapeError::Config("browser viewport must be non-empty".into()));
        }
        if self.resume && self.output_mode != OutputMode::Append {
            return Err(ScrapeError::Config(
                "resume requires output_mode = append, earlier rows would be overwritten".into(),
            ));
        }
        if self.max_records == Some(0) {
            return Err(ScrapeError::Config("max_records must be at least 1".into()));
        }
        let s = &self.stepstone;
        if s.min_jobs > s.max_jobs {
            return Err(ScrapeError::Config(format!(
                "stepstone.min_jobs ({}) exceeds stepstone.max_jobs ({})",
                s.min_jobs, s.max_jobs
            )));
        }
        if !matches!(self.github.state.as_str(), "open" | "closed") {
            return Err(ScrapeError::Config(format!(
                "github.state must be open or closed, got {:?}",
                self.github.state
            )));
        }
        Ok(())
    }

    pub fn output_path(&self, target: &str) -> PathBuf {
        self.output_dir.join(format!("{}.csv", target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.output_mode, OutputMode::Overwrite);
        assert!(s.browser.headless);
        assert_eq!(s.navigation.max_attempts, 3);
        assert_eq!(s.max_records, Some(1_000));
        assert_eq!((s.stepstone.min_jobs, s.stepstone.max_jobs), (8, 45));
    }

    #[test]
    fn resume_without_append_is_rejected() {
        let s = Settings {
            resume: true,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(ScrapeError::Config(_))));

        let s = Settings {
            resume: true,
            output_mode: OutputMode::Append,
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn inverted_job_range_is_rejected() {
        let mut s = Settings::default();
        s.stepstone.min_jobs = 60;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_pages_is_rejected() {
        let mut s = Settings::default();
        s.navigation.max_pages = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper.toml");
        std::fs::write(
            &path,
            r#"
output_mode = "append"
targets = ["github"]

[navigation]
max_pages = 4

[[stepstone.searches]]
keyword = "pflege"
city = "trier"
radius = 25
"#,
        )
        .unwrap();

        let s = load(Some(&path)).unwrap();
        assert_eq!(s.output_mode, OutputMode::Append);
        assert_eq!(s.targets, vec!["github".to_string()]);
        assert_eq!(s.navigation.max_pages, 4);
        assert_eq!(s.navigation.max_attempts, 3);
        assert_eq!(s.stepstone.searches.len(), 1);
        assert_eq!(s.stepstone.searches[0].radius, 25);
    }

    #[test]
    fn explicit_missing_file_is_a_config_error() {
        let err = load(Some(Path::new("/nonexistent/scraper.toml"))).unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
    }

    #[test]
    fn output_path_is_per_target() {
        let s = Settings::default();
        assert_eq!(s.output_path("github"), PathBuf::from("data/github.csv"));
    }
}
