//! Source definitions.
//!
//! One YAML file per source, matched by the `sources` glob:
//!
//! ```yaml
//! name: xkcd            # defaults to the file stem
//! title: XKCD
//! module: xkcd          # adapter registry key
//! mode: poll            # poll | crawl
//! initial: "*first"     # *first | *last | URL
//! batch_size: 7
//! poll_interval: daily
//! params:
//!   url: https://xkcd.com/
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::{HarvestError, PollInterval, RunMode, StartPoint};

/// Default number of items per crawl
pub const DEFAULT_BATCH_SIZE: usize = 7;

/// Raw source file schema
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceFile {
    name: Option<String>,
    title: Option<String>,
    module: Option<String>,
    key: Option<String>,
    enabled: Option<bool>,
    mode: Option<String>,
    initial: Option<String>,
    batch_size: Option<usize>,
    poll_interval: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, serde_yaml::Value>,
}

/// A validated source definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique source name, also the state identifier
    pub name: String,
    pub title: String,
    /// Adapter registry key
    pub module: String,
    /// Item key override handed to the adapter
    pub key: Option<String>,
    pub enabled: bool,
    pub mode: RunMode,
    pub initial: StartPoint,
    pub batch_size: usize,
    pub poll_interval: PollInterval,
    /// Adapter specific parameters
    pub params: BTreeMap<String, String>,
    /// File the definition was read from
    pub file: Option<PathBuf>,
}

impl SourceConfig {
    /// Enabled poll-mode source with default settings
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            module: module.into(),
            key: None,
            enabled: true,
            mode: RunMode::default(),
            initial: StartPoint::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: PollInterval::default(),
            params: BTreeMap::new(),
            file: None,
        }
    }
}

/// Parse one source definition. `stem` names the source when the file
/// does not.
pub fn parse_source(content: &str, stem: &str, default_mode: RunMode) -> Result<SourceConfig, HarvestError> {
    let raw: SourceFile = serde_yaml::from_str(content).map_err(|e| HarvestError::config(stem, e))?;

    let name = raw.name.unwrap_or_else(|| stem.to_string());
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HarvestError::config(stem, "empty source name"));
    }
    check_file_name(&name, "name", &name)?;
    if let Some(ref key) = raw.key {
        check_file_name(&name, "key", key)?;
    }

    let module = raw
        .module
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| HarvestError::config(&name, "missing module"))?;

    let mode = match raw.mode {
        Some(mode) => mode.parse::<RunMode>().map_err(|e| HarvestError::config(&name, e))?,
        None => default_mode,
    };
    let initial = match raw.initial {
        Some(initial) => initial
            .parse::<StartPoint>()
            .map_err(|e| HarvestError::config(&name, e))?,
        None => StartPoint::default(),
    };
    let poll_interval = match raw.poll_interval {
        Some(interval) => interval
            .parse::<PollInterval>()
            .map_err(|e| HarvestError::config(&name, e))?,
        None => PollInterval::None,
    };

    let batch_size = raw.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if mode == RunMode::Crawl && batch_size == 0 {
        return Err(HarvestError::config(&name, "batch_size must be greater than 0"));
    }

    let params = raw
        .params
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_yaml::Value::String(s) => s,
                other => serde_yaml::to_string(&other)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| HarvestError::config(&name, e))?,
            };
            Ok((k, value))
        })
        .collect::<Result<BTreeMap<_, _>, HarvestError>>()?;

    Ok(SourceConfig {
        title: raw.title.unwrap_or_else(|| name.clone()),
        name,
        module,
        key: raw.key,
        enabled: raw.enabled.unwrap_or(true),
        mode,
        initial,
        batch_size,
        poll_interval,
        params,
        file: None,
    })
}

/// Names and keys become state and media file names, so they must stay a
/// single path component.
fn check_file_name(source: &str, field: &str, value: &str) -> Result<(), HarvestError> {
    let bad = value == "."
        || value == ".."
        || value.trim().is_empty()
        || value.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(HarvestError::config(
            source,
            format!("{} '{}' is not usable as a file name", field, value.escape_debug()),
        ));
    }
    Ok(())
}

/// Read one source file
pub fn load_source(path: &Path, default_mode: RunMode) -> Result<SourceConfig, HarvestError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)
        .map_err(|e| HarvestError::config(&stem, format!("{}: {}", path.display(), e)))?;

    let mut source = parse_source(&content, &stem, default_mode)?;
    source.file = Some(path.to_path_buf());
    Ok(source)
}

/// Load every source matched by `pattern`, sorted case-insensitively by
/// name. Invalid definitions and duplicate names are logged and skipped.
pub fn load_sources(pattern: &str, default_mode: RunMode) -> Result<Vec<SourceConfig>, HarvestError> {
    let paths = glob::glob(pattern)
        .map_err(|e| HarvestError::config("sources", format!("bad pattern '{}': {}", pattern, e)))?;

    let mut sources = Vec::new();
    let mut seen = HashSet::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Unreadable source path");
                continue;
            }
        };

        match load_source(&path, default_mode) {
            Ok(source) if !seen.insert(source.name.to_lowercase()) => {
                warn!(source = %source.name, path = %path.display(), "Duplicate source name, skipping");
            }
            Ok(source) => {
                debug!(source = %source.name, path = %path.display(), "Source loaded");
                sources.push(source);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping source definition"),
        }
    }

    sources.sort_by_key(|s| s.name.to_lowercase());
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_definition() {
        let source = parse_source(
            r#"
name: comic
title: A Comic
module: xkcd
key: xk
mode: crawl
initial: "*first"
batch_size: 3
poll_interval: Weekly
params:
  url: https://example.com/
  depth: 2
"#,
            "ignored",
            RunMode::Poll,
        )
        .unwrap();

        assert_eq!(source.name, "comic");
        assert_eq!(source.title, "A Comic");
        assert_eq!(source.key.as_deref(), Some("xk"));
        assert_eq!(source.mode, RunMode::Crawl);
        assert_eq!(source.initial, StartPoint::First);
        assert_eq!(source.batch_size, 3);
        assert_eq!(source.poll_interval, PollInterval::Weekly);
        assert_eq!(source.params.get("depth").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_defaults_from_stem() {
        let source = parse_source("module: xkcd\n", "daily-comic", RunMode::Crawl).unwrap();
        assert_eq!(source.name, "daily-comic");
        assert_eq!(source.title, "daily-comic");
        assert_eq!(source.mode, RunMode::Crawl);
        assert_eq!(source.initial, StartPoint::Last);
        assert_eq!(source.batch_size, DEFAULT_BATCH_SIZE);
        assert!(source.enabled);
    }

    #[test]
    fn test_invalid_definitions() {
        let err = parse_source("title: x\n", "s", RunMode::Poll).unwrap_err();
        assert!(err.to_string().contains("missing module"));

        let err = parse_source("module: xkcd\npoll_interval: hourly\n", "s", RunMode::Poll).unwrap_err();
        assert!(matches!(err, HarvestError::Config { .. }));

        let err = parse_source("module: xkcd\nmode: crawl\nbatch_size: 0\n", "s", RunMode::Poll)
            .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_names_that_leave_the_state_dir_are_rejected() {
        for content in [
            "name: ../outside\nmodule: xkcd\n",
            "name: a/b\nmodule: xkcd\n",
            "name: \"..\"\nmodule: xkcd\n",
            "name: ok\nkey: ../../etc\nmodule: xkcd\n",
        ] {
            let err = parse_source(content, "s", RunMode::Poll).unwrap_err();
            assert!(err.to_string().contains("not usable as a file name"), "{}", content);
        }

        let source = parse_source("name: comic..v2\nmodule: xkcd\n", "s", RunMode::Poll).unwrap();
        assert_eq!(source.name, "comic..v2");
    }

    #[test]
    fn test_load_sources_skips_bad_files_and_sorts() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("zeta.yaml"), "module: xkcd\n").unwrap();
        std::fs::write(temp.path().join("Alpha.yaml"), "module: xkcd\n").unwrap();
        std::fs::write(temp.path().join("beta.yaml"), "module: [\n").unwrap();
        std::fs::write(temp.path().join("dup.yaml"), "name: ZETA\nmodule: xkcd\n").unwrap();

        let pattern = temp.path().join("*.yaml");
        let sources = load_sources(&pattern.to_string_lossy(), RunMode::Poll).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "Alpha");
        assert!(names[1].eq_ignore_ascii_case("zeta"));
        assert!(sources[0].file.is_some());
    }
}
