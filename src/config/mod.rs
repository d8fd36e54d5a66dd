//! Explicit configuration records.
//!
//! All configuration is resolved once at startup and handed to the producer
//! and worker constructors as plain values; nothing reads process-global
//! state after that. The driver binary assembles a [`Settings`] from a
//! `KEY=value` properties file with environment-variable overrides, then
//! derives a [`ProducerConfig`] from it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub mod filter;

pub use filter::PathFilter;

/// Runtime knobs for the looping task producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Soft ceiling on visible tasks in the queue; the producer stops once
    /// the advisory queue size reaches it.
    pub max_task_queue_size: usize,

    /// Minimum interval between full passes. A run that starts within this
    /// interval of the previous completed pass exits without producing.
    pub frequency: Duration,

    /// Account/space scoping applied before a morsel is emitted.
    pub filter: PathFilter,

    /// How many content ids to pull from the source per nibble.
    pub source_page_size: usize,
}

impl ProducerConfig {
    /// Default number of content ids fetched from the source per page.
    pub const DEFAULT_SOURCE_PAGE_SIZE: usize = 1000;

    pub fn new(max_task_queue_size: usize) -> Self {
        ProducerConfig {
            max_task_queue_size,
            frequency: Duration::ZERO,
            filter: PathFilter::allow_all(),
            source_page_size: Self::DEFAULT_SOURCE_PAGE_SIZE,
        }
    }

    pub fn with_source_page_size(mut self, source_page_size: usize) -> Self {
        self.source_page_size = source_page_size;
        self
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Errors assembling settings from disk and environment.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed line {line} in {path}: expected KEY=value")]
    MalformedLine { path: PathBuf, line: usize },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Parses a duration of the form `<n><unit>` where unit is one of
/// `s`, `m`, `h`, `d` (e.g. `90s`, `15m`, `6h`, `1d`). A bare number is
/// seconds.
pub fn parse_frequency(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last()? {
        (i, 's') => (&value[..i], 1u64),
        (i, 'm') => (&value[..i], 60),
        (i, 'h') => (&value[..i], 3600),
        (i, 'd') => (&value[..i], 86_400),
        _ => (value, 1),
    };
    let n: u64 = digits.trim().parse().ok()?;
    Some(Duration::from_secs(n * multiplier))
}

/// Parses a `KEY=value` properties file. Blank lines and `#` comments are
/// ignored; whitespace around keys and values is trimmed.
pub fn load_properties(path: &Path) -> Result<BTreeMap<String, String>, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut properties = BTreeMap::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or(SettingsError::MalformedLine {
            path: path.to_path_buf(),
            line: index + 1,
        })?;
        properties.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(properties)
}

/// Driver-level settings: where state lives, how hard to push the queue, and
/// what to replicate.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the producer state blob.
    pub state_path: PathBuf,

    /// Queue ceiling.
    pub max_task_queue_size: usize,

    /// Minimum interval between full passes.
    pub frequency: Duration,

    /// Name of the duplication task queue (informational for the local
    /// queue; selects the queue for cloud deployments).
    pub task_queue_name: String,

    /// Path of the replication policy snapshot (JSON).
    pub policy_path: PathBuf,

    /// Root directory of the filesystem storage backend.
    pub storage_root: PathBuf,

    /// Optional inclusion/exclusion list files.
    pub inclusion_list: Option<PathBuf>,
    pub exclusion_list: Option<PathBuf>,
}

impl Settings {
    /// Default properties file path, next to the working directory.
    pub const DEFAULT_PROPERTIES_PATH: &'static str = "dupmill.properties";

    /// Assembles settings from an optional properties file plus environment
    /// overrides (`DUPMILL_<KEY>` with key uppercased and dashes replaced by
    /// underscores).
    pub fn load(properties_path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut properties = match properties_path {
            Some(path) => load_properties(path)?,
            None => {
                let default = Path::new(Self::DEFAULT_PROPERTIES_PATH);
                if default.exists() {
                    load_properties(default)?
                } else {
                    BTreeMap::new()
                }
            }
        };

        for key in [
            "state-file",
            "max-task-queue-size",
            "frequency",
            "task-queue-name",
            "policy-file",
            "storage-root",
            "inclusion-list",
            "exclusion-list",
        ] {
            let env_key = format!("DUPMILL_{}", key.to_uppercase().replace('-', "_"));
            if let Ok(value) = std::env::var(&env_key) {
                properties.insert(key.to_string(), value);
            }
        }

        Self::from_properties(&properties)
    }

    fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let get = |key: &'static str| {
            properties
                .get(key)
                .cloned()
                .ok_or(SettingsError::Missing(key))
        };

        let max_task_queue_size = {
            let raw = get("max-task-queue-size")?;
            raw.parse()
                .map_err(|_| SettingsError::InvalidValue {
                    key: "max-task-queue-size",
                    value: raw.clone(),
                })?
        };

        let frequency = match properties.get("frequency") {
            Some(raw) => parse_frequency(raw).ok_or(SettingsError::InvalidValue {
                key: "frequency",
                value: raw.clone(),
            })?,
            None => Duration::ZERO,
        };

        Ok(Settings {
            state_path: PathBuf::from(get("state-file")?),
            max_task_queue_size,
            frequency,
            task_queue_name: properties
                .get("task-queue-name")
                .cloned()
                .unwrap_or_else(|| "dup-queue".to_string()),
            policy_path: PathBuf::from(get("policy-file")?),
            storage_root: PathBuf::from(get("storage-root")?),
            inclusion_list: properties.get("inclusion-list").map(PathBuf::from),
            exclusion_list: properties.get("exclusion-list").map(PathBuf::from),
        })
    }

    /// Derives the producer configuration, loading the filter lists.
    pub fn producer_config(&self) -> Result<ProducerConfig, SettingsError> {
        let filter = PathFilter::from_files(
            self.inclusion_list.as_deref(),
            self.exclusion_list.as_deref(),
        )
        .map_err(|source| SettingsError::Io {
            path: self
                .inclusion_list
                .clone()
                .or_else(|| self.exclusion_list.clone())
                .unwrap_or_default(),
            source,
        })?;

        Ok(ProducerConfig::new(self.max_task_queue_size)
            .with_frequency(self.frequency)
            .with_filter(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_frequency_units() {
        assert_eq!(parse_frequency("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_frequency("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_frequency("6h"), Some(Duration::from_secs(21_600)));
        assert_eq!(parse_frequency("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_frequency("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_frequency("nope"), None);
        assert_eq!(parse_frequency(""), None);
    }

    #[test]
    fn properties_file_parses_and_ignores_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dupmill.properties");
        std::fs::write(
            &path,
            "# producer settings\nstate-file = /var/lib/dupmill/state.json\nmax-task-queue-size=500\n\n",
        )
        .unwrap();

        let props = load_properties(&path).unwrap();
        assert_eq!(
            props.get("state-file").unwrap(),
            "/var/lib/dupmill/state.json"
        );
        assert_eq!(props.get("max-task-queue-size").unwrap(), "500");
    }

    #[test]
    fn malformed_line_is_rejected_with_its_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.properties");
        std::fs::write(&path, "state-file=x\nnot a setting\n").unwrap();

        match load_properties(&path) {
            Err(SettingsError::MalformedLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedLine, got {:?}", other),
        }
    }

    #[test]
    fn settings_require_state_file_and_ceiling() {
        let mut props = BTreeMap::new();
        props.insert("policy-file".to_string(), "policy.json".to_string());
        props.insert("storage-root".to_string(), "/data".to_string());

        assert!(matches!(
            Settings::from_properties(&props),
            Err(SettingsError::Missing("state-file"))
        ));

        props.insert("state-file".to_string(), "state.json".to_string());
        assert!(matches!(
            Settings::from_properties(&props),
            Err(SettingsError::Missing("max-task-queue-size"))
        ));

        props.insert("max-task-queue-size".to_string(), "100".to_string());
        let settings = Settings::from_properties(&props).unwrap();
        assert_eq!(settings.max_task_queue_size, 100);
        assert_eq!(settings.frequency, Duration::ZERO);
        assert_eq!(settings.task_queue_name, "dup-queue");
    }

    #[test]
    fn producer_config_loads_filter_lists() {
        let dir = tempdir().unwrap();
        let inclusion = dir.path().join("include.txt");
        std::fs::write(&inclusion, "acme\n").unwrap();

        let settings = Settings {
            state_path: dir.path().join("state.json"),
            max_task_queue_size: 10,
            frequency: Duration::ZERO,
            task_queue_name: "dup-queue".to_string(),
            policy_path: dir.path().join("policy.json"),
            storage_root: dir.path().to_path_buf(),
            inclusion_list: Some(inclusion),
            exclusion_list: None,
        };

        let config = settings.producer_config().unwrap();
        assert!(config.filter.allows(
            &crate::types::AccountId::new("acme"),
            &crate::types::SpaceId::new("photos")
        ));
        assert!(!config.filter.allows(
            &crate::types::AccountId::new("globex"),
            &crate::types::SpaceId::new("photos")
        ));
    }
}
