//! YAML configuration loading with `$(NOWCAST.ENV.<NAME>)` substitution.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value as YamlValue;

use crate::error::ConfigError;
use crate::types::MessageRegistry;

/// Remote-execution parameters for a `run.enabled hosts.<host>` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteHost {
    pub envvars: String,
    pub python: String,
    #[serde(rename = "config file")]
    pub config_file: String,
}

/// The body of one `scheduled workers` entry -- everything but the module
/// name, which is carried as that entry's single map key.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ScheduledWorkerBody {
    every: String,
    at: String,
    #[serde(rename = "cmd line opts", default)]
    cmd_line_opts: Option<String>,
}

/// One `scheduled workers` entry. On the wire this is a single-key mapping
/// (`{module_name: {every: ..., at: ..., cmd line opts: ...}}`), matching
/// `original_source/nemo_nowcast/scheduler.py`'s
/// `list(sched_item.keys())[0]` access -- the section as a whole is an
/// ordered *sequence* of these, not a mapping keyed by module name, since the
/// same module may legitimately be scheduled more than once at different
/// times.
#[derive(Debug, Clone)]
pub struct ScheduledWorker {
    pub module: String,
    pub every: String,
    pub at: String,
    pub cmd_line_opts: Option<String>,
}

impl<'de> Deserialize<'de> for ScheduledWorker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, ScheduledWorkerBody>::deserialize(deserializer)?;
        let mut entries = map.into_iter();
        let (module, body) = entries
            .next()
            .ok_or_else(|| D::Error::custom("scheduled workers entry has no module key"))?;
        if entries.next().is_some() {
            return Err(D::Error::custom(
                "scheduled workers entry must have exactly one module key",
            ));
        }
        Ok(ScheduledWorker {
            module,
            every: body.every,
            at: body.at,
            cmd_line_opts: body.cmd_line_opts,
        })
    }
}

impl Serialize for ScheduledWorker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let body = ScheduledWorkerBody {
            every: self.every.clone(),
            at: self.at.clone(),
            cmd_line_opts: self.cmd_line_opts.clone(),
        };
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.module, &body)?;
        map.end()
    }
}

/// `zmq` configuration section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZmqConfig {
    pub host: String,
    pub ports: ZmqPorts,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZmqPorts {
    pub manager: u16,
    pub workers: u16,
    pub logging: Option<u16>,
}

/// `slack notifications` configuration section. Two well-known optional
/// string keys (`website log url`, `website checklist url`) are appended to
/// every notification when present; every other key is an environment
/// variable name whose value names a Slack webhook URL, mapped to the
/// worker names whose messages should trigger a POST through it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SlackNotifications {
    #[serde(rename = "website log url", default)]
    pub website_log_url: Option<String>,

    #[serde(rename = "website checklist url", default)]
    pub website_checklist_url: Option<String>,

    #[serde(flatten)]
    pub webhooks: BTreeMap<String, Vec<String>>,
}

impl SlackNotifications {
    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }
}

/// Rotating-file-handler parameters consumed by `nowcast_logging` (ambient:
/// not named by the core dispatch spec, but required to actually start a
/// daemon).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: String,
    #[serde(default = "default_log_base_name")]
    pub base_name: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_console_level")]
    pub console_level: String,
}

fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_base_name() -> String {
    "nowcast".to_string()
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_max_files() -> usize {
    5
}
fn default_console_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            base_name: default_log_base_name(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            console_level: default_console_level(),
        }
    }
}

/// The full set of configuration sections the core consumes. Sections not
/// present in a given deployment's YAML simply default to empty.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(rename = "checklist file")]
    pub checklist_file: String,

    pub python: String,

    pub zmq: ZmqConfig,

    #[serde(rename = "message registry")]
    pub message_registry: MessageRegistry,

    #[serde(rename = "scheduled workers", default)]
    pub scheduled_workers: Vec<ScheduledWorker>,

    #[serde(rename = "run", default)]
    pub run: RunSection,

    #[serde(rename = "slack notifications", default)]
    pub slack_notifications: SlackNotifications,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// The path this config was loaded from, so SIGHUP reload can re-read
    /// the same file. Not part of the on-disk document itself.
    #[serde(skip)]
    pub source_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunSection {
    #[serde(rename = "enabled hosts", default)]
    pub enabled_hosts: BTreeMap<String, RemoteHost>,
}

impl Config {
    /// Load, substitute environment variables, and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;

        let mut doc: YamlValue =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path_str.clone(),
                source,
            })?;

        substitute_env(&mut doc)?;

        let mut config: Config =
            serde_yaml::from_value(doc).map_err(|source| ConfigError::Parse {
                path: path_str.clone(),
                source,
            })?;
        config.source_path = path_str;
        Ok(config)
    }

    /// Re-read the same file this config was loaded from (SIGHUP reload).
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Config::load(&self.source_path)
    }

    pub fn remote_host(&self, name: &str) -> Result<&RemoteHost, ConfigError> {
        self.run
            .enabled_hosts
            .get(name)
            .ok_or_else(|| ConfigError::UnknownHost(name.to_string()))
    }
}

fn env_pattern() -> Regex {
    Regex::new(r"\$\(NOWCAST\.ENV\.(\w+)\)").expect("static regex is valid")
}

/// Replace every `$(NOWCAST.ENV.<NAME>)` token found in any string scalar
/// across the whole document. Fails loudly (mirroring the reference
/// implementation's `KeyError`) if a referenced variable is unset.
fn substitute_env(value: &mut YamlValue) -> Result<(), ConfigError> {
    let pattern = env_pattern();
    match value {
        YamlValue::String(s) => {
            if pattern.is_match(s) {
                *s = substitute_string(&pattern, s)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq {
                substitute_env(item)?;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_string(pattern: &Regex, input: &str) -> Result<String, ConfigError> {
    let mut err = None;
    let replaced = pattern.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(val) => val,
            Err(_) => {
                err = Some(ConfigError::MissingEnvVar(name.to_string()));
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_yaml() -> &'static str {
        r#"
checklist file: checklist.yaml
python: /usr/bin/python3
zmq:
  host: localhost
  ports:
    manager: 5555
    workers: 5556
message registry:
  next workers module: dispatch
  workers: {}
  manager: {}
"#
    }

    #[test]
    fn loads_minimal_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{}", minimal_yaml()).unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.checklist_file, "checklist.yaml");
        assert_eq!(config.zmq.ports.manager, 5555);
    }

    #[test]
    fn substitutes_env_var() {
        std::env::set_var("NOWCAST_TEST_VAR", "/tmp/from-env");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "{}",
            minimal_yaml().replace(
                "checklist file: checklist.yaml",
                "checklist file: $(NOWCAST.ENV.NOWCAST_TEST_VAR)/checklist.yaml"
            )
        )
        .unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.checklist_file, "/tmp/from-env/checklist.yaml");
        std::env::remove_var("NOWCAST_TEST_VAR");
    }

    #[test]
    fn missing_env_var_is_fatal() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "{}",
            minimal_yaml().replace(
                "checklist file: checklist.yaml",
                "checklist file: $(NOWCAST.ENV.NOWCAST_DEFINITELY_UNSET)/checklist.yaml"
            )
        )
        .unwrap();
        let result = Config::load(f.path());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn scheduled_workers_parses_as_ordered_sequence_of_single_key_maps() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "{}\nscheduled workers:\n  - sleep:\n      every: day\n      at: \"09:00\"\n  - sleep:\n      every: day\n      at: \"21:00\"\n      cmd line opts: \"--foo bar\"\n",
            minimal_yaml()
        )
        .unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.scheduled_workers.len(), 2);
        assert_eq!(config.scheduled_workers[0].module, "sleep");
        assert_eq!(config.scheduled_workers[0].at, "09:00");
        assert_eq!(config.scheduled_workers[1].at, "21:00");
        assert_eq!(
            config.scheduled_workers[1].cmd_line_opts.as_deref(),
            Some("--foo bar")
        );

        let yaml = serde_yaml::to_string(&config).unwrap();
        let reloaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reloaded.scheduled_workers.len(), 2);
        assert_eq!(reloaded.scheduled_workers[0].module, "sleep");
    }
}
