//! The manager's persisted system-state checklist: a mapping from
//! arbitrary string keys to arbitrary [`Value`]s, rewritten to disk after
//! every update via write-then-rename so a concurrent reader never observes
//! a partially-written file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use nowcast_protocol::{ChecklistError, RegistryError, Value};
use tracing::{info, warn};

/// The in-memory checklist. Invariant: after any mutating method returns,
/// the file at the configured path is a valid serialization of `self`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checklist {
    entries: BTreeMap<String, Value>,
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a previously-persisted checklist from disk. A missing file is
    /// not an error at this layer -- callers map `NotFound` to an empty
    /// checklist and a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChecklistError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ChecklistError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let entries: BTreeMap<String, Value> = serde_yaml::from_str(&raw)?;
        Ok(Self { entries })
    }

    /// Load from disk, falling back to an empty checklist (with a logged
    /// warning) when the file does not yet exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(checklist) => {
                info!(path = %path.as_ref().display(), "checklist read from disk");
                checklist
            }
            Err(ChecklistError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.as_ref().display(), "checklist load failed, running with empty checklist");
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "checklist load failed, running with empty checklist");
                Self::new()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply the checklist update rule for a message carrying a non-null
    /// payload from worker `source`: look up `source`'s registered
    /// checklist key, then merge (if both sides are mappings) or replace
    /// the value at that key.
    pub fn apply_update(
        &mut self,
        checklist_key: &str,
        payload: Value,
    ) -> Result<(), RegistryError> {
        match self.entries.get_mut(checklist_key) {
            Some(existing) => existing.merge_or_replace(payload),
            None => {
                self.entries.insert(checklist_key.to_string(), payload);
            }
        }
        Ok(())
    }

    /// Serialize the whole checklist as a YAML mapping, e.g. for passing
    /// across the dispatch-plugin FFI boundary or for logging before a
    /// clear.
    pub fn to_yaml(&self) -> Result<String, ChecklistError> {
        Ok(serde_yaml::to_string(&self.entries)?)
    }

    /// Write the checklist to `path`, writing to a sibling temp file and
    /// renaming over the target so a concurrent reader always observes
    /// either the fully-old or fully-new contents, never a truncated write.
    pub fn write_to_disk(&self, path: impl AsRef<Path>) -> Result<(), ChecklistError> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp_path = match dir {
            Some(dir) => dir.join(format!(
                ".{}.tmp",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "checklist".to_string())
            )),
            None => std::path::PathBuf::from(format!(
                ".{}.tmp",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "checklist".to_string())
            )),
        };

        let write_result = (|| -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(yaml.as_bytes())?;
            f.flush()?;
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        write_result.map_err(|source| ChecklistError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn merge_combines_mappings() {
        let mut checklist = Checklist::new();
        let mut a = Map::new();
        a.insert("a".to_string(), Value::Int(1));
        checklist.apply_update("fcst", Value::Mapping(a)).unwrap();

        let mut b = Map::new();
        b.insert("b".to_string(), Value::Int(2));
        checklist.apply_update("fcst", Value::Mapping(b)).unwrap();

        let stored = checklist.get("fcst").unwrap().as_mapping().unwrap();
        assert_eq!(stored.get("a"), Some(&Value::Int(1)));
        assert_eq!(stored.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn replace_when_existing_is_not_a_mapping() {
        let mut checklist = Checklist::new();
        checklist
            .apply_update("sleep time", Value::Int(5))
            .unwrap();
        checklist
            .apply_update("sleep time", Value::Int(10))
            .unwrap();
        assert_eq!(checklist.get("sleep time"), Some(&Value::Int(10)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checklist.yaml");

        let mut checklist = Checklist::new();
        checklist.apply_update("awoke", Value::Bool(true)).unwrap();
        checklist.write_to_disk(&path).unwrap();

        let reloaded = Checklist::load(&path).unwrap();
        assert_eq!(reloaded.get("awoke"), Some(&Value::Bool(true)));
    }

    #[test]
    fn load_or_default_on_missing_file_is_empty() {
        let checklist = Checklist::load_or_default("/nonexistent/path/checklist.yaml");
        assert!(checklist.is_empty());
    }

    #[test]
    fn clearing_wipes_all_entries() {
        let mut checklist = Checklist::new();
        checklist.apply_update("x", Value::Int(1)).unwrap();
        checklist.clear();
        assert!(checklist.is_empty());
    }
}
