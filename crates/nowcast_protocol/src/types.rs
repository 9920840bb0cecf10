use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A dynamically-typed value carried in a [`Message`] payload or stored in
/// the checklist. Covers the same tagged union as the reference
/// implementation's untyped payloads: null, bool, integer, float, string,
/// list, and mapping (keyed by string, matching the YAML wire format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Merge `other` into `self` if both are mappings (last-writer-wins per
    /// inner key), otherwise replace `self` with `other` entirely. This is
    /// the checklist update rule from the manager's dispatch handling.
    pub fn merge_or_replace(&mut self, other: Value) {
        if let (Value::Mapping(existing), Value::Mapping(incoming)) = (&mut *self, &other) {
            for (k, v) in incoming {
                existing.insert(k.clone(), v.clone());
            }
        } else {
            *self = other;
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// The wire envelope passed between every worker and the manager, via the
/// broker. `source` is a worker name or `"manager"`; `type` is a key the
/// receiver looks up in the message registry; `payload` is an arbitrary
/// [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(source: impl Into<String>, msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            msg_type: msg_type.into(),
            payload,
        }
    }

    pub fn manager_reply(msg_type: impl Into<String>, payload: Value) -> Self {
        Self::new("manager", msg_type, payload)
    }

    /// Serialize as the stable, text-based wire format (a YAML mapping of
    /// exactly `source`/`type`/`payload`).
    pub fn serialize(&self) -> Result<String, ProtocolError> {
        serde_yaml::to_string(self).map_err(ProtocolError::from)
    }

    pub fn deserialize(text: &str) -> Result<Self, ProtocolError> {
        serde_yaml::from_str(text).map_err(ProtocolError::Deserialize)
    }
}

/// A declared intent to launch a worker subprocess with specific arguments,
/// on a specific host. `host` is either `"localhost"` or a key into the
/// `run.enabled hosts` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextWorker {
    pub module: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl NextWorker {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            args: Vec::new(),
            host: default_host(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn is_localhost(&self) -> bool {
        self.host == "localhost"
    }
}

/// The effective result of a dispatch hook call: the successors to launch
/// right now, plus an optional race-condition barrier to install.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchOutcome {
    pub successors: Vec<NextWorker>,
    pub barrier: Option<BarrierInstall>,
}

/// The `(list<NextWorker>, set<worker_name>)` tuple form a dispatch hook may
/// return instead of a bare list.
#[derive(Debug, Clone, PartialEq)]
pub struct BarrierInstall {
    pub must_finish: std::collections::BTreeSet<String>,
}

/// Per-worker registry entry: declared message types this worker may send,
/// and (optionally) the checklist key its payloads are merged under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerRegistryEntry {
    #[serde(rename = "checklist key")]
    pub checklist_key: Option<String>,
    /// message type -> human readable description
    #[serde(flatten)]
    pub message_types: BTreeMap<String, String>,
}

impl WorkerRegistryEntry {
    pub fn declares(&self, msg_type: &str) -> bool {
        self.message_types.contains_key(msg_type)
    }
}

/// `message registry` configuration section: per-worker entries plus the
/// manager's own reply-type vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRegistry {
    #[serde(rename = "next workers module")]
    pub next_workers_module: String,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerRegistryEntry>,
    #[serde(default)]
    pub manager: BTreeMap<String, String>,
}

impl MessageRegistry {
    pub fn worker(&self, name: &str) -> Option<&WorkerRegistryEntry> {
        self.workers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_yaml() {
        let mut payload = BTreeMap::new();
        payload.insert("a".to_string(), Value::Int(1));
        let msg = Message::new("sleep", "success", Value::Mapping(payload));

        let text = msg.serialize().unwrap();
        let back = Message::deserialize(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn message_with_null_payload_round_trips() {
        let msg = Message::new("sleep", "success", Value::Null);
        let text = msg.serialize().unwrap();
        let back = Message::deserialize(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn value_merge_combines_mappings() {
        let mut existing = BTreeMap::new();
        existing.insert("a".to_string(), Value::Int(1));
        let mut existing = Value::Mapping(existing);

        let mut incoming = BTreeMap::new();
        incoming.insert("b".to_string(), Value::Int(2));
        existing.merge_or_replace(Value::Mapping(incoming));

        let m = existing.as_mapping().unwrap();
        assert_eq!(m.get("a"), Some(&Value::Int(1)));
        assert_eq!(m.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn value_merge_replaces_when_not_both_mappings() {
        let mut existing = Value::String("old".to_string());
        existing.merge_or_replace(Value::Int(5));
        assert_eq!(existing, Value::Int(5));
    }

    #[test]
    fn next_worker_defaults_to_localhost() {
        let w = NextWorker::new("awaken");
        assert!(w.is_localhost());
        assert!(w.args.is_empty());
    }
}
