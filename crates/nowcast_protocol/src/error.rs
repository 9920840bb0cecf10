use thiserror::Error;

/// Errors from serializing or deserializing a [`crate::Message`] on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to deserialize message: {0}")]
    Deserialize(serde_yaml::Error),

    #[error("message is missing required key: {0}")]
    MissingKey(&'static str),
}

/// Errors from loading and validating a [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("environment variable not set: {0}")]
    MissingEnvVar(String),

    #[error("config section missing or malformed: {0}")]
    MissingSection(&'static str),

    #[error("unknown host '{0}' referenced by a scheduled or dispatched worker")]
    UnknownHost(String),
}

/// Errors from the manager's message registry gate.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unregistered worker")]
    UnregisteredWorker,

    #[error("unregistered message type")]
    UnregisteredMessageType,

    #[error("worker '{0}' has no checklist key declared")]
    NoChecklistKey(String),
}

/// Errors from checklist persistence.
#[derive(Debug, Error)]
pub enum ChecklistError {
    #[error("failed to write checklist to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read checklist from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checklist: {0}")]
    Serialize(#[from] serde_yaml::Error),
}
