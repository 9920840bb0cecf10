use thiserror::Error;

/// Errors from loading or invoking the hot-reloadable dispatch plugin.
/// Distinct from [`nowcast_protocol::RegistryError`]: these are failures of
/// the plugin mechanism itself, not of the message registry gate.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to load dispatch module from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("after_{0} plugin call failed (returned null)")]
    PluginFailed(String),

    #[error("dispatch module returned malformed output for after_{0}: {1}")]
    MalformedOutput(String, serde_yaml::Error),

    #[error("failed to stat dispatch module at {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
