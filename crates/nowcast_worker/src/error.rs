use thiserror::Error;

/// Errors a worker function may raise, and errors the harness itself can
/// hit while talking to the manager. Distinct from an unhandled panic: a
/// `WorkerError` is the typed, expected failure path (`failure_fn` runs and
/// reports to the manager); an unhandled panic is the `crash` path.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Declared(String),

    #[error("transport error talking to manager: {0}")]
    Transport(#[from] zmq::Error),

    #[error("timed out waiting for manager reply")]
    Timeout,

    #[error("worker '{0}' is not declared in the message registry")]
    UnregisteredWorker(String),

    #[error("message type '{0}' is not declared for worker '{1}'")]
    UnregisteredMessageType(String, String),

    #[error("manager replied with an unrecognized message type: {0}")]
    UnrecognizedReply(String),

    #[error(transparent)]
    Protocol(#[from] nowcast_protocol::ProtocolError),

    #[error(transparent)]
    Config(#[from] nowcast_protocol::ConfigError),
}
