use thiserror::Error;

/// Error surface for a single connection's lifetime.
///
/// Transport and transcribe errors are handled distinctly in the connection
/// driver (see `server::handle_connection`): transport errors end the
/// connection quietly, transcribe errors are logged and abort it.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("recognizer failure: {0}")]
    Transcribe(#[from] anyhow::Error),
}

/// Fatal startup errors: bind failure or invalid configuration. These cause
/// the process to exit with a non-zero status.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load recognizer model: {0}")]
    Model(#[source] anyhow::Error),
}
