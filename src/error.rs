use std::io;

/// Errors from the lockstep validation core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("instance count {got} out of range (1..={max})")]
    InstanceCount { got: usize, max: usize },

    #[error("instance id {id} out of range for {num_instances} instances")]
    InstanceId { id: i32, num_instances: usize },

    #[error("required environment variable {0} is missing or malformed")]
    Env(&'static str),

    #[error("invalid coordinator address '{0}'")]
    InvalidAddress(String),

    #[error("failed to connect to coordinator after {attempts} attempts")]
    ConnectTimedOut { attempts: u32 },

    #[error("restart from a checkpoint image is not supported; use resume")]
    RestartUnsupported,

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the fixed-layout wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
