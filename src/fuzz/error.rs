use crate::subprocess::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum FuzzToolError {
    #[error("Cannot connect to fuzz tool on port {port} after {attempts} attempts")]
    ConnectFailed { port: u16, attempts: u32 },

    #[error("Fuzz tool is not running")]
    NotRunning,

    #[error("Fuzz tool process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Fuzz tool socket error: {0}")]
    Io(#[from] std::io::Error),
}
