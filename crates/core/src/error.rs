use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxtagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid resource type '{0}', expected one of: qemu, lxc")]
    InvalidResourceKind(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProxtagError>;
