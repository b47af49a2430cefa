use thiserror::Error;

// Unified error type for couplet

#[derive(Error, Debug)]
pub enum CplError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("numerical error: {0}")]
    Numerics(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not supported: {0}")]
    Unsupported(String),
}
