use thiserror::Error;

/// GMF module errors
#[derive(Debug, Error)]
pub enum GmfError {
    #[error("Invalid JSON: {0}")]
    Syntax(String),

    #[error("Invalid module structure: {0}")]
    Structure(String),
}
