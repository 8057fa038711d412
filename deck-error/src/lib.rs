use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeckError>;

/// Error taxonomy shared by every crate in the workspace.
///
/// `Validation` and `Decode` abort a single upload; `AssetLoad` aborts the
/// whole profile operation that requested the preload; `Persistence` is
/// caught and logged by the profile manager rather than propagated.
#[derive(Error, Debug)]
pub enum DeckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid upload: {0}")]
    Validation(String),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("failed to load texture `{0}`: {1}")]
    AssetLoad(String, String),
    #[error("image processing failed: {0}")]
    Processing(String),
    #[error("unknown profile id: {0}")]
    NotFound(String),
    #[error("persistence error: {0} {1}")]
    Persistence(String, String),
    #[error("parsing error")]
    Parse,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for DeckError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}
