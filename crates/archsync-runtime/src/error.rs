use thiserror::Error;

/// Errors from sync sessions and package builds.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the archsync-format crate.
    #[error(transparent)]
    Format(#[from] archsync_format::Error),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Format(archsync_format::Error::IoError(err))
    }
}

/// Result type for archsync-runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
