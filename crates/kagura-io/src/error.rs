use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    /// Input stream exhausted; the normal termination signal.
    #[error("end of input stream")]
    Eof,

    /// The underlying read failed.
    #[error("input read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl IoError {
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

pub type IoResult<T> = Result<T, IoError>;
