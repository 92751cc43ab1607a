use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Runtime-layer error
#[derive(Debug)]
pub enum Error {
    /// Storage layer error
    Store(openmem_store::Error),

    /// AI capability error
    Ai(openmem_ai::AiError),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Ai(err) => write!(f, "AI error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Ai(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Config(_) | Error::InvalidOperation(_) => None,
        }
    }
}

impl From<openmem_store::Error> for Error {
    fn from(err: openmem_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<openmem_ai::AiError> for Error {
    fn from(err: openmem_ai::AiError) -> Self {
        Error::Ai(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
