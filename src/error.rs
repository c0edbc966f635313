use std::io;

/// Errors raised while configuring or servicing intercepted accesses
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A configuration key is missing or malformed
    #[error("configuration key `{key}`: {reason}")]
    Config { key: String, reason: String },

    /// Access width is not one of 8, 16, 32, 64 or 128 bits
    #[error("invalid memory access width of {0} bits")]
    InvalidWidth(u32),

    /// Width is valid but the operation cannot be expressed at it
    #[error("{0} bit values are not supported here")]
    UnsupportedWidth(u32),

    /// An annotation script broke its return protocol
    #[error("annotation script error: {0}")]
    Script(String),

    /// Malformed message from the remote oracle
    #[error("remote protocol error: {0}")]
    Protocol(String),

    /// Emulated memory that had to be concrete was not
    #[error("memory at {0:#x} is not concrete")]
    SymbolicMemory(u64),

    /// The remote oracle went away
    #[error("remote end disconnected")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Error::config(key, "required key is missing")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
