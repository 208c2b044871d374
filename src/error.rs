//! Error handling for pdfgraft
//!
//! Two families matter to callers: *damage* (the input violates PDF
//! structural expectations, carries file/object/offset context, may be
//! downgraded to a warning) and *logic* errors (library misuse, never
//! suppressed).

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for pdfgraft operations
pub type Result<T> = std::result::Result<T, Error>;

/// Category code carried by a [`Damage`] record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Structurally damaged PDF input
    DamagedPdf,
    /// Password did not match
    Password,
    /// Feature present in the file but not implemented
    Unsupported,
    /// Internal consistency failure
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DamagedPdf => "damaged_pdf",
            Self::Password => "password",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal",
        }
    }
}

/// Structured damage report: where in which file what went wrong
#[derive(Debug, Clone)]
pub struct Damage {
    /// Category code
    pub code: ErrorCode,
    /// Name of the input source the damage was observed in
    pub filename: String,
    /// Description of the object being processed, if any
    pub object: String,
    /// Byte offset the damage was observed at
    pub offset: u64,
    /// Human-readable message
    pub message: String,
}

impl Damage {
    pub fn new(
        code: ErrorCode,
        filename: impl Into<String>,
        object: impl Into<String>,
        offset: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            filename: filename.into(),
            object: object.into(),
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for Damage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filename)?;
        if !self.object.is_empty() {
            write!(f, " ({})", self.object)?;
        }
        if self.offset > 0 {
            write!(f, " (offset {})", self.offset)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The main error type for pdfgraft operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Damaged(Damage),
    #[error("logic error: {0}")]
    Logic(String),
    #[error("system error: {0}")]
    System(#[from] io::Error),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid password")]
    Password,
}

impl Error {
    pub fn logic<S: Into<String>>(msg: S) -> Self {
        Error::Logic(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Damage record for this error, if it is one
    pub fn damage(&self) -> Option<&Damage> {
        match self {
            Error::Damaged(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_damaged(&self) -> bool {
        matches!(self, Error::Damaged(_))
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, Error::Logic(_))
    }
}

impl From<Damage> for Error {
    fn from(d: Damage) -> Self {
        Error::Damaged(d)
    }
}
