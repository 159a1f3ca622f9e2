//! Error taxonomy and backend error classification
//!
//! Every operation surfaces one of three kinds:
//!
//! - [`ErrorKind::Runtime`]: the backend is unavailable or failed to initialise
//! - [`ErrorKind::Logic`]: the caller violated a precondition
//! - [`ErrorKind::Execution`]: a well-formed request failed while executing
//!
//! Backends report [`BackendError`]; [`classify`] maps those onto [`HalError`].

use std::fmt;
use std::io;
use thiserror::Error;

/// Which of the three error kinds a [`HalError`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Runtime,
    Logic,
    Execution,
}

impl ErrorKind {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Runtime => "ERR_WPI_RUNTIME",
            ErrorKind::Logic => "ERR_WPI_LOGICERROR",
            ErrorKind::Execution => "ERR_WPI_EXECUTIONERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum HalError {
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("execution error: {0}")]
    Execution(String),
}

impl HalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HalError::Runtime(_) => ErrorKind::Runtime,
            HalError::Logic(_) => ErrorKind::Logic,
            HalError::Execution(_) => ErrorKind::Execution,
        }
    }

    pub fn is_logic(&self) -> bool {
        self.kind() == ErrorKind::Logic
    }

    pub fn is_runtime(&self) -> bool {
        self.kind() == ErrorKind::Runtime
    }

    pub fn is_execution(&self) -> bool {
        self.kind() == ErrorKind::Execution
    }

    pub(crate) fn logic(msg: impl Into<String>) -> Self {
        HalError::Logic(msg.into())
    }

    pub(crate) fn execution(msg: impl Into<String>) -> Self {
        HalError::Execution(msg.into())
    }
}

/// Failures reported by a hardware backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The driver layer cannot be reached at all
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("unknown descriptor: {0}")]
    BadDescriptor(i32),

    #[error("{0}")]
    Failed(String),

    #[error("IOError {0}")]
    Io(#[from] io::Error),

    #[error("IOError {0}")]
    Errno(#[from] nix::Error),
}

/// Map a backend failure onto the caller-facing taxonomy
pub fn classify(err: BackendError) -> HalError {
    match err {
        BackendError::Unavailable(msg) => HalError::Runtime(msg),
        BackendError::PermissionDenied(msg) => {
            HalError::Runtime(format!("insufficient privilege: {msg}"))
        }
        BackendError::Unsupported(msg) => HalError::Execution(format!("not supported: {msg}")),
        BackendError::UnsupportedBaud(baud) => {
            HalError::Execution(format!("unsupported baudrate value {baud}"))
        }
        BackendError::BadDescriptor(fd) => {
            HalError::Execution(format!("backend does not know descriptor {fd}"))
        }
        BackendError::Failed(msg) => HalError::Execution(msg),
        other @ (BackendError::Io(_) | BackendError::Errno(_)) => {
            HalError::Execution(other.to_string())
        }
    }
}

impl From<BackendError> for HalError {
    fn from(err: BackendError) -> Self {
        classify(err)
    }
}
