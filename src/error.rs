use crate::toolchain::ToolchainError;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum TestGenError {
    InvalidConfig(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    CacheParse {
        path: PathBuf,
        reason: String,
    },
    ShapeMismatch {
        expected: Vec<usize>,
        actual_elements: usize,
    },
    UnsupportedByteWidth(usize),
    Toolchain(ToolchainError),
    Json(serde_json::Error),
    Backend(String),
}

impl TestGenError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TestGenError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        TestGenError::InvalidConfig(message.into())
    }
}

impl fmt::Display for TestGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestGenError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            TestGenError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            TestGenError::CacheParse { path, reason } => {
                write!(f, "Malformed data cache {}: {}", path.display(), reason)
            }
            TestGenError::ShapeMismatch {
                expected,
                actual_elements,
            } => write!(
                f,
                "Cannot reshape {} elements into shape {:?}",
                actual_elements, expected
            ),
            TestGenError::UnsupportedByteWidth(width) => {
                write!(f, "Size not supported: {}", width)
            }
            TestGenError::Toolchain(err) => write!(f, "External tool error: {}", err),
            TestGenError::Json(err) => write!(f, "JSON error: {}", err),
            TestGenError::Backend(msg) => write!(f, "Interpreter backend error: {}", msg),
        }
    }
}

impl std::error::Error for TestGenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TestGenError::Io { source, .. } => Some(source),
            TestGenError::Toolchain(err) => Some(err),
            TestGenError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ToolchainError> for TestGenError {
    fn from(value: ToolchainError) -> Self {
        TestGenError::Toolchain(value)
    }
}

impl From<serde_json::Error> for TestGenError {
    fn from(value: serde_json::Error) -> Self {
        TestGenError::Json(value)
    }
}
