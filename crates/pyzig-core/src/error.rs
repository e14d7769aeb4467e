use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Types of compilation errors
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("not implemented: {0}")]
    Unsupported(String),

    #[error("module '{name}' not found at {searched}")]
    ModuleNotFound { name: String, searched: PathBuf },

    #[error("compilation failed:\n{0}")]
    Toolchain(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Context-aware compilation error
///
/// Carries the error kind plus a stack of human-readable context frames
/// ("in function 'greet'", "while lowering assignment to 'x'") accumulated
/// as the error bubbles out of the generator.
#[derive(Debug, Error)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub context: Vec<String>,
}

impl CompileError {
    /// Create a new error with the given kind
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: Vec::new(),
        }
    }

    /// Shorthand for a source-subset rejection naming the construct
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported(construct.into()))
    }

    /// Add context to the error
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, "\n\nContext:")?;
            for (i, ctx) in self.context.iter().enumerate() {
                write!(f, "\n  {}. {}", i + 1, ctx)?;
            }
        }

        Ok(())
    }
}

impl From<ErrorKind> for CompileError {
    fn from(kind: ErrorKind) -> Self {
        CompileError::new(kind)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::new(ErrorKind::Io(err))
    }
}

/// Result type alias for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    fn ctx(self, ctx: impl Into<String>) -> CompileResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<CompileError>,
{
    fn ctx(self, ctx: impl Into<String>) -> CompileResult<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }
}

/// Helper macro for bailing out of generation with an unsupported construct
#[macro_export]
macro_rules! unsupported {
    ($($arg:tt)*) => {
        return Err($crate::error::CompileError::unsupported(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_construct() {
        let err = CompileError::unsupported("from...import");
        assert_eq!(err.to_string(), "not implemented: from...import");
    }

    #[test]
    fn test_error_with_context() {
        let err = CompileError::unsupported("decorators")
            .with_context("in function 'my_func'")
            .with_context("while lowering module body");

        assert_eq!(err.context.len(), 2);
        let display = err.to_string();
        assert!(display.contains("not implemented: decorators"));
        assert!(display.contains("in function 'my_func'"));
    }

    #[test]
    fn test_module_not_found_names_path() {
        let err = CompileError::new(ErrorKind::ModuleNotFound {
            name: "mymath".to_string(),
            searched: PathBuf::from("/src/mymath.py"),
        });
        let display = err.to_string();
        assert!(display.contains("mymath"));
        assert!(display.contains("/src/mymath.py"));
    }

    #[test]
    fn test_toolchain_error_prefix() {
        let err = CompileError::new(ErrorKind::Toolchain("error: oh no".to_string()));
        assert!(err.to_string().starts_with("compilation failed:"));
    }
}
