//! Error types for the protoctl-core library.
//!
//! This module provides error handling using the `thiserror` crate, with
//! variants grouped by the kind of failure they represent. [`Error::kind`]
//! classifies every variant so that callers can separate user mistakes from
//! compile diagnostics, empty results and internal bugs.

use crate::annotation::FileAnnotationSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protoctl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code used when file annotations were already printed.
pub const EXIT_CODE_FILE_ANNOTATION: i32 = 100;

/// Comprehensive error type for all protoctl operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The input string or structured input could not be parsed
    #[error("invalid input '{input}': {reason}")]
    MalformedInput {
        /// The raw input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Two options were given that cannot be used together
    #[error("{0}")]
    InvalidFlagCombination(String),

    /// Unknown message encoding name
    #[error("unknown message encoding '{0}': must be one of binpb, json, txtpb, yaml")]
    UnknownEncoding(String),

    /// Compile or configuration diagnostics that have not been printed yet
    #[error("{0}")]
    FileAnnotations(FileAnnotationSet),

    /// Diagnostics were printed; the process should exit with code 100
    #[error("file annotations reported")]
    FileAnnotationsReported,

    /// No target `.proto` files remained after path filtering
    #[error("no .proto target files found")]
    NoTargetProtoFiles,

    /// The operation observed a cancelled context
    #[error("operation cancelled")]
    Cancelled,

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Generic stream I/O failure (stdin/stdout, writers)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A path escaped its root
    #[error("path '{path}' is outside of '{root}'")]
    PathOutsideRoot {
        /// The offending path
        path: String,
        /// The root it must stay within
        root: String,
    },

    /// Object was not found in a bucket
    #[error("{path}: does not exist")]
    ObjectNotFound {
        /// Bucket-relative path
        path: String,
    },

    /// Paths given to a filter matched nothing
    #[error("path(s) not found: {}", .0.join(", "))]
    PathsNotFound(Vec<String>),

    /// The same `.proto` path was provided by two modules
    #[error("file '{path}' is contained in both modules '{first}' and '{second}'")]
    DuplicateProtoFile {
        /// The duplicated path
        path: String,
        /// First module opaque ID
        first: String,
        /// Second module opaque ID
        second: String,
    },

    /// A configuration file could not be parsed or is invalid
    #[error("invalid configuration '{path}': {reason}")]
    Config {
        /// Config file path or `<override>`
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Module could not be resolved
    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    /// Invalid module name or reference
    #[error("invalid module name '{name}': {reason}")]
    InvalidModuleName {
        /// The raw name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// An image failed validation
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A type name given to a filter does not exist in the image
    #[error("type '{0}' not found in image")]
    TypeNotFound(String),

    /// Failed to parse a protobuf message
    #[error("failed to decode protobuf: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// Failed to build descriptors with prost-reflect
    #[error("failed to build file descriptor: {0}")]
    DescriptorBuild(String),

    /// JSON encoding or decoding failed
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding or decoding failed
    #[error("yaml: {0}")]
    Yaml(String),

    /// Protobuf text format decoding failed
    #[error("txtpb: {0}")]
    TextFormat(String),

    /// Message validation found violations
    #[error("validation failed: {}", .0.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
    Validation(Vec<crate::codec::Violation>),

    /// The requested source kind cannot be read by this reader
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A primary failure and a resource-release failure
    #[error("{primary}; close failed: {close}")]
    Joined {
        /// The failure of the primary operation
        primary: Box<Error>,
        /// The failure while releasing the resource
        close: Box<Error>,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of errors for reporting and telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user gave bad input or a bad flag combination
    User,
    /// Compile or configuration diagnostics
    Diagnostics,
    /// Nothing to do
    EmptyResult,
    /// File system or stream failure
    Io,
    /// Cancelled by the caller
    Cancelled,
    /// A bug: an invariant was violated
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::User => "user",
            ErrorKind::Diagnostics => "diagnostics",
            ErrorKind::EmptyResult => "empty",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Creates a new malformed input error
    pub fn malformed_input(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new object-not-found error
    pub fn object_not_found(path: impl Into<String>) -> Self {
        Self::ObjectNotFound { path: path.into() }
    }

    /// Creates a new configuration error
    pub fn config(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new invalid module name error
    pub fn invalid_module_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModuleName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new descriptor build error
    pub fn descriptor_build(msg: impl fmt::Display) -> Self {
        Self::DescriptorBuild(msg.to_string())
    }

    /// Creates a new invalid image error
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInput { .. }
            | Self::InvalidFlagCombination(_)
            | Self::UnknownEncoding(_)
            | Self::PathOutsideRoot { .. }
            | Self::ObjectNotFound { .. }
            | Self::PathsNotFound(_)
            | Self::DuplicateProtoFile { .. }
            | Self::Config { .. }
            | Self::ModuleNotFound(_)
            | Self::InvalidModuleName { .. }
            | Self::InvalidImage(_)
            | Self::TypeNotFound(_)
            | Self::DescriptorParse(_)
            | Self::DescriptorBuild(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::TextFormat(_)
            | Self::Validation(_)
            | Self::Unsupported(_) => ErrorKind::User,
            Self::FileAnnotations(_) | Self::FileAnnotationsReported => ErrorKind::Diagnostics,
            Self::NoTargetProtoFiles => ErrorKind::EmptyResult,
            Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::DirectoryCreate { .. }
            | Self::Io(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Joined { primary, .. } => primary.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FileAnnotationsReported => EXIT_CODE_FILE_ANNOTATION,
            Self::Joined { primary, .. } => primary.exit_code(),
            _ => 1,
        }
    }

    /// Returns true if this is the "nothing to do" sentinel
    pub fn is_no_target_proto_files(&self) -> bool {
        matches!(self, Self::NoTargetProtoFiles)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<prost_reflect::DescriptorError> for Error {
    fn from(err: prost_reflect::DescriptorError) -> Self {
        Self::descriptor_build(err)
    }
}

/// Combines the result of a primary operation with the result of releasing
/// the resource it used. Neither failure is dropped.
pub fn join_close<T>(result: Result<T>, close: Result<()>) -> Result<T> {
    match (result, close) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close)) => Err(close),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(close)) => Err(Error::Joined {
            primary: Box::new(primary),
            close: Box::new(close),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::malformed_input("foo#bar", "options must be key=value");
        assert!(err.to_string().contains("foo#bar"));
        assert!(err.to_string().contains("key=value"));
    }

    #[test]
    fn test_kind_and_exit_code() {
        assert_eq!(Error::FileAnnotationsReported.exit_code(), 100);
        assert_eq!(Error::NoTargetProtoFiles.exit_code(), 1);
        assert_eq!(Error::NoTargetProtoFiles.kind(), ErrorKind::EmptyResult);
        assert_eq!(Error::internal("x").kind(), ErrorKind::Internal);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_join_close_keeps_both() {
        let joined = join_close::<()>(
            Err(Error::object_not_found("a.proto")),
            Err(Error::internal("close exploded")),
        )
        .unwrap_err();
        let msg = joined.to_string();
        assert!(msg.contains("a.proto"));
        assert!(msg.contains("close exploded"));
        assert_eq!(joined.kind(), ErrorKind::User);
    }

    #[test]
    fn test_join_close_passes_through() {
        assert_eq!(join_close(Ok(3), Ok(())).unwrap(), 3);
        assert!(matches!(
            join_close(Ok(3), Err(Error::Cancelled)),
            Err(Error::Cancelled)
        ));
    }
}
