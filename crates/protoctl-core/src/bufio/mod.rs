//! Turning references into bytes.
//!
//! A [`Reader`] resolves bucket-backed references to buckets, module
//! references to pinned keys, and message references to byte streams; a
//! [`Writer`] opens message references for output. Every stream and bucket
//! handed out must be closed, and [`read_all`] / [`write_all`] do so on every
//! path.

mod local;

use crate::context::Context;
use crate::error::{join_close, Error, Result};
use crate::module::{ModuleKey, ModuleRef};
use crate::reference::{DirRef, MessageRef, ProtoFileRef, SourceRef};
use crate::storage::{ReadBucketCloser, ReadWriteBucket};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use local::{LocalReader, LocalWriter};

/// A shared input stream
pub type SharedReader = Arc<Mutex<dyn Read + Send>>;
/// A shared output stream
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// The process environment an operation runs in
#[derive(Clone)]
pub struct Container {
    cwd: PathBuf,
    stdin: SharedReader,
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("cwd", &self.cwd).finish_non_exhaustive()
    }
}

impl Container {
    /// A container over the process's standard streams
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            stdin: Arc::new(Mutex::new(io::stdin())),
            stdout: Arc::new(Mutex::new(io::stdout())),
            stderr: Arc::new(Mutex::new(io::stderr())),
        }
    }

    /// A container rooted at the process's working directory
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Replaces standard input
    pub fn with_stdin(mut self, stdin: SharedReader) -> Self {
        self.stdin = stdin;
        self
    }

    /// Replaces standard output
    pub fn with_stdout(mut self, stdout: SharedWriter) -> Self {
        self.stdout = stdout;
        self
    }

    /// Replaces standard error
    pub fn with_stderr(mut self, stderr: SharedWriter) -> Self {
        self.stderr = stderr;
        self
    }

    /// The working directory relative paths are resolved against
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Standard input
    pub fn stdin(&self) -> SharedReader {
        Arc::clone(&self.stdin)
    }

    /// Standard output
    pub fn stdout(&self) -> SharedWriter {
        Arc::clone(&self.stdout)
    }

    /// Standard error
    pub fn stderr(&self) -> SharedWriter {
        Arc::clone(&self.stderr)
    }
}

/// A readable stream that must be closed
pub trait ReadCloser: Read + Send {
    /// Releases the stream
    fn close(self: Box<Self>) -> Result<()>;
}

/// A writable stream that must be closed; closing flushes
pub trait WriteCloser: Write + Send {
    /// Flushes and releases the stream
    fn close(self: Box<Self>) -> Result<()>;
}

/// Reads a stream to the end and closes it, joining both failures
pub fn read_all(mut reader: Box<dyn ReadCloser>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let result = reader.read_to_end(&mut data).map(|_| data).map_err(Error::from);
    join_close(result, reader.close())
}

/// Writes all of `data` and closes the stream, joining both failures
pub fn write_all(mut writer: Box<dyn WriteCloser>, data: &[u8]) -> Result<()> {
    let result = writer.write_all(data).map_err(Error::from);
    join_close(result, writer.close())
}

/// The references a [`Reader`] resolves to a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketRef {
    /// A single `.proto` file
    ProtoFile(ProtoFileRef),
    /// A directory, git repository or archive
    Source(SourceRef),
}

/// Caller-facing targeting, before re-rooting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketOptions {
    /// Paths to target, as the user wrote them
    pub target_paths: Vec<String>,
    /// Paths to exclude, as the user wrote them
    pub target_exclude_paths: Vec<String>,
}

/// A `.proto` file input, bucket-relative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoFileTarget {
    /// The file
    pub path: String,
    /// Whether files of the same package are targeted too
    pub include_package_files: bool,
}

/// Targeting re-rooted onto a bucket.
///
/// The bucket of a local input is rooted at its workspace root, which may lie
/// above the directory the user named. Every path here is relative to that
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTargeting {
    /// The directory the user named
    pub subdir_path: String,
    /// Paths to target
    pub target_paths: Vec<String>,
    /// Paths to exclude
    pub target_exclude_paths: Vec<String>,
    /// Set when the input was a single `.proto` file
    pub proto_file: Option<ProtoFileTarget>,
}

impl Default for BucketTargeting {
    fn default() -> Self {
        Self {
            subdir_path: ".".to_string(),
            target_paths: Vec::new(),
            target_exclude_paths: Vec::new(),
            proto_file: None,
        }
    }
}

/// Resolves references to readable data
pub trait Reader: Send + Sync {
    /// Opens the bucket behind a source or proto-file reference and maps the
    /// caller's paths onto it
    fn get_source_read_bucket_closer(
        &self,
        ctx: &Context,
        container: &Container,
        bucket_ref: &BucketRef,
        options: &BucketOptions,
    ) -> Result<(Box<dyn ReadBucketCloser>, BucketTargeting)>;

    /// Opens a local directory for reading and writing
    fn get_dir_read_write_bucket(
        &self,
        ctx: &Context,
        container: &Container,
        dir_ref: &DirRef,
    ) -> Result<Arc<dyn ReadWriteBucket>>;

    /// Pins a module reference
    fn get_module_key(&self, ctx: &Context, container: &Container, module_ref: &ModuleRef) -> Result<ModuleKey>;

    /// Opens a message file, or standard input
    fn get_message_file(
        &self,
        ctx: &Context,
        container: &Container,
        message_ref: &MessageRef,
    ) -> Result<Box<dyn ReadCloser>>;
}

/// Opens message references for output
pub trait Writer: Send + Sync {
    /// Opens a message file, or standard output
    fn put_message_file(
        &self,
        ctx: &Context,
        container: &Container,
        message_ref: &MessageRef,
    ) -> Result<Box<dyn WriteCloser>>;
}
