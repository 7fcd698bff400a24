//! Byte-addressable buckets of files.
//!
//! A bucket is a flat namespace of `/`-separated relative paths. Workspaces,
//! modules and well-known types are all expressed as [`ReadBucket`]s so that
//! the same resolution code runs against local directories, in-memory fixtures
//! and module data handed out by a registry.

mod mem;
mod os;

use crate::error::{join_close, Result};
use crate::normalpath;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

pub use mem::MemBucket;
pub use os::OsBucket;

/// Metadata for a single object in a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Bucket-relative path
    pub path: String,
    /// Path as the user would refer to it (on-disk path, or the bucket path)
    pub external_path: String,
}

impl ObjectInfo {
    /// Creates an object info whose external path equals its path
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            external_path: path.clone(),
            path,
        }
    }
}

/// Read-only access to a bucket
pub trait ReadBucket: Send + Sync + fmt::Debug {
    /// Returns object metadata, or `None` if the path does not exist
    fn stat(&self, path: &str) -> Result<Option<ObjectInfo>>;

    /// Reads the full content of an object
    fn get(&self, path: &str) -> Result<Bytes>;

    /// Lists every object under `prefix` (use `.` for everything), sorted by path
    fn walk(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Returns true if the path exists
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }
}

/// Read-write access to a bucket
pub trait ReadWriteBucket: ReadBucket {
    /// Writes an object, replacing any existing content
    fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Removes an object; removing a missing object is not an error
    fn delete(&self, path: &str) -> Result<()>;
}

/// A bucket that must be released once the caller is done with it
pub trait ReadBucketCloser: Send {
    /// The readable bucket
    fn bucket(&self) -> Arc<dyn ReadBucket>;

    /// Releases the bucket
    fn close(self: Box<Self>) -> Result<()>;
}

/// A [`ReadBucketCloser`] whose close never fails
#[derive(Debug)]
pub struct NopCloser {
    bucket: Arc<dyn ReadBucket>,
}

impl NopCloser {
    /// Wraps a bucket
    pub fn new(bucket: Arc<dyn ReadBucket>) -> Self {
        Self { bucket }
    }
}

impl ReadBucketCloser for NopCloser {
    fn bucket(&self) -> Arc<dyn ReadBucket> {
        Arc::clone(&self.bucket)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Runs `f` against the bucket and always closes it afterwards.
///
/// If both `f` and the close fail, both errors are returned joined.
pub fn with_read_bucket_closer<T>(
    closer: Box<dyn ReadBucketCloser>,
    f: impl FnOnce(Arc<dyn ReadBucket>) -> Result<T>,
) -> Result<T> {
    let result = f(closer.bucket());
    join_close(result, closer.close())
}

/// A view of another bucket rooted at a sub-directory
#[derive(Debug, Clone)]
pub struct SubBucket {
    inner: Arc<dyn ReadBucket>,
    prefix: String,
}

impl SubBucket {
    /// Creates a view of `inner` rooted at `prefix`
    pub fn new(inner: Arc<dyn ReadBucket>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: normalpath::normalize(prefix),
        }
    }

    /// Maps a view path to an inner path
    fn inner_path(&self, path: &str) -> String {
        normalpath::join(&self.prefix, path)
    }
}

impl ReadBucket for SubBucket {
    fn stat(&self, path: &str) -> Result<Option<ObjectInfo>> {
        Ok(self.inner.stat(&self.inner_path(path))?.map(|info| ObjectInfo {
            path: normalpath::normalize(path),
            external_path: info.external_path,
        }))
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        self.inner.get(&self.inner_path(path))
    }

    fn walk(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let infos = self.inner.walk(&self.inner_path(prefix))?;
        Ok(infos
            .into_iter()
            .filter_map(|info| {
                let path = normalpath::strip_dir(&self.prefix, &info.path)?.to_string();
                Some(ObjectInfo {
                    path,
                    external_path: info.external_path,
                })
            })
            .collect())
    }
}

/// Keeps only the `.proto` files of a walk result
pub fn proto_files(infos: Vec<ObjectInfo>) -> Vec<ObjectInfo> {
    infos
        .into_iter()
        .filter(|info| normalpath::ext(&info.path) == ".proto")
        .collect()
}
