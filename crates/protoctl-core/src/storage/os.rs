use super::{ObjectInfo, ReadBucket, ReadWriteBucket};
use crate::error::{Error, Result};
use crate::normalpath;
use bytes::Bytes;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// A bucket backed by a local directory
#[derive(Debug, Clone)]
pub struct OsBucket {
    root: PathBuf,
}

impl OsBucket {
    /// Creates a bucket rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn os_path(&self, path: &str) -> Result<PathBuf> {
        let path = normalpath::normalize_and_validate(path)?;
        if path == "." {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(path))
    }

    fn info(&self, path: String) -> ObjectInfo {
        let external_path = self.root.join(&path).display().to_string();
        ObjectInfo {
            path,
            external_path,
        }
    }
}

impl ReadBucket for OsBucket {
    fn stat(&self, path: &str) -> Result<Option<ObjectInfo>> {
        let os_path = self.os_path(path)?;
        match fs::metadata(&os_path) {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(self.info(normalpath::normalize(path))))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::file_read(os_path, e)),
        }
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        let os_path = self.os_path(path)?;
        match fs::read(&os_path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::object_not_found(path)),
            Err(e) => Err(Error::file_read(os_path, e)),
        }
    }

    fn walk(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let start = self.os_path(prefix)?;
        if !start.exists() {
            return Ok(Vec::new());
        }
        let mut infos = Vec::new();
        for entry in WalkDir::new(&start).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| start.clone());
                Error::file_read(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| Error::internal("walked path outside of bucket root"))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            trace!("walked {}", relative);
            infos.push(self.info(relative));
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }
}

impl ReadWriteBucket for OsBucket {
    fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let os_path = self.os_path(path)?;
        if let Some(parent) = os_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::directory_create(parent, e))?;
        }
        fs::write(&os_path, &data).map_err(|e| Error::file_write(os_path, e))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let os_path = self.os_path(path)?;
        match fs::remove_file(&os_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_write(os_path, e)),
        }
    }
}
