//! `buf.lock`: pinned dependency keys.

use super::{peek_file_version, FileVersion, BUF_LOCK};
use crate::error::{Error, Result};
use crate::module::{ModuleFullName, ModuleKey};
use crate::normalpath;
use crate::storage::{ReadBucket, ReadWriteBucket};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const HEADER: &str = "# Generated by protoctl. DO NOT EDIT.\n";

/// A parsed `buf.lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufLockFile {
    file_version: FileVersion,
    dep_keys: Vec<ModuleKey>,
}

impl BufLockFile {
    /// Creates a lock file; keys are sorted by full name
    pub fn new(file_version: FileVersion, mut dep_keys: Vec<ModuleKey>) -> Self {
        dep_keys.sort_by(|a, b| a.full_name().cmp(b.full_name()));
        Self {
            file_version,
            dep_keys,
        }
    }

    /// The file version
    pub fn file_version(&self) -> FileVersion {
        self.file_version
    }

    /// The pinned dependencies
    pub fn dep_keys(&self) -> &[ModuleKey] {
        &self.dep_keys
    }

    /// Parses a lock file
    pub fn parse(name: &str, data: &[u8]) -> Result<Self> {
        let file_version = peek_file_version(name, data)?;
        let dep_keys = match file_version {
            FileVersion::V1Beta1 | FileVersion::V1 => {
                let ext: LockV1 = serde_yaml::from_slice(data).map_err(|e| Error::config(name, e))?;
                ext.deps
                    .into_iter()
                    .map(|dep| {
                        let full_name = ModuleFullName::new(dep.remote, dep.owner, dep.repository)
                            .map_err(|e| Error::config(name, e))?;
                        Ok(with_digest(ModuleKey::new(full_name, dep.commit), dep.digest))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            FileVersion::V2 => {
                let ext: LockV2 = serde_yaml::from_slice(data).map_err(|e| Error::config(name, e))?;
                ext.deps
                    .into_iter()
                    .map(|dep| {
                        let full_name: ModuleFullName =
                            dep.name.parse().map_err(|e| Error::config(name, e))?;
                        Ok(with_digest(ModuleKey::new(full_name, dep.commit), dep.digest))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };
        Ok(Self::new(file_version, dep_keys))
    }

    /// Renders the lock file, header included
    pub fn to_yaml(&self) -> Result<String> {
        let body = match self.file_version {
            FileVersion::V1Beta1 | FileVersion::V1 => serde_yaml::to_string(&LockV1 {
                version: self.file_version.as_str().to_string(),
                deps: self
                    .dep_keys
                    .iter()
                    .map(|key| LockDepV1 {
                        remote: key.full_name().registry().to_string(),
                        owner: key.full_name().owner().to_string(),
                        repository: key.full_name().name().to_string(),
                        commit: key.commit_id().to_string(),
                        digest: key.digest().map(str::to_string),
                    })
                    .collect(),
            })?,
            FileVersion::V2 => serde_yaml::to_string(&LockV2 {
                version: self.file_version.as_str().to_string(),
                deps: self
                    .dep_keys
                    .iter()
                    .map(|key| LockDepV2 {
                        name: key.full_name().to_string(),
                        commit: key.commit_id().to_string(),
                        digest: key.digest().map(str::to_string),
                    })
                    .collect(),
            })?,
        };
        Ok(format!("{}{}", HEADER, body))
    }
}

fn with_digest(key: ModuleKey, digest: Option<String>) -> ModuleKey {
    match digest {
        Some(digest) => key.with_digest(digest),
        None => key,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockV1 {
    version: String,
    #[serde(default)]
    deps: Vec<LockDepV1>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockDepV1 {
    remote: String,
    owner: String,
    repository: String,
    commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockV2 {
    version: String,
    #[serde(default)]
    deps: Vec<LockDepV2>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockDepV2 {
    name: String,
    commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
}

/// Reads the `buf.lock` at `prefix`, if present
pub fn get_buf_lock_file_for_prefix(
    bucket: &dyn ReadBucket,
    prefix: &str,
) -> Result<Option<BufLockFile>> {
    let path = normalpath::join(prefix, BUF_LOCK);
    if !bucket.exists(&path)? {
        return Ok(None);
    }
    let data = bucket.get(&path)?;
    BufLockFile::parse(&path, &data).map(Some)
}

/// Writes a `buf.lock` at `prefix`
pub fn put_buf_lock_file(
    bucket: &dyn ReadWriteBucket,
    prefix: &str,
    lock_file: &BufLockFile,
) -> Result<()> {
    let path = normalpath::join(prefix, BUF_LOCK);
    bucket.put(&path, Bytes::from(lock_file.to_yaml()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemBucket;
    use pretty_assertions::assert_eq;

    fn key(name: &str, commit: &str) -> ModuleKey {
        ModuleKey::new(name.parse().unwrap(), commit).with_digest(format!("b3:{}", commit))
    }

    #[test]
    fn test_lock_file_v2_write_then_read() {
        let bucket = MemBucket::new();
        let lock_file = BufLockFile::new(
            FileVersion::V2,
            vec![key("buf.test/acme/zeta", "ffff"), key("buf.test/acme/alpha", "aaaa")],
        );
        put_buf_lock_file(&bucket, ".", &lock_file).unwrap();

        let raw = String::from_utf8(bucket.get("buf.lock").unwrap().to_vec()).unwrap();
        assert!(raw.starts_with(HEADER));
        assert!(raw.contains("name: buf.test/acme/alpha"));

        let read = get_buf_lock_file_for_prefix(&bucket, ".").unwrap().unwrap();
        assert_eq!(read, lock_file);
        assert_eq!(read.dep_keys()[0].full_name().name(), "alpha");
    }

    #[test]
    fn test_lock_file_v1_shape() {
        let lock_file = BufLockFile::parse(
            "buf.lock",
            br#"
version: v1
deps:
  - remote: buf.build
    owner: googleapis
    repository: googleapis
    commit: 28151c0d0a1641bf938a7672c500e01d
"#,
        )
        .unwrap();
        assert_eq!(lock_file.file_version(), FileVersion::V1);
        assert_eq!(
            lock_file.dep_keys()[0].to_string(),
            "buf.build/googleapis/googleapis:28151c0d0a1641bf938a7672c500e01d"
        );
        assert!(lock_file.dep_keys()[0].digest().is_none());
    }

    #[test]
    fn test_missing_lock_file() {
        let bucket = MemBucket::new();
        assert!(get_buf_lock_file_for_prefix(&bucket, "proto").unwrap().is_none());
    }
}
