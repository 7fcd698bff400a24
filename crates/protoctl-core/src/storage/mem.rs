use super::{ObjectInfo, ReadBucket, ReadWriteBucket};
use crate::error::{Error, Result};
use crate::normalpath;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// An in-memory bucket
#[derive(Debug, Default)]
pub struct MemBucket {
    files: RwLock<BTreeMap<String, Bytes>>,
}

impl MemBucket {
    /// Creates an empty bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bucket from `(path, content)` pairs
    pub fn from_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: Into<Bytes>,
    {
        let files = files
            .into_iter()
            .map(|(path, content)| (normalpath::normalize(path.as_ref()), content.into()))
            .collect();
        Self {
            files: RwLock::new(files),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Bytes>>> {
        self.files
            .read()
            .map_err(|_| Error::internal("memory bucket lock poisoned"))
    }
}

impl ReadBucket for MemBucket {
    fn stat(&self, path: &str) -> Result<Option<ObjectInfo>> {
        let path = normalpath::normalize(path);
        Ok(self
            .read()?
            .contains_key(&path)
            .then(|| ObjectInfo::new(path)))
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        let path = normalpath::normalize(path);
        self.read()?
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::object_not_found(path))
    }

    fn walk(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let prefix = normalpath::normalize(prefix);
        Ok(self
            .read()?
            .keys()
            .filter(|path| normalpath::is_equal_or_contains(&prefix, path))
            .map(|path| ObjectInfo::new(path.clone()))
            .collect())
    }
}

impl ReadWriteBucket for MemBucket {
    fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let path = normalpath::normalize_and_validate(path)?;
        self.files
            .write()
            .map_err(|_| Error::internal("memory bucket lock poisoned"))?
            .insert(path, data);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let path = normalpath::normalize(path);
        self.files
            .write()
            .map_err(|_| Error::internal("memory bucket lock poisoned"))?
            .remove(&path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_walk() {
        let bucket = MemBucket::new();
        bucket.put("b/x.proto", Bytes::from_static(b"x")).unwrap();
        bucket.put("./a.proto", Bytes::from_static(b"a")).unwrap();
        let paths: Vec<_> = bucket.walk(".").unwrap().into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["a.proto", "b/x.proto"]);
        assert_eq!(&bucket.get("a.proto").unwrap()[..], b"a");
        bucket.delete("a.proto").unwrap();
        assert!(matches!(
            bucket.get("a.proto"),
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_put_rejects_escaping_path() {
        let bucket = MemBucket::new();
        assert!(bucket.put("../x.proto", Bytes::new()).is_err());
    }
}
