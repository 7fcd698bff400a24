//! Resolution of remote modules.
//!
//! A [`ModuleKeyProvider`] pins a [`ModuleRef`] to a commit; a
//! [`ModuleDataProvider`] hands out the files and direct dependencies of a
//! pinned module. Registry clients implement these traits; this module ships a
//! directory-backed registry and an in-memory one.

use super::{bucket_digest, ModuleFullName, ModuleKey, ModuleRef};
use crate::config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::storage::{MemBucket, OsBucket, ReadBucket};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Resolves module references to pinned keys
pub trait ModuleKeyProvider: Send + Sync {
    /// Pins a reference to a commit
    fn get_module_key(&self, ctx: &Context, module_ref: &ModuleRef) -> Result<ModuleKey>;
}

/// The content of a pinned module
#[derive(Debug, Clone)]
pub struct ModuleData {
    /// The key this data belongs to
    pub key: ModuleKey,
    /// The module files, rooted at the module root
    pub bucket: Arc<dyn ReadBucket>,
    /// Keys of the direct dependencies
    pub dep_keys: Vec<ModuleKey>,
}

/// Provides the content of pinned modules
pub trait ModuleDataProvider: Send + Sync {
    /// Fetches a module's files and dependency keys
    fn get_module_data(&self, ctx: &Context, key: &ModuleKey) -> Result<ModuleData>;
}

fn commit_from_digest(digest: &str) -> String {
    digest.trim_start_matches("b3:").chars().take(32).collect()
}

fn check_reference(module_ref: &ModuleRef, commit_id: &str) -> Result<()> {
    match module_ref.reference() {
        None | Some("main") => Ok(()),
        Some(reference) if reference == commit_id => Ok(()),
        Some(_) => Err(Error::ModuleNotFound(module_ref.to_string())),
    }
}

/// A registry laid out on disk as `<root>/<registry>/<owner>/<name>/`.
///
/// Each module has exactly one version whose commit is derived from the
/// content digest. Dependencies are read from the module's `buf.yaml`.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    /// Creates a registry rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn module_dir(&self, full_name: &ModuleFullName) -> PathBuf {
        self.root
            .join(full_name.registry())
            .join(full_name.owner())
            .join(full_name.name())
    }

    fn bucket(&self, full_name: &ModuleFullName) -> Result<OsBucket> {
        let dir = self.module_dir(full_name);
        if !dir.is_dir() {
            return Err(Error::ModuleNotFound(full_name.to_string()));
        }
        Ok(OsBucket::new(dir))
    }

    fn key(&self, ctx: &Context, full_name: &ModuleFullName) -> Result<ModuleKey> {
        let bucket = self.bucket(full_name)?;
        let digest = bucket_digest(ctx, &bucket)?;
        Ok(ModuleKey::new(full_name.clone(), commit_from_digest(&digest)).with_digest(digest))
    }
}

impl ModuleKeyProvider for LocalRegistry {
    fn get_module_key(&self, ctx: &Context, module_ref: &ModuleRef) -> Result<ModuleKey> {
        let key = self.key(ctx, module_ref.full_name())?;
        check_reference(module_ref, key.commit_id())?;
        debug!("resolved {} to {}", module_ref, key);
        Ok(key)
    }
}

impl ModuleDataProvider for LocalRegistry {
    fn get_module_data(&self, ctx: &Context, key: &ModuleKey) -> Result<ModuleData> {
        let current = self.key(ctx, key.full_name())?;
        if current.commit_id() != key.commit_id() {
            return Err(Error::ModuleNotFound(key.to_string()));
        }
        let bucket: Arc<dyn ReadBucket> = Arc::new(self.bucket(key.full_name())?);
        let mut dep_keys = Vec::new();
        if let Some(buf_yaml) = config::get_buf_yaml_file_for_prefix(bucket.as_ref(), ".")? {
            for dep in buf_yaml.config_deps() {
                dep_keys.push(self.get_module_key(ctx, dep)?);
            }
        }
        Ok(ModuleData {
            key: current,
            bucket,
            dep_keys,
        })
    }
}

/// An in-memory registry, one version per module
#[derive(Debug, Default, Clone)]
pub struct MemModuleProvider {
    modules: BTreeMap<ModuleFullName, (Arc<MemBucket>, Vec<ModuleFullName>)>,
}

impl MemModuleProvider {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module with its files and direct dependencies
    pub fn with_module(
        mut self,
        full_name: ModuleFullName,
        bucket: MemBucket,
        deps: Vec<ModuleFullName>,
    ) -> Self {
        self.modules.insert(full_name, (Arc::new(bucket), deps));
        self
    }

    fn key(&self, ctx: &Context, full_name: &ModuleFullName) -> Result<ModuleKey> {
        let (bucket, _) = self
            .modules
            .get(full_name)
            .ok_or_else(|| Error::ModuleNotFound(full_name.to_string()))?;
        let digest = bucket_digest(ctx, &**bucket)?;
        Ok(ModuleKey::new(full_name.clone(), commit_from_digest(&digest)).with_digest(digest))
    }
}

impl ModuleKeyProvider for MemModuleProvider {
    fn get_module_key(&self, ctx: &Context, module_ref: &ModuleRef) -> Result<ModuleKey> {
        let key = self.key(ctx, module_ref.full_name())?;
        check_reference(module_ref, key.commit_id())?;
        Ok(key)
    }
}

impl ModuleDataProvider for MemModuleProvider {
    fn get_module_data(&self, ctx: &Context, key: &ModuleKey) -> Result<ModuleData> {
        let (bucket, deps) = self
            .modules
            .get(key.full_name())
            .ok_or_else(|| Error::ModuleNotFound(key.to_string()))?;
        let dep_keys = deps
            .iter()
            .map(|dep| self.key(ctx, dep))
            .collect::<Result<Vec<_>>>()?;
        let bucket: Arc<dyn ReadBucket> = Arc::clone(bucket) as Arc<dyn ReadBucket>;
        Ok(ModuleData {
            key: self.key(ctx, key.full_name())?,
            bucket,
            dep_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mem_provider_resolves_deps() {
        let ctx = Context::background();
        let a: ModuleFullName = "buf.test/acme/a".parse().unwrap();
        let b: ModuleFullName = "buf.test/acme/b".parse().unwrap();
        let provider = MemModuleProvider::new()
            .with_module(a.clone(), MemBucket::from_files([("a.proto", "a")]), vec![b.clone()])
            .with_module(b.clone(), MemBucket::from_files([("b.proto", "b")]), vec![]);

        let key = provider
            .get_module_key(&ctx, &ModuleRef::new(a.clone(), None))
            .unwrap();
        assert_eq!(key.commit_id().len(), 32);
        let data = provider.get_module_data(&ctx, &key).unwrap();
        assert_eq!(data.dep_keys.len(), 1);
        assert_eq!(data.dep_keys[0].full_name(), &b);

        let pinned_wrong = ModuleRef::new(a, Some("deadbeef".to_string()));
        assert!(provider.get_module_key(&ctx, &pinned_wrong).is_err());
    }

    #[test]
    fn test_local_registry_layout() {
        let ctx = Context::background();
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("buf.test/acme/weather");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("weather.proto"), "syntax = \"proto3\";").unwrap();

        let registry = LocalRegistry::new(temp_dir.path());
        let module_ref: ModuleRef = "buf.test/acme/weather".parse().unwrap();
        let key = registry.get_module_key(&ctx, &module_ref).unwrap();
        let data = registry.get_module_data(&ctx, &key).unwrap();
        assert!(data.bucket.exists("weather.proto").unwrap());
        assert!(data.dep_keys.is_empty());

        let missing: ModuleRef = "buf.test/acme/missing".parse().unwrap();
        assert!(matches!(
            registry.get_module_key(&ctx, &missing),
            Err(Error::ModuleNotFound(_))
        ));
    }
}
