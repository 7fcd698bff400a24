use super::{WorkspaceDepManager, WorkspaceDepManagerProvider};
use crate::config::{self, BufLockFile, BufYamlFile, FileVersion};
use crate::context::Context;
use crate::error::Result;
use crate::module::{ModuleKey, ModuleRef};
use crate::storage::ReadWriteBucket;
use std::sync::Arc;
use tracing::{debug, info};

/// Manages the `buf.yaml` and `buf.lock` at the root of a directory.
///
/// The whole directory is managed; there is no path targeting.
#[derive(Debug)]
pub struct BucketWorkspaceDepManager {
    bucket: Arc<dyn ReadWriteBucket>,
    buf_yaml: BufYamlFile,
}

impl BucketWorkspaceDepManager {
    /// Reads the configuration at the root of `bucket`. A missing `buf.yaml`
    /// reads as an empty v1 configuration.
    pub fn new(bucket: Arc<dyn ReadWriteBucket>) -> Result<Self> {
        let buf_yaml = config::get_buf_yaml_file_for_prefix(bucket.as_ref(), ".")?
            .unwrap_or_else(BufYamlFile::default_v1);
        Ok(Self { bucket, buf_yaml })
    }
}

impl WorkspaceDepManager for BucketWorkspaceDepManager {
    fn file_version(&self) -> FileVersion {
        self.buf_yaml.file_version()
    }

    fn config_dep_module_refs(&self, ctx: &Context) -> Result<Vec<ModuleRef>> {
        ctx.check()?;
        Ok(self.buf_yaml.config_deps().to_vec())
    }

    fn existing_dep_module_keys(&self, ctx: &Context) -> Result<Vec<ModuleKey>> {
        ctx.check()?;
        Ok(config::get_buf_lock_file_for_prefix(self.bucket.as_ref(), ".")?
            .map(|lock| lock.dep_keys().to_vec())
            .unwrap_or_default())
    }

    fn update_lock(&self, ctx: &Context, dep_keys: Vec<ModuleKey>) -> Result<()> {
        ctx.check()?;
        // v1beta1 has no lock file shape of its own
        let file_version = match self.file_version() {
            FileVersion::V1Beta1 => FileVersion::V1,
            other => other,
        };
        let lock = BufLockFile::new(file_version, dep_keys);
        info!("writing {} with {} dependencies", config::BUF_LOCK, lock.dep_keys().len());
        config::put_buf_lock_file(self.bucket.as_ref(), ".", &lock)
    }
}

/// Creates [`BucketWorkspaceDepManager`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketWorkspaceDepManagerProvider;

impl BucketWorkspaceDepManagerProvider {
    /// Creates a provider
    pub fn new() -> Self {
        Self
    }
}

impl WorkspaceDepManagerProvider for BucketWorkspaceDepManagerProvider {
    fn get_workspace_dep_manager(
        &self,
        ctx: &Context,
        bucket: Arc<dyn ReadWriteBucket>,
    ) -> Result<Box<dyn WorkspaceDepManager>> {
        ctx.check()?;
        let manager = BucketWorkspaceDepManager::new(bucket)?;
        debug!("dependency manager for {} configuration", manager.file_version());
        Ok(Box::new(manager))
    }
}
