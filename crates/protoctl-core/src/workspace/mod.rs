//! Workspaces: the set of modules an input resolves to.
//!
//! A [`Workspace`] holds its modules in a stable order together with the
//! lint, breaking, plugin and policy configuration of every local module,
//! keyed by module opaque ID. Remote dependencies are modules too; they are
//! never local and never build targets.

mod bucket;
mod dep;

use crate::bufio::BucketTargeting;
use crate::config::{
    BreakingConfig, ConfigOverride, FileVersion, LintConfig, PluginConfig, PolicyConfig,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::module::{Module, ModuleFullName, ModuleKey, ModuleReadBucket};
use crate::storage::{ReadBucket, ReadWriteBucket};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub use bucket::BucketWorkspaceProvider;
pub use dep::{BucketWorkspaceDepManager, BucketWorkspaceDepManagerProvider};

/// Configuration attached to one module of a workspace
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSettings {
    /// Lint configuration
    pub lint: LintConfig,
    /// Breaking configuration
    pub breaking: BreakingConfig,
    /// Check plugins
    pub plugins: Vec<PluginConfig>,
    /// Policies
    pub policies: Vec<PolicyConfig>,
}

impl ModuleSettings {
    /// Defaults for a configuration file version
    pub fn default_for_version(file_version: FileVersion) -> Self {
        Self {
            lint: LintConfig::default_for_version(file_version),
            breaking: BreakingConfig::default_for_version(file_version),
            plugins: Vec::new(),
            policies: Vec::new(),
        }
    }
}

/// An ordered set of modules with their configuration
#[derive(Debug, Clone)]
pub struct Workspace {
    file_version: FileVersion,
    modules: Vec<Module>,
    settings: HashMap<String, ModuleSettings>,
    configured_dep_full_names: BTreeSet<ModuleFullName>,
}

impl Workspace {
    /// Creates a workspace. Opaque IDs must be unique.
    pub fn new(file_version: FileVersion, modules: Vec<Module>) -> Result<Self> {
        let mut seen = HashSet::new();
        for module in &modules {
            if !seen.insert(module.opaque_id()) {
                return Err(Error::internal(format!(
                    "duplicate module opaque id '{}'",
                    module.opaque_id()
                )));
            }
        }
        Ok(Self {
            file_version,
            modules,
            settings: HashMap::new(),
            configured_dep_full_names: BTreeSet::new(),
        })
    }

    /// Attaches configuration to a module
    pub fn with_module_settings(mut self, opaque_id: impl Into<String>, settings: ModuleSettings) -> Self {
        self.settings.insert(opaque_id.into(), settings);
        self
    }

    /// Sets the dependencies declared in configuration
    pub fn with_configured_dep_full_names(
        mut self,
        full_names: impl IntoIterator<Item = ModuleFullName>,
    ) -> Self {
        self.configured_dep_full_names = full_names.into_iter().collect();
        self
    }

    /// The version of the configuration the workspace was read from
    pub fn file_version(&self) -> FileVersion {
        self.file_version
    }

    /// Every module, in workspace order
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Modules sourced from the input bucket
    pub fn local_modules(&self) -> Vec<&Module> {
        self.modules.iter().filter(|module| module.is_local()).collect()
    }

    /// Modules that are build targets
    pub fn target_modules(&self) -> Vec<&Module> {
        self.modules.iter().filter(|module| module.is_target()).collect()
    }

    /// Looks up a module by opaque ID
    pub fn module(&self, opaque_id: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.opaque_id() == opaque_id)
    }

    /// Dependencies declared in configuration
    pub fn configured_dep_full_names(&self) -> &BTreeSet<ModuleFullName> {
        &self.configured_dep_full_names
    }

    fn settings(&self, opaque_id: &str) -> ModuleSettings {
        self.settings
            .get(opaque_id)
            .cloned()
            .unwrap_or_else(|| ModuleSettings::default_for_version(self.file_version))
    }

    /// The lint configuration of a module
    pub fn lint_config(&self, opaque_id: &str) -> LintConfig {
        self.settings(opaque_id).lint
    }

    /// The breaking configuration of a module
    pub fn breaking_config(&self, opaque_id: &str) -> BreakingConfig {
        self.settings(opaque_id).breaking
    }

    /// The check plugins of a module
    pub fn plugin_configs(&self, opaque_id: &str) -> Vec<PluginConfig> {
        self.settings(opaque_id).plugins
    }

    /// The policies of a module
    pub fn policy_configs(&self, opaque_id: &str) -> Vec<PolicyConfig> {
        self.settings(opaque_id).policies
    }

    /// Every setting of a module at once
    pub fn module_settings(&self, opaque_id: &str) -> ModuleSettings {
        self.settings(opaque_id)
    }

    /// Retargets the workspace: only the named modules stay build targets,
    /// every other module becomes a dependency provider.
    ///
    /// Path targeting of the chosen modules is kept.
    pub fn with_target_opaque_ids(&self, opaque_ids: &[&str]) -> Result<Self> {
        for opaque_id in opaque_ids {
            if self.module(opaque_id).is_none() {
                return Err(Error::ModuleNotFound(opaque_id.to_string()));
            }
        }
        let modules = self
            .modules
            .iter()
            .map(|module| {
                let is_target = module.is_target() && opaque_ids.contains(&module.opaque_id());
                module.clone().with_target(is_target)
            })
            .collect();
        Ok(Self {
            file_version: self.file_version,
            modules,
            settings: self.settings.clone(),
            configured_dep_full_names: self.configured_dep_full_names.clone(),
        })
    }

    /// The proto-only union of every module
    pub fn module_read_bucket(&self, ctx: &Context) -> Result<ModuleReadBucket> {
        ModuleReadBucket::new(ctx, self.modules.clone())
    }
}

/// Builds workspaces from buckets and module keys
pub trait WorkspaceProvider: Send + Sync {
    /// Builds the workspace found in a bucket. Targeting paths are relative
    /// to the bucket root.
    fn get_workspace_for_bucket(
        &self,
        ctx: &Context,
        bucket: Arc<dyn ReadBucket>,
        targeting: &BucketTargeting,
        config_override: Option<&ConfigOverride>,
    ) -> Result<Workspace>;

    /// Builds a workspace whose only target is a pinned remote module.
    /// Target paths are module-relative.
    fn get_workspace_for_module_key(
        &self,
        ctx: &Context,
        key: &ModuleKey,
        target_paths: &[String],
        target_exclude_paths: &[String],
        config_override: Option<&ConfigOverride>,
    ) -> Result<Workspace>;
}

/// Reads and rewrites the dependency declarations of a workspace directory
pub trait WorkspaceDepManager: Send + Sync {
    /// Version of the configuration
    fn file_version(&self) -> FileVersion;

    /// Dependencies declared in configuration
    fn config_dep_module_refs(&self, ctx: &Context) -> Result<Vec<crate::module::ModuleRef>>;

    /// Dependencies pinned in the lock file
    fn existing_dep_module_keys(&self, ctx: &Context) -> Result<Vec<ModuleKey>>;

    /// Replaces the lock file's pins
    fn update_lock(&self, ctx: &Context, dep_keys: Vec<ModuleKey>) -> Result<()>;
}

/// Creates [`WorkspaceDepManager`]s for directories
pub trait WorkspaceDepManagerProvider: Send + Sync {
    /// Opens the workspace rooted at `bucket`
    fn get_workspace_dep_manager(
        &self,
        ctx: &Context,
        bucket: Arc<dyn ReadWriteBucket>,
    ) -> Result<Box<dyn WorkspaceDepManager>>;
}
