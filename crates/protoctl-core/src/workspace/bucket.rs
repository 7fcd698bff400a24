use super::{ModuleSettings, Workspace, WorkspaceProvider};
use crate::bufio::{BucketTargeting, ProtoFileTarget};
use crate::config::{
    self, BufLockFile, BufYamlFile, ConfigOverride, FileVersion, ModuleConfig,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::module::{Module, ModuleDataProvider, ModuleFullName, ModuleKey};
use crate::normalpath;
use crate::storage::{self, ReadBucket, SubBucket};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// A [`WorkspaceProvider`] reading configuration from the bucket.
///
/// The layout is discovered at the bucket root: a `buf.work.yaml` lists v1
/// module directories, each with an optional `buf.yaml`; a v2 `buf.yaml`
/// declares every module itself; otherwise the root is a single v1 module.
/// Remote dependencies pinned in `buf.lock` are fetched through the
/// [`ModuleDataProvider`], if one is configured.
#[derive(Clone, Default)]
pub struct BucketWorkspaceProvider {
    module_data_provider: Option<Arc<dyn ModuleDataProvider>>,
}

impl std::fmt::Debug for BucketWorkspaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketWorkspaceProvider")
            .field("has_registry", &self.module_data_provider.is_some())
            .finish()
    }
}

/// One `buf.yaml` of the workspace and where it lives
struct ConfigSource {
    dir_path: String,
    file: BufYamlFile,
    lock: Option<BufLockFile>,
}

/// A module declaration resolved against the workspace root
struct LocalModuleLayout {
    dir_path: String,
    config: ModuleConfig,
    settings: ModuleSettings,
}

impl BucketWorkspaceProvider {
    /// A provider without a registry; `buf.lock` pins are not fetched
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches remote dependencies through `provider`
    pub fn with_module_data_provider(mut self, provider: Arc<dyn ModuleDataProvider>) -> Self {
        self.module_data_provider = Some(provider);
        self
    }

    fn read_config_sources(
        &self,
        bucket: &dyn ReadBucket,
        subdir_path: &str,
        config_override: Option<&ConfigOverride>,
    ) -> Result<(FileVersion, Vec<ConfigSource>)> {
        if let Some(work) = config::get_buf_work_yaml_file_for_prefix(bucket, ".")? {
            debug!("buf.work.yaml lists {} directories", work.directories.len());
            let mut sources = Vec::with_capacity(work.directories.len());
            for dir_path in work.directories {
                let overridden = config_override
                    .filter(|_| normalpath::is_equal_or_contains(&dir_path, subdir_path));
                let file = config::get_buf_yaml_file_for_prefix_or_override(bucket, &dir_path, overridden)?
                    .unwrap_or_else(BufYamlFile::default_v1);
                if file.file_version() == FileVersion::V2 {
                    return Err(Error::config(
                        normalpath::join(&dir_path, config::BUF_YAML),
                        "a v2 buf.yaml cannot be part of a buf.work.yaml workspace",
                    ));
                }
                let lock = config::get_buf_lock_file_for_prefix(bucket, &dir_path)?;
                sources.push(ConfigSource { dir_path, file, lock });
            }
            return Ok((FileVersion::V1, sources));
        }
        let file = config::get_buf_yaml_file_for_prefix_or_override(bucket, ".", config_override)?
            .unwrap_or_else(BufYamlFile::default_v1);
        let lock = config::get_buf_lock_file_for_prefix(bucket, ".")?;
        Ok((
            file.file_version(),
            vec![ConfigSource {
                dir_path: ".".to_string(),
                file,
                lock,
            }],
        ))
    }

    /// Fetches pinned modules and their transitive dependencies, skipping
    /// names already provided by local modules
    fn remote_modules(
        &self,
        ctx: &Context,
        roots: Vec<ModuleKey>,
        skip: &HashSet<ModuleFullName>,
    ) -> Result<Vec<Module>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        let Some(provider) = &self.module_data_provider else {
            warn!(
                "{} pinned dependencies cannot be fetched without a registry",
                roots.len()
            );
            return Ok(Vec::new());
        };
        let mut seen: HashSet<ModuleFullName> = skip.clone();
        let mut queue: VecDeque<ModuleKey> = roots.into_iter().collect();
        let mut modules = Vec::new();
        while let Some(key) = queue.pop_front() {
            ctx.check()?;
            if !seen.insert(key.full_name().clone()) {
                continue;
            }
            let data = provider.get_module_data(ctx, &key)?;
            debug!("fetched dependency {}", data.key);
            queue.extend(data.dep_keys);
            modules.push(
                Module::new(data.key.full_name().to_string(), data.bucket)
                    .with_full_name(Some(data.key.full_name().clone()))
                    .with_commit_id(Some(data.key.commit_id().to_string()))
                    .with_local(false)
                    .with_target(false),
            );
        }
        Ok(modules)
    }
}

fn local_module_layouts(sources: &[ConfigSource]) -> Vec<LocalModuleLayout> {
    let mut layouts = Vec::new();
    for source in sources {
        for module_config in source.file.module_configs() {
            layouts.push(LocalModuleLayout {
                dir_path: normalpath::join(&source.dir_path, &module_config.dir_path),
                config: module_config.clone(),
                settings: ModuleSettings {
                    lint: module_config.lint.clone(),
                    breaking: module_config.breaking.clone(),
                    plugins: source.file.plugin_configs().to_vec(),
                    policies: source.file.policy_configs().to_vec(),
                },
            });
        }
    }
    layouts
}

fn opaque_id(layout: &LocalModuleLayout) -> String {
    match &layout.config.full_name {
        Some(full_name) => full_name.to_string(),
        None => layout.dir_path.clone(),
    }
}

/// Maps a root-relative path onto a module directory. A path containing the
/// whole module maps to `.`.
fn module_relative(dir_path: &str, path: &str) -> Option<String> {
    if let Some(relative) = normalpath::strip_dir(dir_path, path) {
        return Some(relative.to_string());
    }
    normalpath::is_equal_or_contains(path, dir_path).then(|| ".".to_string())
}

/// Reads the `package` statement of a `.proto` file
fn declared_package(source: &[u8]) -> Option<String> {
    String::from_utf8_lossy(source).lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("package")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.trim().trim_end_matches(';').trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Module-relative paths targeted by a `.proto` file input
fn proto_file_target_paths(module: &Module, path: &str, include_package_files: bool) -> Result<Vec<String>> {
    if !include_package_files {
        return Ok(vec![path.to_string()]);
    }
    let Some(package) = declared_package(&module.get_file(path)?) else {
        return Ok(vec![path.to_string()]);
    };
    let dir = normalpath::dir(path);
    let mut paths = Vec::new();
    for info in storage::proto_files(module.bucket().walk(&dir)?) {
        if normalpath::dir(&info.path) != dir {
            continue;
        }
        if declared_package(&module.get_file(&info.path)?).as_deref() == Some(package.as_str()) {
            paths.push(info.path);
        }
    }
    debug!("package {} of {} spans {} files", package, path, paths.len());
    Ok(paths)
}

impl WorkspaceProvider for BucketWorkspaceProvider {
    fn get_workspace_for_bucket(
        &self,
        ctx: &Context,
        bucket: Arc<dyn ReadBucket>,
        targeting: &BucketTargeting,
        config_override: Option<&ConfigOverride>,
    ) -> Result<Workspace> {
        ctx.check()?;
        let (file_version, sources) =
            self.read_config_sources(bucket.as_ref(), &targeting.subdir_path, config_override)?;
        let layouts = local_module_layouts(&sources);
        let subdir = &targeting.subdir_path;

        let proto_file_module = match &targeting.proto_file {
            Some(ProtoFileTarget { path, .. }) => Some(
                layouts
                    .iter()
                    .position(|layout| normalpath::strip_dir(&layout.dir_path, path).is_some())
                    .ok_or_else(|| Error::object_not_found(path.clone()))?,
            ),
            None => None,
        };

        let mut matched_paths: HashSet<&str> = HashSet::new();
        let mut modules = Vec::with_capacity(layouts.len());
        for (idx, layout) in layouts.iter().enumerate() {
            let in_subdir = normalpath::is_equal_or_contains(&layout.dir_path, subdir)
                || normalpath::is_equal_or_contains(subdir, &layout.dir_path);
            let mut module = Module::new(opaque_id(layout), Arc::new(SubBucket::new(Arc::clone(&bucket), &layout.dir_path)))
                .with_full_name(layout.config.full_name.clone())
                .with_dir_path(layout.dir_path.clone())
                .with_excludes(layout.config.excludes.clone())
                .with_local(true);

            if let Some(proto_file) = &targeting.proto_file {
                if proto_file_module != Some(idx) {
                    modules.push(module.with_target(false));
                    continue;
                }
                let path = normalpath::strip_dir(&layout.dir_path, &proto_file.path)
                    .ok_or_else(|| Error::object_not_found(proto_file.path.clone()))?
                    .to_string();
                let paths = proto_file_target_paths(&module, &path, proto_file.include_package_files)?;
                modules.push(module.with_target(true).with_target_paths(paths, Vec::new()));
                continue;
            }

            if !in_subdir {
                modules.push(module.with_target(false));
                continue;
            }
            let mut include = Vec::new();
            for path in &targeting.target_paths {
                if let Some(relative) = module_relative(&layout.dir_path, path) {
                    if !module.bucket().walk(&relative)?.is_empty() {
                        matched_paths.insert(path.as_str());
                    }
                    include.push(relative);
                }
            }
            let exclude: Vec<String> = targeting
                .target_exclude_paths
                .iter()
                .filter_map(|path| module_relative(&layout.dir_path, path))
                .collect();
            if !targeting.target_paths.is_empty() && include.is_empty() {
                // none of the target paths fall within this module
                module = module.with_target(false);
            } else {
                module = module.with_target(true).with_target_paths(include, exclude);
            }
            modules.push(module);
        }

        if !layouts.iter().any(|layout| {
            normalpath::is_equal_or_contains(&layout.dir_path, subdir)
                || normalpath::is_equal_or_contains(subdir, &layout.dir_path)
        }) {
            return Err(Error::malformed_input(
                subdir.clone(),
                "directory is not contained in any module of the workspace",
            ));
        }
        let unmatched: Vec<String> = targeting
            .target_paths
            .iter()
            .filter(|path| !matched_paths.contains(path.as_str()))
            .cloned()
            .collect();
        if targeting.proto_file.is_none() && !unmatched.is_empty() {
            return Err(Error::PathsNotFound(unmatched));
        }

        let local_names: HashSet<ModuleFullName> = modules
            .iter()
            .filter_map(|module| module.full_name().cloned())
            .collect();
        let configured: BTreeSet<ModuleFullName> = sources
            .iter()
            .flat_map(|source| source.file.config_deps())
            .map(|module_ref| module_ref.full_name().clone())
            .collect();
        let mut pinned: Vec<ModuleKey> = Vec::new();
        for source in &sources {
            match &source.lock {
                Some(lock) => pinned.extend(lock.dep_keys().iter().cloned()),
                None if !source.file.config_deps().is_empty() => warn!(
                    "{} declares dependencies but has no {}, run dependency update",
                    normalpath::join(&source.dir_path, config::BUF_YAML),
                    config::BUF_LOCK
                ),
                None => {}
            }
        }
        modules.extend(self.remote_modules(ctx, pinned, &local_names)?);

        let mut workspace = Workspace::new(file_version, modules)?.with_configured_dep_full_names(configured);
        for layout in layouts {
            workspace = workspace.with_module_settings(opaque_id(&layout), layout.settings);
        }
        debug!(
            "workspace has {} modules, {} targets",
            workspace.modules().len(),
            workspace.target_modules().len()
        );
        Ok(workspace)
    }

    fn get_workspace_for_module_key(
        &self,
        ctx: &Context,
        key: &ModuleKey,
        target_paths: &[String],
        target_exclude_paths: &[String],
        config_override: Option<&ConfigOverride>,
    ) -> Result<Workspace> {
        ctx.check()?;
        let provider = self
            .module_data_provider
            .as_ref()
            .ok_or_else(|| Error::Unsupported(format!("module {}: no registry configured", key)))?;
        let data = provider.get_module_data(ctx, key)?;
        let file = config::get_buf_yaml_file_for_prefix_or_override(data.bucket.as_ref(), ".", config_override)?
            .unwrap_or_else(BufYamlFile::default_v1);
        let settings = match file.module_configs().first() {
            Some(module_config) => ModuleSettings {
                lint: module_config.lint.clone(),
                breaking: module_config.breaking.clone(),
                plugins: file.plugin_configs().to_vec(),
                policies: file.policy_configs().to_vec(),
            },
            None => ModuleSettings::default_for_version(file.file_version()),
        };
        let opaque_id = key.full_name().to_string();
        let target = Module::new(opaque_id.clone(), Arc::clone(&data.bucket))
            .with_full_name(Some(key.full_name().clone()))
            .with_commit_id(Some(data.key.commit_id().to_string()))
            .with_local(false)
            .with_target(true)
            .with_target_paths(target_paths.to_vec(), target_exclude_paths.to_vec());

        let skip: HashSet<ModuleFullName> = [key.full_name().clone()].into_iter().collect();
        let mut modules = vec![target];
        modules.extend(self.remote_modules(ctx, data.dep_keys, &skip)?);
        Ok(Workspace::new(file.file_version(), modules)?
            .with_configured_dep_full_names(file.config_deps().iter().map(|dep| dep.full_name().clone()))
            .with_module_settings(opaque_id, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{MemModuleProvider, ModuleKeyProvider, ModuleRef};
    use crate::storage::MemBucket;
    use pretty_assertions::assert_eq;

    fn bucket(files: &[(&'static str, &'static str)]) -> Arc<dyn ReadBucket> {
        Arc::new(MemBucket::from_files(files.iter().copied()))
    }

    fn targets(ctx: &Context, workspace: &Workspace) -> Vec<String> {
        workspace
            .module_read_bucket(ctx)
            .unwrap()
            .target_file_infos()
            .into_iter()
            .map(|info| info.path.clone())
            .collect()
    }

    const V2_YAML: &str = "version: v2\nmodules:\n  - path: proto\n    name: buf.test/acme/a\n  - path: vendor\ndeps:\n  - buf.test/acme/dep\nlint:\n  use: [MINIMAL]\n";

    #[test]
    fn test_v2_modules_and_settings() {
        let ctx = Context::background();
        let workspace = BucketWorkspaceProvider::new()
            .get_workspace_for_bucket(
                &ctx,
                bucket(&[
                    ("buf.yaml", V2_YAML),
                    ("proto/acme/a.proto", "syntax = \"proto3\";"),
                    ("vendor/v.proto", "syntax = \"proto3\";"),
                ]),
                &BucketTargeting::default(),
                None,
            )
            .unwrap();
        let ids: Vec<&str> = workspace.modules().iter().map(Module::opaque_id).collect();
        assert_eq!(ids, vec!["buf.test/acme/a", "vendor"]);
        assert_eq!(workspace.file_version(), FileVersion::V2);
        assert_eq!(workspace.lint_config("buf.test/acme/a").use_ids, vec!["MINIMAL".to_string()]);
        assert!(workspace
            .configured_dep_full_names()
            .contains(&"buf.test/acme/dep".parse().unwrap()));
        assert_eq!(targets(&ctx, &workspace), vec!["acme/a.proto", "v.proto"]);
    }

    #[test]
    fn test_subdir_selects_target_module() {
        let ctx = Context::background();
        let workspace = BucketWorkspaceProvider::new()
            .get_workspace_for_bucket(
                &ctx,
                bucket(&[
                    ("buf.work.yaml", "version: v1\ndirectories:\n  - a\n  - b\n"),
                    ("a/a.proto", "syntax = \"proto3\";"),
                    ("b/b.proto", "syntax = \"proto3\";"),
                ]),
                &BucketTargeting {
                    subdir_path: "b".to_string(),
                    ..BucketTargeting::default()
                },
                None,
            )
            .unwrap();
        let target_ids: Vec<&str> = workspace.target_modules().iter().map(|m| m.opaque_id()).collect();
        assert_eq!(target_ids, vec!["b"]);
        assert_eq!(workspace.file_version(), FileVersion::V1);
        assert_eq!(targets(&ctx, &workspace), vec!["b.proto"]);
    }

    #[test]
    fn test_target_paths_are_rerooted_per_module() {
        let ctx = Context::background();
        let files = bucket(&[
            ("buf.work.yaml", "version: v1\ndirectories:\n  - a\n  - b\n"),
            ("a/x/one.proto", ""),
            ("a/y/two.proto", ""),
            ("b/three.proto", ""),
        ]);
        let workspace = BucketWorkspaceProvider::new()
            .get_workspace_for_bucket(
                &ctx,
                files.clone(),
                &BucketTargeting {
                    target_paths: vec!["a/x".to_string()],
                    ..BucketTargeting::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(targets(&ctx, &workspace), vec!["x/one.proto"]);
        assert!(!workspace.module("b").unwrap().is_target());

        let missing = BucketWorkspaceProvider::new().get_workspace_for_bucket(
            &ctx,
            files.clone(),
            &BucketTargeting {
                target_paths: vec!["c".to_string()],
                ..BucketTargeting::default()
            },
            None,
        );
        assert!(matches!(missing, Err(Error::PathsNotFound(paths)) if paths == vec!["c".to_string()]));

        let missing_in_module = BucketWorkspaceProvider::new().get_workspace_for_bucket(
            &ctx,
            files,
            &BucketTargeting {
                target_paths: vec!["a/x/missing.proto".to_string()],
                ..BucketTargeting::default()
            },
            None,
        );
        assert!(matches!(missing_in_module, Err(Error::PathsNotFound(_))));
    }

    #[test]
    fn test_proto_file_with_package_siblings() {
        let ctx = Context::background();
        let files = bucket(&[
            ("acme/a.proto", "syntax = \"proto3\";\npackage acme.v1;\n"),
            ("acme/b.proto", "syntax = \"proto3\";\npackage acme.v1;\n"),
            ("acme/c.proto", "syntax = \"proto3\";\npackage acme.other;\n"),
        ]);
        let get = |include_package_files| {
            BucketWorkspaceProvider::new()
                .get_workspace_for_bucket(
                    &ctx,
                    files.clone(),
                    &BucketTargeting {
                        subdir_path: "acme".to_string(),
                        proto_file: Some(ProtoFileTarget {
                            path: "acme/a.proto".to_string(),
                            include_package_files,
                        }),
                        ..BucketTargeting::default()
                    },
                    None,
                )
                .unwrap()
        };
        assert_eq!(targets(&ctx, &get(false)), vec!["acme/a.proto"]);
        assert_eq!(targets(&ctx, &get(true)), vec!["acme/a.proto", "acme/b.proto"]);
    }

    #[test]
    fn test_config_override_replaces_buf_yaml() {
        let ctx = Context::background();
        let config_override = ConfigOverride::from_data("version: v1\nlint:\n  use: [BASIC]\n");
        let workspace = BucketWorkspaceProvider::new()
            .get_workspace_for_bucket(
                &ctx,
                bucket(&[("buf.yaml", "version: v1\nlint:\n  use: [MINIMAL]\n"), ("a.proto", "")]),
                &BucketTargeting::default(),
                Some(&config_override),
            )
            .unwrap();
        assert_eq!(workspace.lint_config(".").use_ids, vec!["BASIC".to_string()]);
    }

    #[test]
    fn test_lock_deps_become_remote_modules() {
        let ctx = Context::background();
        let dep: ModuleFullName = "buf.test/acme/dep".parse().unwrap();
        let base: ModuleFullName = "buf.test/acme/base".parse().unwrap();
        let provider = Arc::new(
            MemModuleProvider::new()
                .with_module(dep.clone(), MemBucket::from_files([("dep/d.proto", "")]), vec![base.clone()])
                .with_module(base.clone(), MemBucket::from_files([("base/b.proto", "")]), vec![]),
        );
        let dep_key = provider.get_module_key(&ctx, &ModuleRef::new(dep.clone(), None)).unwrap();
        let files = MemBucket::from_files([("buf.yaml", "version: v1\ndeps:\n  - buf.test/acme/dep\n"), ("a.proto", "")]);
        config::put_buf_lock_file(&files, ".", &BufLockFile::new(FileVersion::V1, vec![dep_key])).unwrap();
        let workspace = BucketWorkspaceProvider::new()
            .with_module_data_provider(provider)
            .get_workspace_for_bucket(&ctx, Arc::new(files), &BucketTargeting::default(), None)
            .unwrap();
        let ids: Vec<&str> = workspace.modules().iter().map(Module::opaque_id).collect();
        assert_eq!(ids, vec![".", "buf.test/acme/dep", "buf.test/acme/base"]);
        assert_eq!(workspace.local_modules().len(), 1);
        assert_eq!(workspace.target_modules().len(), 1);
    }

    #[test]
    fn test_workspace_for_module_key() {
        let ctx = Context::background();
        let name: ModuleFullName = "buf.test/acme/weather".parse().unwrap();
        let provider = Arc::new(MemModuleProvider::new().with_module(
            name.clone(),
            MemBucket::from_files([("weather/v1/w.proto", ""), ("weather/v2/w.proto", "")]),
            vec![],
        ));
        let key = provider.get_module_key(&ctx, &ModuleRef::new(name, None)).unwrap();
        let workspace = BucketWorkspaceProvider::new()
            .with_module_data_provider(provider)
            .get_workspace_for_module_key(&ctx, &key, &["weather/v2".to_string()], &[], None)
            .unwrap();
        assert!(workspace.local_modules().is_empty());
        assert_eq!(targets(&ctx, &workspace), vec!["weather/v2/w.proto"]);
    }

    #[test]
    fn test_declared_package() {
        assert_eq!(declared_package(b"syntax = \"proto3\";\npackage a.b;\n"), Some("a.b".to_string()));
        assert_eq!(declared_package(b"packaged = 1;\n"), None);
        assert_eq!(declared_package(b"message A {}"), None);
    }
}
