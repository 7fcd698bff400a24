//! On-disk shapes of the configuration files.

use super::{
    BreakingConfig, BufYamlFile, FileVersion, LintConfig, ModuleConfig, PluginConfig,
    PolicyConfig,
};
use crate::error::{Error, Result};
use crate::module::{ModuleFullName, ModuleRef};
use crate::normalpath;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(super) struct VersionProbe {
    #[serde(default)]
    pub(super) version: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ExternalLint {
    #[serde(default, rename = "use")]
    use_ids: Option<Vec<String>>,
    #[serde(default)]
    except: Vec<String>,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default)]
    ignore_only: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    enum_zero_value_suffix: Option<String>,
    #[serde(default)]
    rpc_allow_same_request_response: bool,
    #[serde(default)]
    rpc_allow_google_protobuf_empty_requests: bool,
    #[serde(default)]
    rpc_allow_google_protobuf_empty_responses: bool,
    #[serde(default)]
    service_suffix: Option<String>,
    #[serde(default)]
    allow_comment_ignores: Option<bool>,
    #[serde(default)]
    disallow_comment_ignores: Option<bool>,
    #[serde(default)]
    disable_builtin: bool,
}

impl ExternalLint {
    fn resolve(
        self,
        name: &str,
        file_version: FileVersion,
        module_dir: &str,
    ) -> Result<LintConfig> {
        let defaults = LintConfig::default_for_version(file_version);
        let allow_comment_ignores = match (file_version, self.allow_comment_ignores, self.disallow_comment_ignores) {
            (FileVersion::V2, Some(_), _) => {
                return Err(Error::config(name, "allow_comment_ignores is not valid in v2, use disallow_comment_ignores"))
            }
            (FileVersion::V2, None, disallow) => !disallow.unwrap_or(false),
            (_, _, Some(_)) => {
                return Err(Error::config(name, "disallow_comment_ignores requires version v2"))
            }
            (_, allow, None) => allow.unwrap_or(defaults.allow_comment_ignores),
        };
        let (ignore_paths, ignore_id_or_category_to_paths) =
            resolve_ignores(name, file_version, module_dir, self.ignore, self.ignore_only)?;
        Ok(LintConfig {
            file_version,
            use_ids: self.use_ids.unwrap_or(defaults.use_ids),
            except_ids: self.except,
            ignore_paths,
            ignore_id_or_category_to_paths,
            enum_zero_value_suffix: self
                .enum_zero_value_suffix
                .unwrap_or(defaults.enum_zero_value_suffix),
            rpc_allow_same_request_response: self.rpc_allow_same_request_response,
            rpc_allow_google_protobuf_empty_requests: self.rpc_allow_google_protobuf_empty_requests,
            rpc_allow_google_protobuf_empty_responses: self
                .rpc_allow_google_protobuf_empty_responses,
            service_suffix: self.service_suffix.unwrap_or(defaults.service_suffix),
            allow_comment_ignores,
            disable_builtin: self.disable_builtin,
        })
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ExternalBreaking {
    #[serde(default, rename = "use")]
    use_ids: Option<Vec<String>>,
    #[serde(default)]
    except: Vec<String>,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default)]
    ignore_only: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    ignore_unstable_packages: bool,
    #[serde(default)]
    disable_builtin: bool,
}

impl ExternalBreaking {
    fn resolve(
        self,
        name: &str,
        file_version: FileVersion,
        module_dir: &str,
    ) -> Result<BreakingConfig> {
        let defaults = BreakingConfig::default_for_version(file_version);
        let (ignore_paths, ignore_id_or_category_to_paths) =
            resolve_ignores(name, file_version, module_dir, self.ignore, self.ignore_only)?;
        Ok(BreakingConfig {
            file_version,
            use_ids: self.use_ids.unwrap_or(defaults.use_ids),
            except_ids: self.except,
            ignore_paths,
            ignore_id_or_category_to_paths,
            ignore_unstable_packages: self.ignore_unstable_packages,
            disable_builtin: self.disable_builtin,
        })
    }
}

/// Normalizes ignore paths. In v2 they are written relative to the workspace
/// root and are re-rooted onto the module; paths outside the module are dropped.
fn resolve_ignores(
    name: &str,
    file_version: FileVersion,
    module_dir: &str,
    ignore: Vec<String>,
    ignore_only: BTreeMap<String, Vec<String>>,
) -> Result<(Vec<String>, BTreeMap<String, Vec<String>>)> {
    let rebase = |paths: Vec<String>| -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let path = normalpath::normalize_and_validate(&path)
                .map_err(|e| Error::config(name, e))?;
            if file_version != FileVersion::V2 {
                out.push(path);
                continue;
            }
            if let Some(relative) = normalpath::strip_dir(module_dir, &path) {
                out.push(relative.to_string());
            }
        }
        Ok(out)
    };
    let ignore_paths = rebase(ignore)?;
    let mut ignore_id_or_category_to_paths = BTreeMap::new();
    for (id, paths) in ignore_only {
        let paths = rebase(paths)?;
        if !paths.is_empty() {
            ignore_id_or_category_to_paths.insert(id, paths);
        }
    }
    Ok((ignore_paths, ignore_id_or_category_to_paths))
}

fn parse_full_name(name: &str, value: Option<String>) -> Result<Option<ModuleFullName>> {
    value
        .map(|value| value.parse::<ModuleFullName>().map_err(|e| Error::config(name, e)))
        .transpose()
}

fn parse_deps(name: &str, deps: Vec<String>) -> Result<Vec<ModuleRef>> {
    let mut out: Vec<ModuleRef> = Vec::with_capacity(deps.len());
    for dep in deps {
        let module_ref: ModuleRef = dep.parse().map_err(|e| Error::config(name, e))?;
        if out.iter().any(|existing| existing.full_name() == module_ref.full_name()) {
            return Err(Error::config(
                name,
                format!("dependency '{}' declared more than once", module_ref.full_name()),
            ));
        }
        out.push(module_ref);
    }
    Ok(out)
}

fn normalize_excludes(name: &str, module_dir: &str, excludes: Vec<String>, rebase: bool) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(excludes.len());
    for exclude in excludes {
        let exclude = normalpath::normalize_and_validate(&exclude)
            .map_err(|e| Error::config(name, e))?;
        let exclude = if rebase {
            normalpath::strip_dir(module_dir, &exclude)
                .ok_or_else(|| {
                    Error::config(
                        name,
                        format!("exclude '{}' is not within module '{}'", exclude, module_dir),
                    )
                })?
                .to_string()
        } else {
            exclude
        };
        if exclude == "." {
            return Err(Error::config(name, "cannot exclude the module root"));
        }
        out.push(exclude);
    }
    Ok(out)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalBuildV1 {
    #[serde(default)]
    roots: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BufYamlV1 {
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    build: ExternalBuildV1,
    #[serde(default)]
    lint: Option<ExternalLint>,
    #[serde(default)]
    breaking: Option<ExternalBreaking>,
}

impl BufYamlV1 {
    pub(super) fn resolve(self, name: &str, file_version: FileVersion) -> Result<BufYamlFile> {
        if file_version == FileVersion::V1 && !self.build.roots.is_empty() {
            return Err(Error::config(name, "build.roots requires version v1beta1"));
        }
        let roots_are_root = self
            .build
            .roots
            .iter()
            .all(|root| normalpath::normalize(root) == ".");
        if !roots_are_root {
            return Err(Error::Unsupported(format!(
                "{}: build.roots other than '.' are not supported",
                name
            )));
        }
        let module = ModuleConfig {
            dir_path: ".".to_string(),
            full_name: parse_full_name(name, self.name)?,
            excludes: normalize_excludes(name, ".", self.build.excludes, false)?,
            lint: self
                .lint
                .unwrap_or_default()
                .resolve(name, file_version, ".")?,
            breaking: self
                .breaking
                .unwrap_or_default()
                .resolve(name, file_version, ".")?,
        };
        Ok(BufYamlFile {
            file_version,
            module_configs: vec![module],
            top_level_lint: None,
            top_level_breaking: None,
            config_deps: parse_deps(name, self.deps)?,
            plugin_configs: Vec::new(),
            policy_configs: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalModuleV2 {
    #[serde(default = "root_dir")]
    path: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    excludes: Vec<String>,
    #[serde(default)]
    lint: Option<ExternalLint>,
    #[serde(default)]
    breaking: Option<ExternalBreaking>,
}

fn root_dir() -> String {
    ".".to_string()
}

/// A plugin is either a single path/name or a binary with arguments.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExternalPluginRef {
    Name(String),
    Command(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalPlugin {
    plugin: ExternalPluginRef,
    #[serde(default)]
    options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalPolicy {
    policy: String,
    #[serde(default)]
    ignore: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BufYamlV2 {
    #[allow(dead_code)]
    version: String,
    #[serde(default)]
    modules: Vec<ExternalModuleV2>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    lint: Option<ExternalLint>,
    #[serde(default)]
    breaking: Option<ExternalBreaking>,
    #[serde(default)]
    plugins: Vec<ExternalPlugin>,
    #[serde(default)]
    policies: Vec<ExternalPolicy>,
}

impl BufYamlV2 {
    pub(super) fn resolve(self, name: &str) -> Result<BufYamlFile> {
        let file_version = FileVersion::V2;
        let modules = if self.modules.is_empty() {
            vec![ExternalModuleV2 {
                path: root_dir(),
                name: None,
                excludes: Vec::new(),
                lint: None,
                breaking: None,
            }]
        } else {
            self.modules
        };

        let mut module_configs: Vec<ModuleConfig> = Vec::with_capacity(modules.len());
        for module in modules {
            let dir_path = normalpath::normalize_and_validate(&module.path)
                .map_err(|e| Error::config(name, e))?;
            if module_configs.iter().any(|m| m.dir_path == dir_path) {
                return Err(Error::config(
                    name,
                    format!("duplicate module path '{}'", dir_path),
                ));
            }
            // module sections replace the top-level section wholesale
            let lint = match module.lint {
                Some(lint) => lint.resolve(name, file_version, &dir_path)?,
                None => self
                    .lint
                    .as_ref()
                    .map(|lint| lint.clone().resolve(name, file_version, &dir_path))
                    .transpose()?
                    .unwrap_or_else(|| LintConfig::default_for_version(file_version)),
            };
            let breaking = match module.breaking {
                Some(breaking) => breaking.resolve(name, file_version, &dir_path)?,
                None => self
                    .breaking
                    .as_ref()
                    .map(|breaking| breaking.clone().resolve(name, file_version, &dir_path))
                    .transpose()?
                    .unwrap_or_else(|| BreakingConfig::default_for_version(file_version)),
            };
            module_configs.push(ModuleConfig {
                full_name: parse_full_name(name, module.name)?,
                excludes: normalize_excludes(name, &dir_path, module.excludes, true)?,
                dir_path,
                lint,
                breaking,
            });
        }

        let top_level_lint = self
            .lint
            .map(|lint| lint.resolve(name, file_version, "."))
            .transpose()?;
        let top_level_breaking = self
            .breaking
            .map(|breaking| breaking.resolve(name, file_version, "."))
            .transpose()?;

        let plugin_configs = self
            .plugins
            .into_iter()
            .map(|plugin| {
                let (plugin_name, args) = match plugin.plugin {
                    ExternalPluginRef::Name(plugin_name) => (plugin_name, Vec::new()),
                    ExternalPluginRef::Command(mut command) => {
                        if command.is_empty() {
                            return Err(Error::config(name, "plugin command must not be empty"));
                        }
                        let plugin_name = command.remove(0);
                        (plugin_name, command)
                    }
                };
                Ok(PluginConfig {
                    name: plugin_name,
                    args,
                    options: plugin.options,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let policy_configs = self
            .policies
            .into_iter()
            .map(|policy| {
                let ignore_paths = policy
                    .ignore
                    .iter()
                    .map(|path| {
                        normalpath::normalize_and_validate(path).map_err(|e| Error::config(name, e))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(PolicyConfig {
                    name: policy.policy,
                    ignore_paths,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BufYamlFile {
            file_version,
            module_configs,
            top_level_lint,
            top_level_breaking,
            config_deps: parse_deps(name, self.deps)?,
            plugin_configs,
            policy_configs,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BufWorkYaml {
    #[allow(dead_code)]
    version: String,
    #[serde(default)]
    pub(super) directories: Vec<String>,
}
