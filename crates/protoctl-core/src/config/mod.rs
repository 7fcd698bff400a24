//! Workspace configuration files.
//!
//! `buf.yaml` (v1beta1, v1, v2), `buf.work.yaml` (v1) and `buf.lock` (v1, v2)
//! are parsed with `serde_yaml` into their external shapes and then resolved
//! into the typed configs below, with version-appropriate defaults applied.
//!
//! ## Defaulting
//!
//! | Setting                  | v1beta1 / v1  | v2            |
//! |--------------------------|---------------|---------------|
//! | lint `use`               | `DEFAULT`     | `STANDARD`    |
//! | breaking `use`           | `FILE`        | `FILE`        |
//! | `enum_zero_value_suffix` | `_UNSPECIFIED`| `_UNSPECIFIED`|
//! | `service_suffix`         | `Service`     | `Service`     |
//!
//! In v2 a module-level `lint`/`breaking` section replaces the top-level one
//! entirely, and ignore paths (written relative to the workspace root) are
//! stored relative to the module root.

mod external;
mod lock;

use crate::error::{Error, Result};
use crate::module::{ModuleFullName, ModuleRef};
use crate::normalpath;
use crate::storage::ReadBucket;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

pub use lock::{get_buf_lock_file_for_prefix, put_buf_lock_file, BufLockFile};

/// Name of the module/workspace configuration file
pub const BUF_YAML: &str = "buf.yaml";
/// Name of the v1 workspace file
pub const BUF_WORK_YAML: &str = "buf.work.yaml";
/// Name of the lock file
pub const BUF_LOCK: &str = "buf.lock";

const DEFAULT_ENUM_ZERO_VALUE_SUFFIX: &str = "_UNSPECIFIED";
const DEFAULT_SERVICE_SUFFIX: &str = "Service";

/// Configuration file version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileVersion {
    /// `version: v1beta1`
    V1Beta1,
    /// `version: v1`
    V1,
    /// `version: v2`
    V2,
}

impl FileVersion {
    /// Parses a version string
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        match value {
            "v1beta1" => Ok(Self::V1Beta1),
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(Error::config(
                name,
                format!("unknown version '{}', expected v1beta1, v1 or v2", other),
            )),
        }
    }

    /// The version string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1Beta1 => "v1beta1",
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    /// Returns true for v1beta1 and v1
    pub fn is_v1_family(&self) -> bool {
        matches!(self, Self::V1Beta1 | Self::V1)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved lint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintConfig {
    /// The version of the file this came from
    pub file_version: FileVersion,
    /// Rule or category IDs to enable
    pub use_ids: Vec<String>,
    /// Rule or category IDs to disable
    pub except_ids: Vec<String>,
    /// Module-relative paths to ignore for all rules
    pub ignore_paths: Vec<String>,
    /// Module-relative paths to ignore, per rule or category
    pub ignore_id_or_category_to_paths: BTreeMap<String, Vec<String>>,
    /// Required suffix for enum zero values
    pub enum_zero_value_suffix: String,
    /// Allow the same message as request and response
    pub rpc_allow_same_request_response: bool,
    /// Allow `google.protobuf.Empty` requests
    pub rpc_allow_google_protobuf_empty_requests: bool,
    /// Allow `google.protobuf.Empty` responses
    pub rpc_allow_google_protobuf_empty_responses: bool,
    /// Required suffix for services
    pub service_suffix: String,
    /// Whether `// buf:lint:ignore` comments are honoured
    pub allow_comment_ignores: bool,
    /// Disable the builtin rules, leaving only plugin rules
    pub disable_builtin: bool,
}

impl LintConfig {
    /// The default lint config for a file version
    pub fn default_for_version(file_version: FileVersion) -> Self {
        let use_id = match file_version {
            FileVersion::V1Beta1 | FileVersion::V1 => "DEFAULT",
            FileVersion::V2 => "STANDARD",
        };
        Self {
            file_version,
            use_ids: vec![use_id.to_string()],
            except_ids: Vec::new(),
            ignore_paths: Vec::new(),
            ignore_id_or_category_to_paths: BTreeMap::new(),
            enum_zero_value_suffix: DEFAULT_ENUM_ZERO_VALUE_SUFFIX.to_string(),
            rpc_allow_same_request_response: false,
            rpc_allow_google_protobuf_empty_requests: false,
            rpc_allow_google_protobuf_empty_responses: false,
            service_suffix: DEFAULT_SERVICE_SUFFIX.to_string(),
            // v1 allows comment ignores only when asked to; v2 allows them unless disallowed
            allow_comment_ignores: file_version == FileVersion::V2,
            disable_builtin: false,
        }
    }
}

/// Resolved breaking-change configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakingConfig {
    /// The version of the file this came from
    pub file_version: FileVersion,
    /// Rule or category IDs to enable
    pub use_ids: Vec<String>,
    /// Rule or category IDs to disable
    pub except_ids: Vec<String>,
    /// Module-relative paths to ignore for all rules
    pub ignore_paths: Vec<String>,
    /// Module-relative paths to ignore, per rule or category
    pub ignore_id_or_category_to_paths: BTreeMap<String, Vec<String>>,
    /// Skip checks for alpha/beta packages
    pub ignore_unstable_packages: bool,
    /// Disable the builtin rules, leaving only plugin rules
    pub disable_builtin: bool,
}

impl BreakingConfig {
    /// The default breaking config for a file version
    pub fn default_for_version(file_version: FileVersion) -> Self {
        Self {
            file_version,
            use_ids: vec!["FILE".to_string()],
            except_ids: Vec::new(),
            ignore_paths: Vec::new(),
            ignore_id_or_category_to_paths: BTreeMap::new(),
            ignore_unstable_packages: false,
            disable_builtin: false,
        }
    }
}

/// A check plugin declared in a v2 `buf.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    /// Local path, binary name or remote plugin name
    pub name: String,
    /// Extra arguments for local binaries
    pub args: Vec<String>,
    /// Plugin options
    pub options: BTreeMap<String, serde_json::Value>,
}

impl PluginConfig {
    /// Returns true if the plugin is referenced by a remote full name
    pub fn is_remote(&self) -> bool {
        self.name.parse::<ModuleFullName>().is_ok() && self.name.contains('.')
    }
}

/// A policy declared in a v2 `buf.yaml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Local path or remote policy name
    pub name: String,
    /// Workspace-relative paths the policy does not apply to
    pub ignore_paths: Vec<String>,
}

/// Configuration of one module declared in a `buf.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    /// Module root, relative to the workspace root
    pub dir_path: String,
    /// Declared module name
    pub full_name: Option<ModuleFullName>,
    /// Module-relative directories excluded from the module
    pub excludes: Vec<String>,
    /// Resolved lint config
    pub lint: LintConfig,
    /// Resolved breaking config
    pub breaking: BreakingConfig,
}

/// A parsed `buf.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct BufYamlFile {
    file_version: FileVersion,
    module_configs: Vec<ModuleConfig>,
    top_level_lint: Option<LintConfig>,
    top_level_breaking: Option<BreakingConfig>,
    config_deps: Vec<ModuleRef>,
    plugin_configs: Vec<PluginConfig>,
    policy_configs: Vec<PolicyConfig>,
}

impl BufYamlFile {
    /// The file used when no `buf.yaml` exists: one unnamed v1 module at the root
    pub fn default_v1() -> Self {
        Self {
            file_version: FileVersion::V1,
            module_configs: vec![ModuleConfig {
                dir_path: ".".to_string(),
                full_name: None,
                excludes: Vec::new(),
                lint: LintConfig::default_for_version(FileVersion::V1),
                breaking: BreakingConfig::default_for_version(FileVersion::V1),
            }],
            top_level_lint: None,
            top_level_breaking: None,
            config_deps: Vec::new(),
            plugin_configs: Vec::new(),
            policy_configs: Vec::new(),
        }
    }

    /// The file version
    pub fn file_version(&self) -> FileVersion {
        self.file_version
    }

    /// The declared modules; always exactly one for v1beta1 and v1
    pub fn module_configs(&self) -> &[ModuleConfig] {
        &self.module_configs
    }

    /// The explicitly declared top-level lint section (v2 only)
    pub fn top_level_lint(&self) -> Option<&LintConfig> {
        self.top_level_lint.as_ref()
    }

    /// The explicitly declared top-level breaking section (v2 only)
    pub fn top_level_breaking(&self) -> Option<&BreakingConfig> {
        self.top_level_breaking.as_ref()
    }

    /// Declared dependencies
    pub fn config_deps(&self) -> &[ModuleRef] {
        &self.config_deps
    }

    /// Declared check plugins
    pub fn plugin_configs(&self) -> &[PluginConfig] {
        &self.plugin_configs
    }

    /// Declared policies
    pub fn policy_configs(&self) -> &[PolicyConfig] {
        &self.policy_configs
    }
}

/// A parsed `buf.work.yaml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufWorkYamlFile {
    /// Module directories, relative to the workspace root
    pub directories: Vec<String>,
}

/// A `--config` value: either a path to a file or inline YAML/JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverride {
    name: String,
    data: Vec<u8>,
}

impl ConfigOverride {
    /// Resolves an override value against the working directory
    pub fn resolve(cwd: &Path, value: &str) -> Result<Self> {
        if matches!(normalpath::ext(value), ".yaml" | ".yml" | ".json") {
            let path = cwd.join(value);
            let data = std::fs::read(&path).map_err(|e| Error::file_read(&path, e))?;
            return Ok(Self {
                name: value.to_string(),
                data,
            });
        }
        Ok(Self {
            name: "<config override>".to_string(),
            data: value.as_bytes().to_vec(),
        })
    }

    /// Creates an override from inline data
    pub fn from_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: "<config override>".to_string(),
            data: data.into(),
        }
    }

    /// Parses the override as a `buf.yaml`
    pub fn buf_yaml(&self) -> Result<BufYamlFile> {
        parse_buf_yaml(&self.name, &self.data)
    }
}

/// Reads the version of a configuration file without parsing the rest
pub fn peek_file_version(name: &str, data: &[u8]) -> Result<FileVersion> {
    let probe: external::VersionProbe = serde_yaml::from_slice(data)
        .map_err(|e| Error::config(name, e))?;
    match probe.version {
        Some(version) => FileVersion::parse(name, &version),
        None => Ok(FileVersion::V1Beta1),
    }
}

/// Parses a `buf.yaml`
pub fn parse_buf_yaml(name: &str, data: &[u8]) -> Result<BufYamlFile> {
    let file_version = peek_file_version(name, data)?;
    debug!("parsing {} as {}", name, file_version);
    match file_version {
        FileVersion::V1Beta1 | FileVersion::V1 => {
            let ext: external::BufYamlV1 =
                serde_yaml::from_slice(data).map_err(|e| Error::config(name, e))?;
            ext.resolve(name, file_version)
        }
        FileVersion::V2 => {
            let ext: external::BufYamlV2 =
                serde_yaml::from_slice(data).map_err(|e| Error::config(name, e))?;
            ext.resolve(name)
        }
    }
}

/// Parses a `buf.work.yaml`
pub fn parse_buf_work_yaml(name: &str, data: &[u8]) -> Result<BufWorkYamlFile> {
    let file_version = peek_file_version(name, data)?;
    if file_version != FileVersion::V1 {
        return Err(Error::config(name, "buf.work.yaml must be version v1"));
    }
    let ext: external::BufWorkYaml =
        serde_yaml::from_slice(data).map_err(|e| Error::config(name, e))?;
    let mut directories = Vec::with_capacity(ext.directories.len());
    for dir in ext.directories {
        let dir = normalpath::normalize_and_validate(&dir)
            .map_err(|e| Error::config(name, e))?;
        if directories.contains(&dir) {
            return Err(Error::config(name, format!("duplicate directory '{}'", dir)));
        }
        directories.push(dir);
    }
    if directories.is_empty() {
        return Err(Error::config(name, "directories must not be empty"));
    }
    Ok(BufWorkYamlFile { directories })
}

/// Reads the `buf.yaml` at `prefix`, if present
pub fn get_buf_yaml_file_for_prefix(
    bucket: &dyn ReadBucket,
    prefix: &str,
) -> Result<Option<BufYamlFile>> {
    let path = normalpath::join(prefix, BUF_YAML);
    if !bucket.exists(&path)? {
        return Ok(None);
    }
    let data = bucket.get(&path)?;
    parse_buf_yaml(&path, &data).map(Some)
}

/// Reads the `buf.yaml` at `prefix`, unless an override is given
pub fn get_buf_yaml_file_for_prefix_or_override(
    bucket: &dyn ReadBucket,
    prefix: &str,
    config_override: Option<&ConfigOverride>,
) -> Result<Option<BufYamlFile>> {
    match config_override {
        Some(config_override) => config_override.buf_yaml().map(Some),
        None => get_buf_yaml_file_for_prefix(bucket, prefix),
    }
}

/// Reads the `buf.work.yaml` at `prefix`, if present
pub fn get_buf_work_yaml_file_for_prefix(
    bucket: &dyn ReadBucket,
    prefix: &str,
) -> Result<Option<BufWorkYamlFile>> {
    let path = normalpath::join(prefix, BUF_WORK_YAML);
    if !bucket.exists(&path)? {
        return Ok(None);
    }
    let data = bucket.get(&path)?;
    parse_buf_work_yaml(&path, &data).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_version_is_v1beta1() {
        assert_eq!(peek_file_version("x", b"name: a").unwrap(), FileVersion::V1Beta1);
        assert!(peek_file_version("x", b"version: v3").is_err());
    }

    #[test]
    fn test_parse_v1() {
        let file = parse_buf_yaml(
            "buf.yaml",
            br#"
version: v1
name: buf.build/acme/weather
deps:
  - buf.build/googleapis/googleapis
build:
  excludes: [vendor]
lint:
  use: [BASIC]
  ignore_only:
    ENUM_ZERO_VALUE_SUFFIX: [legacy]
breaking:
  ignore_unstable_packages: true
"#,
        )
        .unwrap();
        assert_eq!(file.file_version(), FileVersion::V1);
        assert_eq!(file.module_configs().len(), 1);
        let module = &file.module_configs()[0];
        assert_eq!(module.dir_path, ".");
        assert_eq!(module.full_name.as_ref().unwrap().to_string(), "buf.build/acme/weather");
        assert_eq!(module.excludes, vec!["vendor".to_string()]);
        assert_eq!(module.lint.use_ids, vec!["BASIC".to_string()]);
        assert_eq!(module.lint.enum_zero_value_suffix, "_UNSPECIFIED");
        assert_eq!(
            module.lint.ignore_id_or_category_to_paths["ENUM_ZERO_VALUE_SUFFIX"],
            vec!["legacy".to_string()]
        );
        assert_eq!(module.breaking.use_ids, vec!["FILE".to_string()]);
        assert!(module.breaking.ignore_unstable_packages);
        assert_eq!(file.config_deps().len(), 1);
        assert!(file.top_level_lint().is_none());
    }

    #[test]
    fn test_parse_v2_module_override_and_relative_ignores() {
        let file = parse_buf_yaml(
            "buf.yaml",
            br#"
version: v2
modules:
  - path: proto
    name: buf.build/acme/weather
  - path: vendor/other
    lint:
      use: [MINIMAL]
      ignore: [vendor/other/legacy, proto/unrelated]
deps: [buf.build/acme/units]
lint:
  use: [STANDARD, COMMENTS]
plugins:
  - plugin: buf-plugin-timestamps
    options:
      timestamp_suffix: _time
policies:
  - policy: buf.build/acme/policy
    ignore: [proto/legacy]
"#,
        )
        .unwrap();
        assert_eq!(file.file_version(), FileVersion::V2);
        let modules = file.module_configs();
        assert_eq!(modules.len(), 2);
        assert_eq!(
            modules[0].lint.use_ids,
            vec!["STANDARD".to_string(), "COMMENTS".to_string()]
        );
        assert_eq!(modules[1].lint.use_ids, vec!["MINIMAL".to_string()]);
        assert_eq!(modules[1].lint.ignore_paths, vec!["legacy".to_string()]);
        assert_eq!(modules[0].breaking, BreakingConfig::default_for_version(FileVersion::V2));
        assert!(file.top_level_lint().is_some());
        assert_eq!(file.plugin_configs()[0].name, "buf-plugin-timestamps");
        assert_eq!(
            file.plugin_configs()[0].options["timestamp_suffix"],
            serde_json::json!("_time")
        );
        assert_eq!(file.policy_configs()[0].ignore_paths, vec!["proto/legacy".to_string()]);
    }

    #[test]
    fn test_parse_v2_defaults() {
        let file = parse_buf_yaml("buf.yaml", b"version: v2\n").unwrap();
        assert_eq!(file.module_configs().len(), 1);
        assert_eq!(file.module_configs()[0].dir_path, ".");
        assert_eq!(
            file.module_configs()[0].lint,
            LintConfig::default_for_version(FileVersion::V2)
        );
    }

    #[test]
    fn test_parse_v2_rejects_duplicate_module_paths() {
        let err = parse_buf_yaml(
            "buf.yaml",
            b"version: v2\nmodules:\n  - path: proto\n  - path: ./proto\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_parse_buf_work_yaml() {
        let file = parse_buf_work_yaml(
            "buf.work.yaml",
            b"version: v1\ndirectories: [proto, vendor/]\n",
        )
        .unwrap();
        assert_eq!(file.directories, vec!["proto".to_string(), "vendor".to_string()]);
        assert!(parse_buf_work_yaml("buf.work.yaml", b"version: v2\ndirectories: [a]").is_err());
    }

    #[test]
    fn test_config_override_inline() {
        let config_override = ConfigOverride::resolve(Path::new("/"), "version: v2").unwrap();
        assert_eq!(config_override.buf_yaml().unwrap().file_version(), FileVersion::V2);
        let json_override = ConfigOverride::from_data(r#"{"version": "v1", "lint": {"use": ["BASIC"]}}"#);
        assert_eq!(
            json_override.buf_yaml().unwrap().module_configs()[0].lint.use_ids,
            vec!["BASIC".to_string()]
        );
    }
}
