//! Modules: named, versioned collections of `.proto` files.
//!
//! A [`Module`] is a view over a bucket rooted at the module root, plus the
//! identity (full name, commit) and the path targeting that decides which of
//! its files are build targets. A [`ModuleReadBucket`] is the proto-only union
//! of a set of modules, which is what the image builder compiles.

mod provider;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::normalpath;
use crate::storage::{self, ObjectInfo, ReadBucket};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use provider::{
    LocalRegistry, MemModuleProvider, ModuleData, ModuleDataProvider, ModuleKeyProvider,
};

/// Fully-qualified module name: `registry/owner/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleFullName {
    registry: String,
    owner: String,
    name: String,
}

impl ModuleFullName {
    /// Creates a full name from its parts
    pub fn new(
        registry: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let full_name = Self {
            registry: registry.into(),
            owner: owner.into(),
            name: name.into(),
        };
        for (part, label) in [
            (&full_name.registry, "registry"),
            (&full_name.owner, "owner"),
            (&full_name.name, "name"),
        ] {
            if part.is_empty() {
                return Err(Error::invalid_module_name(
                    full_name.to_string(),
                    format!("{} is empty", label),
                ));
            }
            if part.chars().any(|c| c.is_whitespace() || c == '/' || c == '#') {
                return Err(Error::invalid_module_name(
                    full_name.to_string(),
                    format!("{} contains an invalid character", label),
                ));
            }
        }
        Ok(full_name)
    }

    /// The registry host
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The owning user or organization
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The module name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModuleFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.owner, self.name)
    }
}

impl FromStr for ModuleFullName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(Error::invalid_module_name(
                s,
                "must be in the form registry/owner/name",
            ));
        }
        Self::new(parts[0], parts[1], parts[2])
    }
}

/// A module coordinate, optionally pinned to a label, tag or commit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    full_name: ModuleFullName,
    reference: Option<String>,
}

impl ModuleRef {
    /// Creates a module reference
    pub fn new(full_name: ModuleFullName, reference: Option<String>) -> Self {
        Self {
            full_name,
            reference,
        }
    }

    /// The module's full name
    pub fn full_name(&self) -> &ModuleFullName {
        &self.full_name
    }

    /// The pinned reference, if any
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Some(reference) => write!(f, "{}:{}", self.full_name, reference),
            None => write!(f, "{}", self.full_name),
        }
    }
}

impl FromStr for ModuleRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (head, last) = match s.rfind('/') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => return Err(Error::invalid_module_name(s, "must be in the form registry/owner/name[:ref]")),
        };
        let (name, reference) = match last.split_once(':') {
            Some((name, reference)) if reference.is_empty() => {
                return Err(Error::invalid_module_name(
                    s,
                    format!("empty reference after '{}:'", name),
                ))
            }
            Some((name, reference)) => (name, Some(reference.to_string())),
            None => (last, None),
        };
        let full_name: ModuleFullName = format!("{}/{}", head, name).parse()?;
        Ok(Self::new(full_name, reference))
    }
}

/// A module pinned to a specific commit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    full_name: ModuleFullName,
    commit_id: String,
    digest: Option<String>,
}

impl ModuleKey {
    /// Creates a module key
    pub fn new(full_name: ModuleFullName, commit_id: impl Into<String>) -> Self {
        Self {
            full_name,
            commit_id: commit_id.into(),
            digest: None,
        }
    }

    /// Attaches a content digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// The module's full name
    pub fn full_name(&self) -> &ModuleFullName {
        &self.full_name
    }

    /// The commit this key is pinned to
    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// The content digest, if known
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.full_name, self.commit_id)
    }
}

/// Describes a single `.proto` file of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Import path, relative to the module root
    pub path: String,
    /// Path as the user refers to it
    pub external_path: String,
    /// Opaque ID of the owning module
    pub module_opaque_id: String,
    /// Full name of the owning module, if named
    pub module_full_name: Option<ModuleFullName>,
    /// Commit of the owning module, if known
    pub commit_id: Option<String>,
    /// Whether the file is a build target
    pub is_target: bool,
    /// Whether the owning module was sourced from the local bucket
    pub is_local: bool,
}

/// A module within a workspace
#[derive(Debug, Clone)]
pub struct Module {
    opaque_id: String,
    full_name: Option<ModuleFullName>,
    commit_id: Option<String>,
    dir_path: String,
    is_local: bool,
    is_target: bool,
    bucket: Arc<dyn ReadBucket>,
    excludes: Vec<String>,
    target_paths: Vec<String>,
    target_exclude_paths: Vec<String>,
}

impl Module {
    /// Creates a module over a bucket rooted at the module root.
    ///
    /// The module starts out local, a build target, and unnamed.
    pub fn new(opaque_id: impl Into<String>, bucket: Arc<dyn ReadBucket>) -> Self {
        Self {
            opaque_id: opaque_id.into(),
            full_name: None,
            commit_id: None,
            dir_path: ".".to_string(),
            is_local: true,
            is_target: true,
            bucket,
            excludes: Vec::new(),
            target_paths: Vec::new(),
            target_exclude_paths: Vec::new(),
        }
    }

    /// Sets the full name
    pub fn with_full_name(mut self, full_name: Option<ModuleFullName>) -> Self {
        self.full_name = full_name;
        self
    }

    /// Sets the commit
    pub fn with_commit_id(mut self, commit_id: Option<String>) -> Self {
        self.commit_id = commit_id;
        self
    }

    /// Sets the directory of the module within the workspace bucket
    pub fn with_dir_path(mut self, dir_path: impl Into<String>) -> Self {
        self.dir_path = normalpath::normalize(&dir_path.into());
        self
    }

    /// Marks the module as local (sourced from the bucket) or remote
    pub fn with_local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    /// Marks the module as a build target or a dependency
    pub fn with_target(mut self, is_target: bool) -> Self {
        self.is_target = is_target;
        self
    }

    /// Sets module-relative directories that are not part of the module
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    /// Sets module-relative target and exclude paths
    pub fn with_target_paths(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.target_paths = include;
        self.target_exclude_paths = exclude;
        self
    }

    /// The ID unique to this module within its workspace
    pub fn opaque_id(&self) -> &str {
        &self.opaque_id
    }

    /// The full name, if the module is named
    pub fn full_name(&self) -> Option<&ModuleFullName> {
        self.full_name.as_ref()
    }

    /// The commit, if known
    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    /// Directory of the module relative to the workspace bucket root
    pub fn dir_path(&self) -> &str {
        &self.dir_path
    }

    /// Whether the module came from the local bucket
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Whether the module is a build target
    pub fn is_target(&self) -> bool {
        self.is_target
    }

    /// The module's bucket, rooted at the module root
    pub fn bucket(&self) -> &Arc<dyn ReadBucket> {
        &self.bucket
    }

    /// Module-relative target paths
    pub fn target_paths(&self) -> &[String] {
        &self.target_paths
    }

    /// Module-relative target exclude paths
    pub fn target_exclude_paths(&self) -> &[String] {
        &self.target_exclude_paths
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excludes
            .iter()
            .any(|exclude| normalpath::is_equal_or_contains(exclude, path))
    }

    /// Returns true if the module-relative path is a build target
    pub fn is_target_path(&self, path: &str) -> bool {
        if !self.is_target {
            return false;
        }
        let included = self.target_paths.is_empty()
            || self
                .target_paths
                .iter()
                .any(|target| normalpath::is_equal_or_contains(target, path));
        included
            && !self
                .target_exclude_paths
                .iter()
                .any(|exclude| normalpath::is_equal_or_contains(exclude, path))
    }

    /// Lists every `.proto` file of the module, sorted by path
    pub fn proto_file_infos(&self, ctx: &Context) -> Result<Vec<FileInfo>> {
        ctx.check()?;
        let infos = storage::proto_files(self.bucket.walk(".")?);
        Ok(infos
            .into_iter()
            .filter(|info| !self.is_excluded(&info.path))
            .map(|info| self.file_info(info))
            .collect())
    }

    /// Lists the `.proto` files that are build targets
    pub fn target_file_infos(&self, ctx: &Context) -> Result<Vec<FileInfo>> {
        Ok(self
            .proto_file_infos(ctx)?
            .into_iter()
            .filter(|info| info.is_target)
            .collect())
    }

    fn file_info(&self, info: ObjectInfo) -> FileInfo {
        FileInfo {
            is_target: self.is_target_path(&info.path),
            path: info.path,
            external_path: info.external_path,
            module_opaque_id: self.opaque_id.clone(),
            module_full_name: self.full_name.clone(),
            commit_id: self.commit_id.clone(),
            is_local: self.is_local,
        }
    }

    /// Reads a file of the module
    pub fn get_file(&self, path: &str) -> Result<Bytes> {
        self.bucket.get(path)
    }

    /// Computes the content digest of every file in the module
    pub fn digest(&self, ctx: &Context) -> Result<String> {
        bucket_digest(ctx, self.bucket.as_ref())
    }
}

/// Computes a blake3 digest over all `(path, content)` pairs of a bucket.
///
/// Rendered as `b3:<hex>`.
pub fn bucket_digest(ctx: &Context, bucket: &dyn ReadBucket) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for info in bucket.walk(".")? {
        ctx.check()?;
        let content = bucket.get(&info.path)?;
        hasher.update(info.path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(format!("b3:{}", hasher.finalize().to_hex()))
}

/// The proto-only union of a set of modules.
///
/// Files are ordered by module order, then by path. The same path provided
/// by two modules is an error.
#[derive(Debug, Clone)]
pub struct ModuleReadBucket {
    modules: Vec<Module>,
    files: Vec<FileInfo>,
    index: HashMap<String, usize>,
}

impl ModuleReadBucket {
    /// Builds the union of the given modules
    pub fn new(ctx: &Context, modules: Vec<Module>) -> Result<Self> {
        let mut files: Vec<FileInfo> = Vec::new();
        let mut index = HashMap::new();
        for module in &modules {
            for info in module.proto_file_infos(ctx)? {
                if let Some(&existing) = index.get(&info.path) {
                    let first: &FileInfo = &files[existing];
                    return Err(Error::DuplicateProtoFile {
                        path: info.path,
                        first: first.module_opaque_id.clone(),
                        second: module.opaque_id().to_string(),
                    });
                }
                index.insert(info.path.clone(), files.len());
                files.push(info);
            }
        }
        Ok(Self {
            modules,
            files,
            index,
        })
    }

    /// Every file, targets and dependencies
    pub fn file_infos(&self) -> &[FileInfo] {
        &self.files
    }

    /// Files that are build targets
    pub fn target_file_infos(&self) -> Vec<&FileInfo> {
        self.files.iter().filter(|info| info.is_target).collect()
    }

    /// Looks up a file by import path
    pub fn file_info(&self, path: &str) -> Option<&FileInfo> {
        self.index.get(path).map(|&idx| &self.files[idx])
    }

    /// The modules backing this bucket
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    fn module_for(&self, info: &FileInfo) -> Result<&Module> {
        self.modules
            .iter()
            .find(|module| module.opaque_id() == info.module_opaque_id)
            .ok_or_else(|| Error::internal(format!("no module for file {}", info.path)))
    }
}

impl ReadBucket for ModuleReadBucket {
    fn stat(&self, path: &str) -> Result<Option<ObjectInfo>> {
        Ok(self.file_info(path).map(|info| ObjectInfo {
            path: info.path.clone(),
            external_path: info.external_path.clone(),
        }))
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        let info = self
            .file_info(path)
            .ok_or_else(|| Error::object_not_found(path))?;
        self.module_for(info)?.get_file(path)
    }

    fn walk(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let prefix = normalpath::normalize(prefix);
        let mut infos: Vec<ObjectInfo> = self
            .files
            .iter()
            .filter(|info| normalpath::is_equal_or_contains(&prefix, &info.path))
            .map(|info| ObjectInfo {
                path: info.path.clone(),
                external_path: info.external_path.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemBucket;

    fn bucket(files: &[(&'static str, &'static str)]) -> Arc<dyn ReadBucket> {
        Arc::new(MemBucket::from_files(files.iter().copied()))
    }

    #[test]
    fn test_module_full_name_parse() {
        let name: ModuleFullName = "buf.build/acme/weather".parse().unwrap();
        assert_eq!(name.registry(), "buf.build");
        assert_eq!(name.owner(), "acme");
        assert_eq!(name.name(), "weather");
        assert_eq!(name.to_string(), "buf.build/acme/weather");
        assert!("buf.build/acme".parse::<ModuleFullName>().is_err());
        assert!("buf.build//weather".parse::<ModuleFullName>().is_err());
    }

    #[test]
    fn test_module_ref_parse() {
        let r: ModuleRef = "buf.build/acme/weather:v1.2".parse().unwrap();
        assert_eq!(r.full_name().name(), "weather");
        assert_eq!(r.reference(), Some("v1.2"));
        let r: ModuleRef = "localhost:8080/acme/weather".parse().unwrap();
        assert_eq!(r.full_name().registry(), "localhost:8080");
        assert_eq!(r.reference(), None);
        assert!("buf.build/acme/weather:".parse::<ModuleRef>().is_err());
    }

    #[test]
    fn test_target_paths_and_excludes() {
        let ctx = Context::background();
        let module = Module::new(
            "proto",
            bucket(&[
                ("a/one.proto", ""),
                ("a/two.proto", ""),
                ("b/three.proto", ""),
                ("vendor/skip.proto", ""),
                ("README.md", ""),
            ]),
        )
        .with_excludes(vec!["vendor".to_string()])
        .with_target_paths(vec!["a".to_string()], vec!["a/two.proto".to_string()]);

        let all: Vec<_> = module
            .proto_file_infos(&ctx)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(all, vec!["a/one.proto", "a/two.proto", "b/three.proto"]);

        let targets: Vec<_> = module
            .target_file_infos(&ctx)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(targets, vec!["a/one.proto"]);
    }

    #[test]
    fn test_module_read_bucket_union_and_duplicates() {
        let ctx = Context::background();
        let local = Module::new("local", bucket(&[("a.proto", "a")]));
        let dep = Module::new("dep", bucket(&[("b.proto", "b")]))
            .with_local(false)
            .with_target(false);
        let mrb = ModuleReadBucket::new(&ctx, vec![local.clone(), dep]).unwrap();
        assert_eq!(mrb.file_infos().len(), 2);
        assert_eq!(mrb.target_file_infos().len(), 1);
        assert_eq!(&mrb.get("b.proto").unwrap()[..], b"b");
        assert!(!mrb.file_info("b.proto").unwrap().is_target);

        let clash = Module::new("clash", bucket(&[("a.proto", "other")]));
        let err = ModuleReadBucket::new(&ctx, vec![local, clash]).unwrap_err();
        assert!(matches!(err, Error::DuplicateProtoFile { .. }));
    }

    #[test]
    fn test_digest_is_content_sensitive() {
        let ctx = Context::background();
        let one = bucket_digest(&ctx, bucket(&[("a.proto", "x")]).as_ref()).unwrap();
        let two = bucket_digest(&ctx, bucket(&[("a.proto", "y")]).as_ref()).unwrap();
        assert!(one.starts_with("b3:"));
        assert_ne!(one, two);
    }
}
