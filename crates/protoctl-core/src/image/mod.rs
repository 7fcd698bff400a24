//! Images: linked, topologically ordered sets of file descriptors.
//!
//! An [`Image`] is what compiling a workspace produces. Each [`ImageFile`]
//! wraps a file descriptor together with whether it is an import (not a build
//! target), the module it came from, and the path the user knows it by.
//!
//! Images built from sources are always closed: every import of every file is
//! present. Filtering imports away is the only way to obtain an open image,
//! and such images are meant for output only.

mod filter;
pub mod pb;

use crate::config::{BreakingConfig, LintConfig, PluginConfig, PolicyConfig};
use crate::error::{Error, Result};
use crate::module::ModuleFullName;
use prost::Message;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use filter::{exclude_imports, filter_by_paths, filter_by_types};

/// A file within an image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    descriptor: pb::ImageFile,
    external_path: String,
    is_import: bool,
    is_syntax_unspecified: bool,
    unused_dependency_indexes: Vec<u32>,
    module_full_name: Option<ModuleFullName>,
    commit_id: Option<String>,
}

impl ImageFile {
    /// Creates an image file from a descriptor.
    ///
    /// Any image metadata carried by the descriptor is taken over; the
    /// external path defaults to the file path.
    pub fn new(mut descriptor: pb::ImageFile) -> Result<Self> {
        let path = descriptor
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::invalid_image("file descriptor has no name"))?;
        let extension = descriptor.buf_extension.take().unwrap_or_default();
        let (module_full_name, commit_id) = match extension.module_info {
            Some(module_info) => (
                module_info.name.and_then(|name| {
                    ModuleFullName::new(
                        name.remote.unwrap_or_default(),
                        name.owner.unwrap_or_default(),
                        name.repository.unwrap_or_default(),
                    )
                    .ok()
                }),
                module_info.commit.filter(|commit| !commit.is_empty()),
            ),
            None => (None, None),
        };
        Ok(Self {
            descriptor,
            external_path: path,
            is_import: extension.is_import.unwrap_or(false),
            is_syntax_unspecified: extension.is_syntax_unspecified.unwrap_or(false),
            unused_dependency_indexes: extension.unused_dependency,
            module_full_name,
            commit_id,
        })
    }

    /// Sets the external path
    pub fn with_external_path(mut self, external_path: impl Into<String>) -> Self {
        self.external_path = external_path.into();
        self
    }

    /// Sets whether the file is an import
    pub fn with_is_import(mut self, is_import: bool) -> Self {
        self.is_import = is_import;
        self
    }

    /// Sets the owning module
    pub fn with_module(mut self, full_name: Option<ModuleFullName>, commit_id: Option<String>) -> Self {
        self.module_full_name = full_name;
        self.commit_id = commit_id;
        self
    }

    /// Sets whether the source lacked a `syntax` statement
    pub fn with_syntax_unspecified(mut self, is_syntax_unspecified: bool) -> Self {
        self.is_syntax_unspecified = is_syntax_unspecified;
        self
    }

    /// Sets the indexes of unused imports
    pub fn with_unused_dependency_indexes(mut self, indexes: Vec<u32>) -> Self {
        self.unused_dependency_indexes = indexes;
        self
    }

    /// The import path
    pub fn path(&self) -> &str {
        self.descriptor.name.as_deref().unwrap_or_default()
    }

    /// The path the user knows the file by
    pub fn external_path(&self) -> &str {
        &self.external_path
    }

    /// The package, empty if none
    pub fn package(&self) -> &str {
        self.descriptor.package.as_deref().unwrap_or_default()
    }

    /// Import paths, in declaration order
    pub fn imports(&self) -> &[String] {
        &self.descriptor.dependency
    }

    /// Whether the file is an import rather than a build target
    pub fn is_import(&self) -> bool {
        self.is_import
    }

    /// Whether the source lacked a `syntax` statement
    pub fn is_syntax_unspecified(&self) -> bool {
        self.is_syntax_unspecified
    }

    /// Indexes into [`imports`](Self::imports) that are unused
    pub fn unused_dependency_indexes(&self) -> &[u32] {
        &self.unused_dependency_indexes
    }

    /// The owning module, if named
    pub fn module_full_name(&self) -> Option<&ModuleFullName> {
        self.module_full_name.as_ref()
    }

    /// The owning module's commit, if known
    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    /// The descriptor, without image metadata
    pub fn descriptor(&self) -> &pb::ImageFile {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut pb::ImageFile {
        &mut self.descriptor
    }

    /// Summary of this file
    pub fn info(&self) -> ImageFileInfo {
        ImageFileInfo {
            path: self.path().to_string(),
            external_path: self.external_path.clone(),
            module_full_name: self.module_full_name.clone(),
            commit_id: self.commit_id.clone(),
            is_import: self.is_import,
        }
    }

    /// The descriptor with image metadata attached
    pub fn to_pb(&self) -> pb::ImageFile {
        let mut descriptor = self.descriptor.clone();
        let module_info = self.module_full_name.as_ref().map(|full_name| pb::ModuleInfo {
            name: Some(pb::ModuleName {
                remote: Some(full_name.registry().to_string()),
                owner: Some(full_name.owner().to_string()),
                repository: Some(full_name.name().to_string()),
            }),
            commit: self.commit_id.clone(),
        });
        descriptor.buf_extension = Some(pb::ImageFileExtension {
            is_import: Some(self.is_import),
            module_info,
            is_syntax_unspecified: Some(self.is_syntax_unspecified),
            unused_dependency: self.unused_dependency_indexes.clone(),
        });
        descriptor
    }
}

/// Summary of an image file, for listings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageFileInfo {
    /// Import path
    pub path: String,
    /// Path the user knows the file by
    pub external_path: String,
    /// Owning module, if named
    pub module_full_name: Option<ModuleFullName>,
    /// Owning module's commit, if known
    pub commit_id: Option<String>,
    /// Whether the file is an import
    pub is_import: bool,
}

/// An ordered set of image files
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    files: Vec<ImageFile>,
    index: HashMap<String, usize>,
    reparsed: bool,
}

impl Image {
    /// Creates a closed image: paths are unique and every import is present
    pub fn new(files: Vec<ImageFile>) -> Result<Self> {
        let image = Self::new_open(files)?;
        for file in &image.files {
            for import in file.imports() {
                if !image.index.contains_key(import) {
                    return Err(Error::invalid_image(format!(
                        "{} imports {} which is not in the image",
                        file.path(),
                        import
                    )));
                }
            }
        }
        Ok(image)
    }

    /// Creates an image that may miss imports; paths must still be unique
    pub fn new_open(files: Vec<ImageFile>) -> Result<Self> {
        if files.is_empty() {
            return Err(Error::invalid_image("image has no files"));
        }
        let mut index = HashMap::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            if index.insert(file.path().to_string(), i).is_some() {
                return Err(Error::invalid_image(format!(
                    "duplicate file {}",
                    file.path()
                )));
            }
        }
        Ok(Self {
            files,
            index,
            reparsed: false,
        })
    }

    /// Decodes a binary image
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::from_pb(pb::Image::decode(data)?)
    }

    /// Converts the wire type
    pub fn from_pb(image: pb::Image) -> Result<Self> {
        let files = image
            .file
            .into_iter()
            .map(ImageFile::new)
            .collect::<Result<Vec<_>>>()?;
        Self::new_open(files)
    }

    /// Converts to the wire type. Without image metadata the result is a
    /// plain `FileDescriptorSet`.
    pub fn to_pb(&self, as_file_descriptor_set: bool) -> pb::Image {
        pb::Image {
            file: self
                .files
                .iter()
                .map(|file| {
                    if as_file_descriptor_set {
                        file.descriptor.clone()
                    } else {
                        file.to_pb()
                    }
                })
                .collect(),
        }
    }

    /// Encodes the image as `FileDescriptorSet` bytes
    pub fn to_file_descriptor_set(&self) -> Vec<u8> {
        self.to_pb(true).encode_to_vec()
    }

    /// All files, in topological order
    pub fn files(&self) -> &[ImageFile] {
        &self.files
    }

    /// Consumes the image
    pub fn into_files(self) -> Vec<ImageFile> {
        self.files
    }

    /// Looks up a file by path
    pub fn file(&self, path: &str) -> Option<&ImageFile> {
        self.index.get(path).map(|&i| &self.files[i])
    }

    /// Summaries of all files, in image order
    pub fn file_infos(&self) -> Vec<ImageFileInfo> {
        self.files.iter().map(ImageFile::info).collect()
    }

    /// Whether custom options have already been resolved against the image
    pub fn is_reparsed(&self) -> bool {
        self.reparsed
    }

    /// Records that custom options were resolved
    pub fn mark_reparsed(mut self) -> Self {
        self.reparsed = true;
        self
    }

    /// Removes source code info from every file
    pub fn without_source_code_info(mut self) -> Self {
        for file in &mut self.files {
            file.descriptor.source_code_info = None;
        }
        self
    }

    /// Paths of every file transitively imported by `path`, itself excluded
    pub fn transitive_imports(&self, path: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![path];
        while let Some(current) = stack.pop() {
            if let Some(file) = self.file(current) {
                for import in file.imports() {
                    if seen.insert(import.clone()) {
                        stack.push(import);
                    }
                }
            }
        }
        seen
    }
}

/// An image paired with the configuration of the module it was built for
#[derive(Debug, Clone)]
pub struct ImageWithConfig {
    image: Arc<Image>,
    module_full_name: Option<ModuleFullName>,
    module_opaque_id: String,
    lint_config: LintConfig,
    breaking_config: BreakingConfig,
    plugin_configs: Vec<PluginConfig>,
    policy_configs: Vec<PolicyConfig>,
}

impl ImageWithConfig {
    /// Pairs an image with its module configuration
    pub fn new(
        image: Image,
        module_full_name: Option<ModuleFullName>,
        module_opaque_id: impl Into<String>,
        lint_config: LintConfig,
        breaking_config: BreakingConfig,
        plugin_configs: Vec<PluginConfig>,
        policy_configs: Vec<PolicyConfig>,
    ) -> Self {
        Self {
            image: Arc::new(image),
            module_full_name,
            module_opaque_id: module_opaque_id.into(),
            lint_config,
            breaking_config,
            plugin_configs,
            policy_configs,
        }
    }

    /// The image
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// A shared handle to the image
    pub fn shared_image(&self) -> Arc<Image> {
        Arc::clone(&self.image)
    }

    /// The image's files
    pub fn files(&self) -> &[ImageFile] {
        self.image.files()
    }

    /// The module's full name; `None` for unnamed modules and message inputs
    pub fn module_full_name(&self) -> Option<&ModuleFullName> {
        self.module_full_name.as_ref()
    }

    /// The module's opaque ID
    pub fn module_opaque_id(&self) -> &str {
        &self.module_opaque_id
    }

    /// Lint configuration
    pub fn lint_config(&self) -> &LintConfig {
        &self.lint_config
    }

    /// Breaking-change configuration
    pub fn breaking_config(&self) -> &BreakingConfig {
        &self.breaking_config
    }

    /// Check plugins
    pub fn plugin_configs(&self) -> &[PluginConfig] {
        &self.plugin_configs
    }

    /// Policies
    pub fn policy_configs(&self) -> &[PolicyConfig] {
        &self.policy_configs
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A descriptor with one message per entry of `messages`; each message
    /// may have fields `(name, type_name)`.
    pub(crate) fn file(
        path: &str,
        package: &str,
        imports: &[&str],
        messages: &[(&str, &[(&str, &str)])],
    ) -> pb::ImageFile {
        pb::ImageFile {
            name: Some(path.to_string()),
            package: Some(package.to_string()),
            dependency: imports.iter().map(|s| s.to_string()).collect(),
            syntax: Some("proto3".to_string()),
            message_type: messages
                .iter()
                .map(|(name, fields)| pb::DescriptorProto {
                    name: Some(name.to_string()),
                    field: fields
                        .iter()
                        .enumerate()
                        .map(|(i, (field_name, type_name))| pb::FieldDescriptorProto {
                            name: Some(field_name.to_string()),
                            number: Some(i as i32 + 1),
                            label: Some(1),
                            r#type: Some(11),
                            type_name: Some(type_name.to_string()),
                            json_name: Some(field_name.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn image_file(descriptor: pb::ImageFile, is_import: bool) -> ImageFile {
        ImageFile::new(descriptor).unwrap().with_is_import(is_import)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{file, image_file};
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_requires_closure() {
        let b = image_file(file("b.proto", "acme", &["a.proto"], &[]), false);
        assert!(Image::new(vec![b.clone()]).is_err());
        assert!(Image::new_open(vec![b.clone()]).is_ok());

        let a = image_file(file("a.proto", "acme", &[], &[]), true);
        let image = Image::new(vec![a, b]).unwrap();
        assert_eq!(image.files().len(), 2);
        assert!(image.file("a.proto").unwrap().is_import());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let a = image_file(file("a.proto", "acme", &[], &[]), false);
        assert!(Image::new(vec![a.clone(), a]).is_err());
    }

    #[test]
    fn test_metadata_round_trip() {
        let full_name: ModuleFullName = "buf.test/acme/weather".parse().unwrap();
        let a = image_file(file("a.proto", "acme", &[], &[]), true)
            .with_module(Some(full_name.clone()), Some("abc".to_string()))
            .with_unused_dependency_indexes(vec![0]);
        let image = Image::new(vec![a]).unwrap();

        let decoded = Image::decode(&image.to_pb(false).encode_to_vec()).unwrap();
        let file = &decoded.files()[0];
        assert!(file.is_import());
        assert_eq!(file.module_full_name(), Some(&full_name));
        assert_eq!(file.commit_id(), Some("abc"));
        assert_eq!(file.unused_dependency_indexes(), &[0]);

        let fds = prost_types::FileDescriptorSet::decode(image.to_file_descriptor_set().as_slice())
            .unwrap();
        assert_eq!(fds.file[0].name(), "a.proto");
        let plain = Image::decode(&image.to_file_descriptor_set()).unwrap();
        assert!(!plain.files()[0].is_import());
    }

    #[test]
    fn test_transitive_imports() {
        let a = image_file(file("a.proto", "acme", &[], &[]), true);
        let b = image_file(file("b.proto", "acme", &["a.proto"], &[]), true);
        let c = image_file(file("c.proto", "acme", &["b.proto"], &[]), false);
        let image = Image::new(vec![a, b, c]).unwrap();
        let mut imports: Vec<_> = image.transitive_imports("c.proto").into_iter().collect();
        imports.sort();
        assert_eq!(imports, vec!["a.proto".to_string(), "b.proto".to_string()]);
    }
}
