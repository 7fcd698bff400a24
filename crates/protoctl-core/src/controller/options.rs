use crate::error::Result;
use crate::image::{exclude_imports, filter_by_paths, filter_by_types, Image};
use crate::reference::InputConfig;
use tracing::debug;

/// Per-call options of the [`Controller`](super::Controller).
///
/// Built fresh for every call with the `with_*` methods; nothing here is
/// shared between calls. Target paths are given the way the user wrote them
/// and are mapped onto the input bucket by the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionOptions {
    target_paths: Vec<String>,
    target_exclude_paths: Vec<String>,
    image_exclude_source_info: bool,
    image_exclude_imports: bool,
    image_include_types: Vec<String>,
    image_exclude_types: Vec<String>,
    image_as_file_descriptor_set: bool,
    config_override: Option<String>,
    message_validation: bool,
}

impl FunctionOptions {
    /// Options with every setting off
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the build targets to `include` minus `exclude`
    pub fn with_target_paths(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.target_paths = include;
        self.target_exclude_paths = exclude;
        self
    }

    /// Leaves source code info out of built and decoded images
    pub fn with_image_exclude_source_info(mut self, exclude: bool) -> Self {
        self.image_exclude_source_info = exclude;
        self
    }

    /// Drops imports from images
    pub fn with_image_exclude_imports(mut self, exclude: bool) -> Self {
        self.image_exclude_imports = exclude;
        self
    }

    /// Same as [`with_image_include_types`](Self::with_image_include_types)
    pub fn with_image_types(self, types: Vec<String>) -> Self {
        self.with_image_include_types(types)
    }

    /// Keeps only these types, packages or services and what they need
    pub fn with_image_include_types(mut self, types: Vec<String>) -> Self {
        self.image_include_types = types;
        self
    }

    /// Removes these types, packages or services and everything using them
    pub fn with_image_exclude_types(mut self, types: Vec<String>) -> Self {
        self.image_exclude_types = types;
        self
    }

    /// Writes images as plain `FileDescriptorSet`s
    pub fn with_image_as_file_descriptor_set(mut self, as_file_descriptor_set: bool) -> Self {
        self.image_as_file_descriptor_set = as_file_descriptor_set;
        self
    }

    /// Replaces `buf.yaml` with a file path or inline YAML/JSON
    pub fn with_config_override(mut self, config_override: impl Into<String>) -> Self {
        self.config_override = Some(config_override.into());
        self
    }

    /// Validates decoded messages
    pub fn with_message_validation(mut self, validate: bool) -> Self {
        self.message_validation = validate;
        self
    }

    /// Fills unset targeting and type filters from a structured input
    pub(crate) fn merged_with_input_config(mut self, config: &InputConfig) -> Self {
        if self.target_paths.is_empty() && self.target_exclude_paths.is_empty() {
            self.target_paths = config.paths.clone();
            self.target_exclude_paths = config.exclude_paths.clone();
        }
        if self.image_include_types.is_empty() && self.image_exclude_types.is_empty() {
            self.image_include_types = config.types.clone();
            self.image_exclude_types = config.exclude_types.clone();
        }
        self
    }

    /// Target paths
    pub fn target_paths(&self) -> &[String] {
        &self.target_paths
    }

    /// Excluded target paths
    pub fn target_exclude_paths(&self) -> &[String] {
        &self.target_exclude_paths
    }

    /// Whether any path targeting is set
    pub fn has_target_paths(&self) -> bool {
        !self.target_paths.is_empty() || !self.target_exclude_paths.is_empty()
    }

    /// Whether source code info is left out
    pub fn image_exclude_source_info(&self) -> bool {
        self.image_exclude_source_info
    }

    /// Whether imports are dropped
    pub fn image_exclude_imports(&self) -> bool {
        self.image_exclude_imports
    }

    /// Types to keep
    pub fn image_include_types(&self) -> &[String] {
        &self.image_include_types
    }

    /// Types to remove
    pub fn image_exclude_types(&self) -> &[String] {
        &self.image_exclude_types
    }

    /// Whether images are written as `FileDescriptorSet`s
    pub fn image_as_file_descriptor_set(&self) -> bool {
        self.image_as_file_descriptor_set
    }

    /// The configuration override, unresolved
    pub fn config_override(&self) -> Option<&str> {
        self.config_override.as_deref()
    }

    /// Whether decoded messages are validated
    pub fn message_validation(&self) -> bool {
        self.message_validation
    }
}

/// Where an image came from.
///
/// Workspace builds already honor path targeting; decoded images do not, so
/// only they are path-filtered by [`filter_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvenance {
    /// Built from a workspace
    Workspace,
    /// Decoded from a serialized image
    Message,
}

/// Applies the image options, in order: drop imports, filter by type, then
/// for decoded images filter by path.
///
/// Each step works on the output of the previous one, so a file dropped
/// early is never brought back by a later step.
pub fn filter_image(image: Image, options: &FunctionOptions, provenance: ImageProvenance) -> Result<Image> {
    let mut image = image;
    if options.image_exclude_imports {
        image = exclude_imports(image)?;
    }
    if !options.image_include_types.is_empty() || !options.image_exclude_types.is_empty() {
        image = filter_by_types(&image, &options.image_include_types, &options.image_exclude_types)?;
    }
    if provenance == ImageProvenance::Message && options.has_target_paths() {
        debug!(
            "filtering decoded image by {} paths, {} excludes",
            options.target_paths.len(),
            options.target_exclude_paths.len()
        );
        image = filter_by_paths(&image, &options.target_paths, &options.target_exclude_paths, true)?;
    }
    Ok(image)
}
