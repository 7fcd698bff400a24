//! The controller: one entry point from user input to workspaces, images
//! and messages.
//!
//! Every operation takes an input string, classifies it with the
//! [`RefParser`], acquires the data behind it through the [`Reader`], and
//! either builds a [`Workspace`] and compiles it or decodes a serialized
//! image directly. Compile diagnostics that reach the controller are printed
//! once and replaced by [`Error::FileAnnotationsReported`].
//!
//! ```no_run
//! use protoctl_core::bufio::Container;
//! use protoctl_core::controller::{Controller, FunctionOptions};
//! use protoctl_core::Context;
//!
//! let controller = Controller::builder(Container::from_env()?).build();
//! let image = controller.get_image(&Context::background(), "proto", &FunctionOptions::new())?;
//! println!("{} files", image.files().len());
//! # Ok::<(), protoctl_core::Error>(())
//! ```

mod imports;
mod options;
#[cfg(test)]
mod tests;

use crate::annotation::{print_file_annotation_set, AnnotationStream, ErrorFormat, FileAnnotationSet};
use crate::bufio::{
    read_all, write_all, BucketOptions, BucketRef, Container, LocalReader, LocalWriter, Reader, Writer,
};
use crate::build::{wkt, BuildOptions, ImageBuilder, ProtoxImageBuilder};
use crate::codec::{
    decode_image, marshal_image, reparse_image, validate_message, Marshaler, RequiredFieldsValidator, Resolver,
    Unmarshaler,
};
use crate::config::{self, BreakingConfig, BufYamlFile, ConfigOverride, FileVersion, LintConfig, PluginConfig, PolicyConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::{Image, ImageFileInfo, ImageWithConfig};
use crate::module::{Module, ModuleDataProvider, ModuleKeyProvider};
use crate::reference::{DefaultRefParser, InputConfig, InputRef, MessageEncoding, MessageRef, RefParser, SourceOrModuleRef};
use crate::storage::{with_read_bucket_closer, OsBucket, ReadBucket};
use crate::workspace::{
    BucketWorkspaceDepManagerProvider, BucketWorkspaceProvider, ModuleSettings, Workspace, WorkspaceDepManager,
    WorkspaceDepManagerProvider, WorkspaceProvider,
};
use prost_reflect::DynamicMessage;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub use imports::{check_unconfigured_imports, UnconfiguredImport};
pub use options::{filter_image, FunctionOptions, ImageProvenance};

/// The check plugins and policies that apply to a set of target images
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckClient {
    plugin_configs: Vec<PluginConfig>,
    policy_configs: Vec<PolicyConfig>,
}

impl CheckClient {
    fn for_images(images: &[ImageWithConfig]) -> Self {
        let mut client = Self::default();
        let mut plugin_names = HashSet::new();
        let mut policy_names = HashSet::new();
        for image in images {
            for plugin in image.plugin_configs() {
                if plugin_names.insert(plugin.name.clone()) {
                    client.plugin_configs.push(plugin.clone());
                }
            }
            for policy in image.policy_configs() {
                if policy_names.insert(policy.name.clone()) {
                    client.policy_configs.push(policy.clone());
                }
            }
        }
        client
    }

    /// Every distinct plugin, in first-seen order
    pub fn plugin_configs(&self) -> &[PluginConfig] {
        &self.plugin_configs
    }

    /// Every distinct policy, in first-seen order
    pub fn policy_configs(&self) -> &[PolicyConfig] {
        &self.policy_configs
    }

    /// Returns true if there is nothing to run
    pub fn is_empty(&self) -> bool {
        self.plugin_configs.is_empty() && self.policy_configs.is_empty()
    }
}

/// Resolves inputs into workspaces, images and messages
pub struct Controller {
    container: Container,
    ref_parser: Arc<dyn RefParser>,
    reader: Arc<dyn Reader>,
    writer: Arc<dyn Writer>,
    workspace_provider: Arc<dyn WorkspaceProvider>,
    dep_manager_provider: Arc<dyn WorkspaceDepManagerProvider>,
    image_builder: Arc<dyn ImageBuilder>,
    wkt_bucket: Arc<dyn ReadBucket>,
    error_format: ErrorFormat,
    annotation_stream: AnnotationStream,
    parallel: bool,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("container", &self.container)
            .field("error_format", &self.error_format)
            .field("annotation_stream", &self.annotation_stream)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Controller`]; every collaborator has a local default
pub struct ControllerBuilder {
    container: Container,
    ref_parser: Arc<dyn RefParser>,
    reader: Arc<dyn Reader>,
    writer: Arc<dyn Writer>,
    workspace_provider: Arc<dyn WorkspaceProvider>,
    dep_manager_provider: Arc<dyn WorkspaceDepManagerProvider>,
    image_builder: Arc<dyn ImageBuilder>,
    wkt_bucket: Arc<dyn ReadBucket>,
    error_format: ErrorFormat,
    annotation_stream: AnnotationStream,
    parallel: bool,
}

impl ControllerBuilder {
    /// Local reader and writer, bucket workspaces, the protox builder and the
    /// default reference grammar
    pub fn new(container: Container) -> Self {
        Self {
            container,
            ref_parser: Arc::new(DefaultRefParser::new()),
            reader: Arc::new(LocalReader::new()),
            writer: Arc::new(LocalWriter::new()),
            workspace_provider: Arc::new(BucketWorkspaceProvider::new()),
            dep_manager_provider: Arc::new(BucketWorkspaceDepManagerProvider::new()),
            image_builder: Arc::new(ProtoxImageBuilder::new()),
            wkt_bucket: wkt::wkt_bucket(),
            error_format: ErrorFormat::default(),
            annotation_stream: AnnotationStream::default(),
            parallel: false,
        }
    }

    /// Uses a registry for module inputs and `buf.lock` dependencies
    pub fn with_registry<P>(mut self, registry: Arc<P>) -> Self
    where
        P: ModuleKeyProvider + ModuleDataProvider + 'static,
    {
        let key_provider: Arc<dyn ModuleKeyProvider> = registry.clone();
        let data_provider: Arc<dyn ModuleDataProvider> = registry;
        self.reader = Arc::new(LocalReader::new().with_module_key_provider(key_provider));
        self.workspace_provider = Arc::new(BucketWorkspaceProvider::new().with_module_data_provider(data_provider));
        self
    }

    /// Replaces the reference parser
    pub fn with_ref_parser(mut self, ref_parser: Arc<dyn RefParser>) -> Self {
        self.ref_parser = ref_parser;
        self
    }

    /// Replaces the reader
    pub fn with_reader(mut self, reader: Arc<dyn Reader>) -> Self {
        self.reader = reader;
        self
    }

    /// Replaces the writer
    pub fn with_writer(mut self, writer: Arc<dyn Writer>) -> Self {
        self.writer = writer;
        self
    }

    /// Replaces the workspace provider
    pub fn with_workspace_provider(mut self, workspace_provider: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspace_provider = workspace_provider;
        self
    }

    /// Replaces the dependency manager provider
    pub fn with_dep_manager_provider(mut self, dep_manager_provider: Arc<dyn WorkspaceDepManagerProvider>) -> Self {
        self.dep_manager_provider = dep_manager_provider;
        self
    }

    /// Replaces the image builder
    pub fn with_image_builder(mut self, image_builder: Arc<dyn ImageBuilder>) -> Self {
        self.image_builder = image_builder;
        self
    }

    /// Replaces the bucket of well-known types
    pub fn with_wkt_bucket(mut self, wkt_bucket: Arc<dyn ReadBucket>) -> Self {
        self.wkt_bucket = wkt_bucket;
        self
    }

    /// Sets how annotations are printed
    pub fn with_error_format(mut self, error_format: ErrorFormat) -> Self {
        self.error_format = error_format;
        self
    }

    /// Sets where annotations are printed
    pub fn with_annotation_stream(mut self, annotation_stream: AnnotationStream) -> Self {
        self.annotation_stream = annotation_stream;
        self
    }

    /// Builds the target modules of a workspace in parallel
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Creates the controller
    pub fn build(self) -> Controller {
        Controller {
            container: self.container,
            ref_parser: self.ref_parser,
            reader: self.reader,
            writer: self.writer,
            workspace_provider: self.workspace_provider,
            dep_manager_provider: self.dep_manager_provider,
            image_builder: self.image_builder,
            wkt_bucket: self.wkt_bucket,
            error_format: self.error_format,
            annotation_stream: self.annotation_stream,
            parallel: self.parallel,
        }
    }
}

impl Controller {
    /// Starts a builder with local defaults
    pub fn builder(container: Container) -> ControllerBuilder {
        ControllerBuilder::new(container)
    }

    /// The container the controller runs in
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Resolves a source or module input to a workspace
    pub fn get_workspace(&self, ctx: &Context, input: &str, options: &FunctionOptions) -> Result<Workspace> {
        self.intercept(
            self.ref_parser
                .get_source_or_module_ref(input)
                .and_then(|input_ref| self.with_workspace(ctx, &input_ref, options, Ok)),
        )
    }

    /// Opens a local directory for dependency updates.
    ///
    /// The whole directory is managed; target paths do not apply.
    pub fn get_workspace_dep_manager(&self, ctx: &Context, dir_input: &str) -> Result<Box<dyn WorkspaceDepManager>> {
        self.intercept((|| -> Result<_> {
            let dir_ref = self.ref_parser.get_dir_ref(dir_input)?;
            let bucket = self.reader.get_dir_read_write_bucket(ctx, &self.container, &dir_ref)?;
            self.dep_manager_provider.get_workspace_dep_manager(ctx, bucket)
        })())
    }

    /// Builds or decodes the image of any input
    pub fn get_image(&self, ctx: &Context, input: &str, options: &FunctionOptions) -> Result<Image> {
        self.intercept(
            self.ref_parser
                .get_input_ref(input)
                .and_then(|input_ref| self.image_for_input_ref(ctx, &input_ref, options)),
        )
    }

    /// Builds or decodes the image of a structured input. Its paths and
    /// types apply unless `options` sets its own.
    pub fn get_image_for_input_config(
        &self,
        ctx: &Context,
        input_config: &InputConfig,
        options: &FunctionOptions,
    ) -> Result<Image> {
        let options = options.clone().merged_with_input_config(input_config);
        self.intercept(
            self.ref_parser
                .get_ref_for_input_config(input_config)
                .and_then(|input_ref| self.image_for_input_ref(ctx, &input_ref, &options)),
        )
    }

    /// Builds the image of a workspace obtained earlier
    pub fn get_image_for_workspace(
        &self,
        ctx: &Context,
        workspace: &Workspace,
        options: &FunctionOptions,
    ) -> Result<Image> {
        self.intercept(self.build_image(ctx, workspace, options))
    }

    /// Builds one image per target module, each paired with its module's
    /// configuration.
    ///
    /// Modules without target files are skipped; if every module is skipped
    /// the result is [`Error::NoTargetProtoFiles`]. A serialized image input
    /// yields exactly one unnamed result configured from the `buf.yaml` in
    /// the working directory.
    pub fn get_target_image_with_configs(
        &self,
        ctx: &Context,
        input: &str,
        options: &FunctionOptions,
    ) -> Result<Vec<ImageWithConfig>> {
        self.intercept(
            self.ref_parser
                .get_input_ref(input)
                .and_then(|input_ref| self.target_image_with_configs(ctx, &input_ref, options)),
        )
    }

    /// Like [`get_target_image_with_configs`](Self::get_target_image_with_configs),
    /// also collecting the plugins and policies to check the images with
    pub fn get_target_image_with_configs_and_check_client(
        &self,
        ctx: &Context,
        input: &str,
        options: &FunctionOptions,
    ) -> Result<(Vec<ImageWithConfig>, CheckClient)> {
        let images = self.get_target_image_with_configs(ctx, input, options)?;
        let client = CheckClient::for_images(&images);
        Ok((images, client))
    }

    /// Lists every file an input makes importable, the well-known types
    /// included, sorted by path.
    ///
    /// Source code info is always excluded and imports always kept,
    /// whatever `options` says.
    pub fn get_importable_image_file_infos(
        &self,
        ctx: &Context,
        input: &str,
        options: &FunctionOptions,
    ) -> Result<Vec<ImageFileInfo>> {
        let options = options
            .clone()
            .with_image_exclude_source_info(true)
            .with_image_exclude_imports(false);
        self.intercept((|| -> Result<_> {
            let input_ref = self.ref_parser.get_input_ref(input)?;
            let mut infos = match &input_ref {
                InputRef::SourceOrModule(source_or_module_ref) => {
                    self.with_workspace(ctx, source_or_module_ref, &options, |workspace| {
                        let bucket = workspace.module_read_bucket(ctx)?;
                        Ok(bucket
                            .file_infos()
                            .iter()
                            .map(|info| ImageFileInfo {
                                path: info.path.clone(),
                                external_path: info.external_path.clone(),
                                module_full_name: info.module_full_name.clone(),
                                commit_id: info.commit_id.clone(),
                                is_import: !info.is_target,
                            })
                            .collect::<Vec<_>>())
                    })?
                }
                InputRef::Message(message_ref) => self.image_for_message_ref(ctx, message_ref, &options)?.file_infos(),
            };
            let present: HashSet<String> = infos.iter().map(|info| info.path.clone()).collect();
            for object in self.wkt_bucket.walk(".")? {
                if present.contains(&object.path) {
                    continue;
                }
                infos.push(ImageFileInfo {
                    path: object.path,
                    external_path: object.external_path,
                    module_full_name: None,
                    commit_id: None,
                    is_import: true,
                });
            }
            infos.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(infos)
        })())
    }

    /// Writes an image. A null output writes nothing.
    pub fn put_image(&self, ctx: &Context, output: &str, image: &Image, options: &FunctionOptions) -> Result<()> {
        self.intercept((|| -> Result<_> {
            let message_ref = self.ref_parser.get_message_ref(output, MessageEncoding::Binpb)?;
            if message_ref.is_null() {
                return Ok(());
            }
            let data = marshal_image(
                &Marshaler::for_message_ref(&message_ref),
                image,
                options.image_as_file_descriptor_set(),
            )?;
            let writer = self.writer.put_message_file(ctx, &self.container, &message_ref)?;
            write_all(writer, &data)?;
            debug!("wrote image to {}", message_ref);
            Ok(())
        })())
    }

    /// Reads a message of type `type_name`, resolved against `schema`.
    ///
    /// A null input yields an empty message. With validation on, YAML input
    /// is validated while decoding so that violations carry line numbers.
    pub fn get_message(
        &self,
        ctx: &Context,
        schema: &Image,
        input: &str,
        type_name: &str,
        default_encoding: MessageEncoding,
        options: &FunctionOptions,
    ) -> Result<(DynamicMessage, MessageEncoding)> {
        self.intercept((|| -> Result<_> {
            let message_ref = self.ref_parser.get_message_ref(input, default_encoding)?;
            let descriptor = Resolver::for_image(schema)?.message(type_name)?;
            if message_ref.is_null() {
                return Ok((DynamicMessage::new(descriptor), message_ref.encoding));
            }
            let data = read_all(self.reader.get_message_file(ctx, &self.container, &message_ref)?)?;
            ctx.check()?;

            let validator = RequiredFieldsValidator;
            let validate_in_yaml = options.message_validation() && message_ref.encoding == MessageEncoding::Yaml;
            let mut unmarshaler = Unmarshaler::new(message_ref.encoding);
            if validate_in_yaml {
                unmarshaler = unmarshaler.with_yaml_validator(&validator);
            }
            let message = unmarshaler.unmarshal(&descriptor, &data)?;
            if options.message_validation() && !validate_in_yaml {
                validate_message(&validator, &message)?;
            }
            Ok((message, message_ref.encoding))
        })())
    }

    /// Writes a message. A null output writes nothing.
    pub fn put_message(
        &self,
        ctx: &Context,
        output: &str,
        message: &DynamicMessage,
        default_encoding: MessageEncoding,
    ) -> Result<()> {
        self.intercept((|| -> Result<_> {
            let message_ref = self.ref_parser.get_message_ref(output, default_encoding)?;
            if message_ref.is_null() {
                return Ok(());
            }
            let data = Marshaler::for_message_ref(&message_ref).marshal(message)?;
            let writer = self.writer.put_message_file(ctx, &self.container, &message_ref)?;
            write_all(writer, &data)
        })())
    }

    /// Prints unreported diagnostics and replaces them with the
    /// already-reported sentinel
    fn intercept<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.report(err))
    }

    fn report(&self, err: Error) -> Error {
        match err {
            Error::FileAnnotations(set) => match self.print_annotations(&set) {
                Ok(()) => Error::FileAnnotationsReported,
                Err(print_err) => Error::Joined {
                    primary: Box::new(Error::FileAnnotations(set)),
                    close: Box::new(print_err),
                },
            },
            Error::Joined { primary, close } => Error::Joined {
                primary: Box::new(self.report(*primary)),
                close,
            },
            other => other,
        }
    }

    fn print_annotations(&self, set: &FileAnnotationSet) -> Result<()> {
        let stream = match self.annotation_stream {
            AnnotationStream::Stdout => self.container.stdout(),
            AnnotationStream::Stderr => self.container.stderr(),
        };
        let mut guard = stream
            .lock()
            .map_err(|_| Error::internal("annotation stream lock poisoned"))?;
        print_file_annotation_set(&mut *guard, set, self.error_format)?;
        guard.flush()?;
        Ok(())
    }

    fn config_override(&self, options: &FunctionOptions) -> Result<Option<ConfigOverride>> {
        options
            .config_override()
            .map(|value| ConfigOverride::resolve(self.container.cwd(), value))
            .transpose()
    }

    /// Resolves a workspace and runs `f` on it while the input bucket is
    /// still open
    fn with_workspace<T>(
        &self,
        ctx: &Context,
        input_ref: &SourceOrModuleRef,
        options: &FunctionOptions,
        f: impl FnOnce(Workspace) -> Result<T>,
    ) -> Result<T> {
        let config_override = self.config_override(options)?;
        let (bucket_ref, bucket_options) = match input_ref {
            SourceOrModuleRef::ProtoFile(proto_file_ref) => {
                let flag = if !options.target_paths().is_empty() {
                    Some("--path")
                } else if !options.target_exclude_paths().is_empty() {
                    Some("--exclude-path")
                } else {
                    None
                };
                if let Some(flag) = flag {
                    return Err(Error::InvalidFlagCombination(format!(
                        "{} cannot be used with a .proto file input ({})",
                        flag, proto_file_ref.path
                    )));
                }
                (BucketRef::ProtoFile(proto_file_ref.clone()), BucketOptions::default())
            }
            SourceOrModuleRef::Source(source_ref) => (
                BucketRef::Source(source_ref.clone()),
                BucketOptions {
                    target_paths: options.target_paths().to_vec(),
                    target_exclude_paths: options.target_exclude_paths().to_vec(),
                },
            ),
            SourceOrModuleRef::Module(module_ref) => {
                let key = self.reader.get_module_key(ctx, &self.container, module_ref)?;
                debug!("resolved {} to {}", module_ref, key);
                let workspace = self.workspace_provider.get_workspace_for_module_key(
                    ctx,
                    &key,
                    options.target_paths(),
                    options.target_exclude_paths(),
                    config_override.as_ref(),
                )?;
                return f(workspace);
            }
        };
        let (closer, targeting) =
            self.reader
                .get_source_read_bucket_closer(ctx, &self.container, &bucket_ref, &bucket_options)?;
        with_read_bucket_closer(closer, |bucket| {
            let workspace =
                self.workspace_provider
                    .get_workspace_for_bucket(ctx, bucket, &targeting, config_override.as_ref())?;
            f(workspace)
        })
    }

    fn image_for_input_ref(&self, ctx: &Context, input_ref: &InputRef, options: &FunctionOptions) -> Result<Image> {
        match input_ref {
            InputRef::SourceOrModule(source_or_module_ref) => {
                self.with_workspace(ctx, source_or_module_ref, options, |workspace| {
                    self.build_image(ctx, &workspace, options)
                })
            }
            InputRef::Message(message_ref) => self.image_for_message_ref(ctx, message_ref, options),
        }
    }

    fn build_image(&self, ctx: &Context, workspace: &Workspace, options: &FunctionOptions) -> Result<Image> {
        let bucket = workspace.module_read_bucket(ctx)?;
        let build_options = BuildOptions {
            exclude_source_info: options.image_exclude_source_info(),
        };
        let image = self.image_builder.build(ctx, &bucket, &build_options)?;
        check_unconfigured_imports(workspace, &bucket, &image);
        filter_image(image, options, ImageProvenance::Workspace)
    }

    fn image_for_message_ref(
        &self,
        ctx: &Context,
        message_ref: &MessageRef,
        options: &FunctionOptions,
    ) -> Result<Image> {
        if message_ref.is_null() {
            return Err(Error::malformed_input(
                message_ref.to_string(),
                "an image cannot be read from the null device",
            ));
        }
        let data = read_all(self.reader.get_message_file(ctx, &self.container, message_ref)?)?;
        ctx.check()?;
        let image = match message_ref.encoding {
            MessageEncoding::Binpb => reparse_image(Image::decode(&data)?)?,
            encoding => decode_image(&data, encoding)?,
        };
        debug!("decoded image with {} files from {}", image.files().len(), message_ref);
        let image = if options.image_exclude_source_info() {
            image.without_source_code_info()
        } else {
            image
        };
        filter_image(image, options, ImageProvenance::Message)
    }

    fn target_image_with_configs(
        &self,
        ctx: &Context,
        input_ref: &InputRef,
        options: &FunctionOptions,
    ) -> Result<Vec<ImageWithConfig>> {
        match input_ref {
            InputRef::SourceOrModule(source_or_module_ref) => {
                self.with_workspace(ctx, source_or_module_ref, options, |workspace| {
                    self.target_images_for_workspace(ctx, &workspace, options)
                })
            }
            InputRef::Message(message_ref) => {
                let image = self.image_for_message_ref(ctx, message_ref, options)?;
                let settings = self.message_ref_settings(options)?;
                Ok(vec![ImageWithConfig::new(
                    image,
                    None,
                    "",
                    settings.lint,
                    settings.breaking,
                    settings.plugins,
                    settings.policies,
                )])
            }
        }
    }

    fn target_image_for_module(
        &self,
        ctx: &Context,
        workspace: &Workspace,
        module: &Module,
        options: &FunctionOptions,
    ) -> Result<Option<ImageWithConfig>> {
        ctx.check()?;
        let retargeted = workspace.with_target_opaque_ids(&[module.opaque_id()])?;
        let bucket = retargeted.module_read_bucket(ctx)?;
        if bucket.target_file_infos().is_empty() {
            debug!("module {} has no target files, skipping", module.opaque_id());
            return Ok(None);
        }
        let build_options = BuildOptions {
            exclude_source_info: options.image_exclude_source_info(),
        };
        let image = self.image_builder.build(ctx, &bucket, &build_options)?;
        check_unconfigured_imports(&retargeted, &bucket, &image);
        let image = filter_image(image, options, ImageProvenance::Workspace)?;
        let settings = workspace.module_settings(module.opaque_id());
        Ok(Some(ImageWithConfig::new(
            image,
            module.full_name().cloned(),
            module.opaque_id(),
            settings.lint,
            settings.breaking,
            settings.plugins,
            settings.policies,
        )))
    }

    fn target_images_for_workspace(
        &self,
        ctx: &Context,
        workspace: &Workspace,
        options: &FunctionOptions,
    ) -> Result<Vec<ImageWithConfig>> {
        let targets = workspace.target_modules();
        let results: Vec<Result<Option<ImageWithConfig>>> = if self.parallel && targets.len() > 1 {
            info!("building {} modules in parallel", targets.len());
            let child = ctx.child();
            targets
                .par_iter()
                .map(|module| {
                    let result = self.target_image_for_module(&child, workspace, module, options);
                    if result.is_err() {
                        child.cancel();
                    }
                    result
                })
                .collect()
        } else {
            let mut results = Vec::with_capacity(targets.len());
            for module in &targets {
                results.push(Ok(self.target_image_for_module(ctx, workspace, module, options)?));
            }
            results
        };

        // a sibling cancelled by the first failure reports Cancelled; the
        // failure itself wins
        let mut cancelled = false;
        let mut images = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(Some(image)) => images.push(image),
                Ok(None) => {}
                Err(Error::Cancelled) => cancelled = true,
                Err(err) => return Err(err),
            }
        }
        if cancelled {
            return Err(Error::Cancelled);
        }
        if images.is_empty() {
            return Err(Error::NoTargetProtoFiles);
        }
        Ok(images)
    }

    /// Configuration for a decoded image, from the working directory's
    /// `buf.yaml` or the override
    fn message_ref_settings(&self, options: &FunctionOptions) -> Result<ModuleSettings> {
        let config_override = self.config_override(options)?;
        let bucket = OsBucket::new(self.container.cwd());
        let file = config::get_buf_yaml_file_for_prefix_or_override(&bucket, ".", config_override.as_ref())?
            .unwrap_or_else(BufYamlFile::default_v1);
        match file.file_version() {
            FileVersion::V1Beta1 | FileVersion::V1 => match file.module_configs() {
                [module_config] => Ok(ModuleSettings {
                    lint: module_config.lint.clone(),
                    breaking: module_config.breaking.clone(),
                    plugins: Vec::new(),
                    policies: Vec::new(),
                }),
                configs => Err(Error::internal(format!(
                    "expected exactly one module config for a {} buf.yaml, got {}",
                    file.file_version(),
                    configs.len()
                ))),
            },
            FileVersion::V2 => Ok(ModuleSettings {
                lint: file
                    .top_level_lint()
                    .cloned()
                    .unwrap_or_else(|| LintConfig::default_for_version(FileVersion::V2)),
                breaking: file
                    .top_level_breaking()
                    .cloned()
                    .unwrap_or_else(|| BreakingConfig::default_for_version(FileVersion::V2)),
                plugins: file.plugin_configs().to_vec(),
                policies: file.policy_configs().to_vec(),
            }),
        }
    }
}
