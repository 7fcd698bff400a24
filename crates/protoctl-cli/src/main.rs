//! protoctl - Resolve Protocol Buffer workspaces and build descriptor images
//!
//! This tool turns directories, `.proto` files, registry modules and
//! serialized images into images, lists workspace files, converts messages
//! between encodings and pins workspace dependencies.

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use protoctl_core::annotation::AnnotationStream;
use protoctl_core::module::{ModuleDataProvider, ModuleKey, ModuleKeyProvider};
use protoctl_core::{
    Container, Context, Controller, ErrorFormat, FunctionOptions, LocalRegistry, MessageEncoding,
};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Resolve Protocol Buffer workspaces and build descriptor images
#[derive(Parser, Debug)]
#[command(name = "protoctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Format for compile diagnostics
    #[arg(long, global = true, default_value = "text", value_parser = parse_error_format)]
    error_format: ErrorFormat,

    /// Print compile diagnostics to stdout instead of stderr
    #[arg(long, global = true)]
    annotations_to_stdout: bool,

    /// Directory holding registry modules as <registry>/<owner>/<name>/
    #[arg(long, global = true, env = "PROTOCTL_REGISTRY_DIR")]
    registry_dir: Option<PathBuf>,

    /// Build the modules of a workspace in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an image and write it out
    Build {
        #[command(flatten)]
        input: InputArgs,

        /// Where to write the image (`-` for stdout, `/dev/null` to only check)
        #[arg(short, long, default_value = "/dev/null")]
        output: String,

        /// Leave imports out of the image
        #[arg(long)]
        exclude_imports: bool,

        /// Leave source code info out of the image
        #[arg(long)]
        exclude_source_info: bool,

        /// Keep only these types and what they depend on
        #[arg(long = "type")]
        types: Vec<String>,

        /// Remove these types and everything using them
        #[arg(long = "exclude-type")]
        exclude_types: Vec<String>,

        /// Write a plain FileDescriptorSet
        #[arg(long)]
        as_file_descriptor_set: bool,
    },

    /// List the files of an input
    LsFiles {
        #[command(flatten)]
        input: InputArgs,

        /// Also list files that can be imported but are not targets
        #[arg(long)]
        include_importable: bool,
    },

    /// Show the modules that would be linted or checked, with their settings
    Targets {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Convert a message between encodings
    Convert {
        /// The message to read (`-` for stdin)
        #[arg(default_value = "-")]
        message: String,

        /// Fully qualified message type
        #[arg(long = "type")]
        type_name: String,

        /// Input providing the schema
        #[arg(long, default_value = ".")]
        from: String,

        /// Where to write the message (`-` for stdout)
        #[arg(long, default_value = "-#format=json")]
        to: String,

        /// Check the message for missing required fields
        #[arg(long)]
        validate: bool,
    },

    /// Manage workspace dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DepCommand {
    /// Resolve the dependencies of buf.yaml and write buf.lock
    Update {
        /// Directory holding buf.yaml
        #[arg(default_value = ".")]
        dir: String,
    },
    /// List the dependencies pinned in buf.lock
    List {
        /// Directory holding buf.lock
        #[arg(default_value = ".")]
        dir: String,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Directory, .proto file, module or image to read
    #[arg(default_value = ".")]
    input: String,

    /// Limit targets to these paths, relative to the working directory
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Exclude these paths from the targets
    #[arg(long = "exclude-path")]
    exclude_paths: Vec<String>,

    /// buf.yaml to use instead of the one found, as a path or inline data
    #[arg(long)]
    config: Option<String>,
}

impl InputArgs {
    fn options(&self) -> FunctionOptions {
        let options = FunctionOptions::new().with_target_paths(self.paths.clone(), self.exclude_paths.clone());
        match &self.config {
            Some(config) => options.with_config_override(config.clone()),
            None => options,
        }
    }
}

fn parse_error_format(value: &str) -> std::result::Result<ErrorFormat, String> {
    value.parse().map_err(|_| {
        format!(
            "unknown error format {}, expected one of {}",
            value,
            ErrorFormat::NAMES.join(", ")
        )
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let reported = err
                .downcast_ref::<protoctl_core::Error>()
                .map(|core| matches!(core, protoctl_core::Error::FileAnnotationsReported))
                .unwrap_or(false);
            if !reported {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<protoctl_core::Error>()
        .map(|core| u8::try_from(core.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}

fn registry(cli: &Cli) -> Option<Arc<LocalRegistry>> {
    cli.registry_dir.as_ref().map(|dir| Arc::new(LocalRegistry::new(dir)))
}

fn controller(cli: &Cli) -> Result<Controller> {
    let container = Container::from_env().context("Failed to read the working directory")?;
    let mut builder = Controller::builder(container)
        .with_error_format(cli.error_format)
        .with_annotation_stream(if cli.annotations_to_stdout {
            AnnotationStream::Stdout
        } else {
            AnnotationStream::Stderr
        })
        .with_parallel(cli.parallel);
    if let Some(registry) = registry(cli) {
        builder = builder.with_registry(registry);
    }
    Ok(builder.build())
}

fn run(cli: &Cli) -> Result<()> {
    let ctx = Context::background();
    let controller = controller(cli)?;
    match &cli.command {
        Command::Build {
            input,
            output,
            exclude_imports,
            exclude_source_info,
            types,
            exclude_types,
            as_file_descriptor_set,
        } => {
            let options = input
                .options()
                .with_image_exclude_imports(*exclude_imports)
                .with_image_exclude_source_info(*exclude_source_info)
                .with_image_include_types(types.clone())
                .with_image_exclude_types(exclude_types.clone())
                .with_image_as_file_descriptor_set(*as_file_descriptor_set);
            let image = controller
                .get_image(&ctx, &input.input, &options)
                .with_context(|| format!("Failed to build {}", input.input))?;
            info!("built image with {} files", image.files().len());
            controller
                .put_image(&ctx, output, &image, &options)
                .with_context(|| format!("Failed to write image to {}", output))
        }
        Command::LsFiles {
            input,
            include_importable,
        } => {
            let infos = controller
                .get_importable_image_file_infos(&ctx, &input.input, &input.options())
                .with_context(|| format!("Failed to list files of {}", input.input))?;
            for info in infos.iter().filter(|info| *include_importable || !info.is_import) {
                println!("{}", info.path);
            }
            Ok(())
        }
        Command::Targets { input } => {
            let (images, client) = controller
                .get_target_image_with_configs_and_check_client(&ctx, &input.input, &input.options())
                .with_context(|| format!("Failed to build {}", input.input))?;
            for image in &images {
                let name = image
                    .module_full_name()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| image.module_opaque_id().to_string());
                let targets = image.files().iter().filter(|file| !file.is_import()).count();
                println!(
                    "{}\t{} target files\tlint {}\tbreaking {}",
                    if name.is_empty() { "<image>" } else { name.as_str() },
                    targets,
                    image.lint_config().use_ids.join(","),
                    image.breaking_config().use_ids.join(","),
                );
            }
            for plugin in client.plugin_configs() {
                println!("plugin\t{}", plugin.name);
            }
            for policy in client.policy_configs() {
                println!("policy\t{}", policy.name);
            }
            Ok(())
        }
        Command::Convert {
            message,
            type_name,
            from,
            to,
            validate,
        } => {
            let schema = controller
                .get_image(&ctx, from, &FunctionOptions::new())
                .with_context(|| format!("Failed to build schema from {}", from))?;
            let options = FunctionOptions::new().with_message_validation(*validate);
            let (value, encoding) = controller
                .get_message(&ctx, &schema, message, type_name, MessageEncoding::Binpb, &options)
                .with_context(|| format!("Failed to read {} as {}", message, type_name))?;
            debug!("read {} message", encoding);
            controller
                .put_message(&ctx, to, &value, encoding)
                .with_context(|| format!("Failed to write {}", to))
        }
        Command::Dep { command } => match command {
            DepCommand::Update { dir } => dep_update(cli, &ctx, &controller, dir),
            DepCommand::List { dir } => {
                let manager = controller
                    .get_workspace_dep_manager(&ctx, dir)
                    .with_context(|| format!("Failed to open {}", dir))?;
                for key in manager.existing_dep_module_keys(&ctx)? {
                    println!("{}", key);
                }
                Ok(())
            }
        },
    }
}

/// Pins every configured dependency and its transitive dependencies
fn dep_update(cli: &Cli, ctx: &Context, controller: &Controller, dir: &str) -> Result<()> {
    let Some(registry) = registry(cli) else {
        bail!("--registry-dir is required to resolve dependencies");
    };
    let manager = controller
        .get_workspace_dep_manager(ctx, dir)
        .with_context(|| format!("Failed to open {}", dir))?;

    let mut queue: VecDeque<ModuleKey> = VecDeque::new();
    for module_ref in manager.config_dep_module_refs(ctx)? {
        let key = registry
            .get_module_key(ctx, &module_ref)
            .with_context(|| format!("Failed to resolve {}", module_ref))?;
        queue.push_back(key);
    }

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    while let Some(key) = queue.pop_front() {
        if !seen.insert(key.full_name().clone()) {
            continue;
        }
        let data = registry
            .get_module_data(ctx, &key)
            .with_context(|| format!("Failed to read {}", key))?;
        queue.extend(data.dep_keys);
        keys.push(key);
    }
    info!("pinned {} dependencies", keys.len());
    manager.update_lock(ctx, keys)?;
    Ok(())
}
