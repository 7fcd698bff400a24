//! # protoctl-core
//!
//! A library for resolving Protocol Buffer workspaces and turning them into
//! descriptor images.
//!
//! This crate provides the core functionality for:
//! - Parsing user input strings into typed references (directories, `.proto`
//!   files, modules, serialized images)
//! - Discovering workspaces from `buf.yaml`, `buf.work.yaml` and `buf.lock`
//! - Compiling workspaces into images and filtering them by path and type
//! - Decoding and encoding images and messages in binary, JSON, text and YAML
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`reference`]: The input grammar and typed references
//! - [`storage`]: Read-only and writable buckets over disk or memory
//! - [`bufio`]: Reading references into buckets and message streams
//! - [`config`]: Configuration files and their versions
//! - [`module`]: Modules, module keys and module registries
//! - [`workspace`]: Workspaces of modules with their settings
//! - [`build`]: Compiling modules into images
//! - [`image`]: Images and image filters
//! - [`codec`]: Message encodings and image bootstrap decoding
//! - [`annotation`]: Compile diagnostics and how they are printed
//! - [`controller`]: The entry point tying all of the above together
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protoctl_core::{Container, Context, Controller, FunctionOptions};
//!
//! let controller = Controller::builder(Container::from_env()?).build();
//! let ctx = Context::background();
//!
//! // Build the workspace in ./proto, targeting a single directory
//! let options = FunctionOptions::new().with_target_paths(vec!["proto/acme".to_string()], vec![]);
//! let image = controller.get_image(&ctx, "proto", &options)?;
//!
//! // Write it out as JSON
//! controller.put_image(&ctx, "image.json", &image, &FunctionOptions::new())?;
//! # Ok::<(), protoctl_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! The controller is assembled from traits that can be replaced:
//!
//! - [`RefParser`]: Classify input strings
//! - [`Reader`] and [`Writer`]: Acquire buckets and message streams
//! - [`WorkspaceProvider`]: Turn buckets into workspaces
//! - [`ImageBuilder`]: Compile workspaces
//! - [`ModuleKeyProvider`] and [`ModuleDataProvider`]: Resolve remote modules
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod annotation;
pub mod bufio;
pub mod build;
pub mod codec;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod image;
pub mod module;
pub mod normalpath;
pub mod reference;
pub mod storage;
pub mod workspace;

// Re-export primary types for convenience
pub use annotation::{ErrorFormat, FileAnnotation, FileAnnotationSet};
pub use bufio::{Container, Reader, Writer};
pub use build::{ImageBuilder, ProtoxImageBuilder};
pub use context::Context;
pub use controller::{CheckClient, Controller, ControllerBuilder, FunctionOptions};
pub use error::{Error, Result};
pub use image::{Image, ImageFile, ImageWithConfig};
pub use module::{LocalRegistry, ModuleDataProvider, ModuleKeyProvider};
pub use reference::{DefaultRefParser, MessageEncoding, RefParser};
pub use workspace::{Workspace, WorkspaceProvider};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
