//! Image building: compiling a module read bucket into an [`Image`].

mod compiler;
pub mod wkt;

use crate::context::Context;
use crate::error::Result;
use crate::image::Image;
use crate::module::ModuleReadBucket;

pub use compiler::ProtoxImageBuilder;

/// Options for a single build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Leave `source_code_info` out of every file
    pub exclude_source_info: bool,
}

/// Compiles proto sources into images.
///
/// Compile problems are reported as [`Error::FileAnnotations`] carrying
/// every diagnostic found, never as a partial image.
///
/// [`Error::FileAnnotations`]: crate::Error::FileAnnotations
pub trait ImageBuilder: Send + Sync {
    /// Builds an image of every file of `bucket`. Files that are build
    /// targets become non-imports, all others imports.
    fn build(&self, ctx: &Context, bucket: &ModuleReadBucket, options: &BuildOptions) -> Result<Image>;
}
