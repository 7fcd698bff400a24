//! Typed input references.
//!
//! User input is an opaque string such as `proto`, `api.proto#include_package_files=true`,
//! `buf.build/acme/weather:main` or `image.json#use_proto_names=true`. A
//! [`RefParser`] classifies it into exactly one [`Reference`] variant. Call sites
//! that only accept some variants use the restricted unions [`SourceOrModuleRef`]
//! and [`InputRef`], so every `match` over them is exhaustive.

mod parser;

use crate::error::{Error, Result};
use crate::module::ModuleRef;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub use parser::DefaultRefParser;

/// Path that designates the null message sink/source
pub const DEV_NULL: &str = "/dev/null";
/// Path that designates stdin or stdout
pub const STDIO: &str = "-";

/// A single `.proto` file to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoFileRef {
    /// Path to the file as given by the user
    pub path: String,
    /// Also target the other files of the same package
    pub include_package_files: bool,
}

/// Compression of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Not compressed
    #[default]
    None,
    /// gzip
    Gzip,
    /// zstd
    Zstd,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::malformed_input(
                other,
                "unknown compression, expected one of none, gzip, zstd",
            )),
        }
    }
}

/// Archive container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// A tarball
    Tar,
    /// A zip archive
    Zip,
}

/// Which git revision to check out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitName {
    /// A branch
    Branch(String),
    /// A tag
    Tag(String),
    /// Any ref: commit, partial commit, branch, tag
    Ref(String),
}

/// A source tree to build as a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// A local directory
    Dir {
        /// Directory path as given by the user
        path: String,
    },
    /// A git repository
    Git {
        /// Clone URL or local path of the repository
        url: String,
        /// Revision, defaults to the default branch
        name: Option<GitName>,
        /// Clone depth
        depth: u32,
        /// Also clone submodules
        recurse_submodules: bool,
        /// Subdirectory of the repository to use as the input root
        subdir: String,
    },
    /// A tar or zip archive
    Archive {
        /// Path or URL of the archive
        path: String,
        /// Container format
        archive_type: ArchiveType,
        /// Compression, tar only
        compression: Compression,
        /// Leading path components to drop
        strip_components: u32,
        /// Subdirectory of the archive to use as the input root
        subdir: String,
    },
}

impl SourceRef {
    /// The path or URL of the source
    pub fn path(&self) -> &str {
        match self {
            Self::Dir { path } => path,
            Self::Git { url, .. } => url,
            Self::Archive { path, .. } => path,
        }
    }
}

/// Encoding of a serialized message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageEncoding {
    /// Protobuf binary wire format
    #[default]
    Binpb,
    /// Protobuf JSON
    Json,
    /// Protobuf text format
    Txtpb,
    /// YAML rendition of the JSON mapping
    Yaml,
}

impl MessageEncoding {
    /// The canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binpb => "binpb",
            Self::Json => "json",
            Self::Txtpb => "txtpb",
            Self::Yaml => "yaml",
        }
    }

    /// Infers the encoding from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".binpb" | ".bin" => Some(Self::Binpb),
            ".json" => Some(Self::Json),
            ".txtpb" => Some(Self::Txtpb),
            ".yaml" | ".yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

impl FromStr for MessageEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binpb" | "bin" => Ok(Self::Binpb),
            "json" => Ok(Self::Json),
            "txtpb" => Ok(Self::Txtpb),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(Error::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for MessageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message is read from or written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePath {
    /// A file
    File(String),
    /// stdin or stdout
    Stdio,
    /// Discard on write, empty on read
    Null,
}

/// A serialized message, usually an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// Location of the payload
    pub path: MessagePath,
    /// Encoding of the payload
    pub encoding: MessageEncoding,
    /// JSON/YAML: emit proto field names instead of lowerCamelCase
    pub use_proto_names: bool,
    /// JSON/YAML: emit enum numbers instead of names
    pub use_enum_numbers: bool,
}

impl MessageRef {
    /// Creates a message reference with default formatting
    pub fn new(path: MessagePath, encoding: MessageEncoding) -> Self {
        Self {
            path,
            encoding,
            use_proto_names: false,
            use_enum_numbers: false,
        }
    }

    /// Returns true if this reference designates the null device
    pub fn is_null(&self) -> bool {
        matches!(self.path, MessagePath::Null)
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            MessagePath::File(path) => write!(f, "{}#format={}", path, self.encoding),
            MessagePath::Stdio => write!(f, "{}#format={}", STDIO, self.encoding),
            MessagePath::Null => write!(f, "{}#format={}", DEV_NULL, self.encoding),
        }
    }
}

/// A local directory opened read-write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRef {
    /// Directory path as given by the user
    pub path: String,
}

/// Any classified input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A single `.proto` file
    ProtoFile(ProtoFileRef),
    /// A source tree
    Source(SourceRef),
    /// A remote module
    Module(ModuleRef),
    /// A serialized message
    Message(MessageRef),
    /// A local directory for dependency updates
    Dir(DirRef),
}

impl Reference {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::ProtoFile(_) => "proto file",
            Self::Source(_) => "source",
            Self::Module(_) => "module",
            Self::Message(_) => "message",
            Self::Dir(_) => "directory",
        }
    }
}

/// A reference that resolves to a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrModuleRef {
    /// A single `.proto` file
    ProtoFile(ProtoFileRef),
    /// A source tree
    Source(SourceRef),
    /// A remote module
    Module(ModuleRef),
}

impl TryFrom<Reference> for SourceOrModuleRef {
    type Error = Error;

    fn try_from(reference: Reference) -> Result<Self> {
        match reference {
            Reference::ProtoFile(r) => Ok(Self::ProtoFile(r)),
            Reference::Source(r) => Ok(Self::Source(r)),
            Reference::Module(r) => Ok(Self::Module(r)),
            Reference::Dir(DirRef { path }) => Ok(Self::Source(SourceRef::Dir { path })),
            other @ Reference::Message(_) => Err(Error::malformed_input(
                other_display(&other),
                format!("expected a source or module input, got a {}", other.variant_name()),
            )),
        }
    }
}

/// A reference that resolves to an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    /// Built from a workspace
    SourceOrModule(SourceOrModuleRef),
    /// Decoded from a serialized image
    Message(MessageRef),
}

impl From<Reference> for InputRef {
    fn from(reference: Reference) -> Self {
        match reference {
            Reference::ProtoFile(r) => Self::SourceOrModule(SourceOrModuleRef::ProtoFile(r)),
            Reference::Source(r) => Self::SourceOrModule(SourceOrModuleRef::Source(r)),
            Reference::Module(r) => Self::SourceOrModule(SourceOrModuleRef::Module(r)),
            Reference::Message(r) => Self::Message(r),
            Reference::Dir(DirRef { path }) => {
                Self::SourceOrModule(SourceOrModuleRef::Source(SourceRef::Dir { path }))
            }
        }
    }
}

fn other_display(reference: &Reference) -> String {
    match reference {
        Reference::ProtoFile(r) => r.path.clone(),
        Reference::Source(r) => r.path().to_string(),
        Reference::Module(r) => r.to_string(),
        Reference::Message(r) => r.to_string(),
        Reference::Dir(r) => r.path.clone(),
    }
}

/// A structured input, as found in generation templates.
///
/// Exactly one location key must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Local directory
    #[serde(default)]
    pub directory: Option<String>,
    /// Remote module
    #[serde(default)]
    pub module: Option<String>,
    /// Git repository
    #[serde(default)]
    pub git_repo: Option<String>,
    /// Tarball
    #[serde(default)]
    pub tarball: Option<String>,
    /// Zip archive
    #[serde(default)]
    pub zip_archive: Option<String>,
    /// Single proto file
    #[serde(default)]
    pub proto_file: Option<String>,
    /// Binary image
    #[serde(default)]
    pub binary_image: Option<String>,
    /// JSON image
    #[serde(default)]
    pub json_image: Option<String>,
    /// Text format image
    #[serde(default)]
    pub text_image: Option<String>,
    /// YAML image
    #[serde(default)]
    pub yaml_image: Option<String>,
    /// Git branch
    #[serde(default)]
    pub branch: Option<String>,
    /// Git tag
    #[serde(default)]
    pub tag: Option<String>,
    /// Git ref
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    /// Git clone depth
    #[serde(default)]
    pub depth: Option<u32>,
    /// Clone git submodules
    #[serde(default)]
    pub recurse_submodules: bool,
    /// Tarball compression
    #[serde(default)]
    pub compression: Option<String>,
    /// Archive components to strip
    #[serde(default)]
    pub strip_components: Option<u32>,
    /// Git or archive subdirectory
    #[serde(default)]
    pub subdir: Option<String>,
    /// Proto file: include package siblings
    #[serde(default)]
    pub include_package_files: bool,
    /// Types to include in the image
    #[serde(default)]
    pub types: Vec<String>,
    /// Types to exclude from the image
    #[serde(default)]
    pub exclude_types: Vec<String>,
    /// Target paths
    #[serde(default)]
    pub paths: Vec<String>,
    /// Excluded target paths
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

/// Classifies user input into references
pub trait RefParser: Send + Sync {
    /// Classifies any input
    fn get_ref(&self, value: &str) -> Result<Reference>;

    /// Classifies an input that must resolve to a workspace
    fn get_source_or_module_ref(&self, value: &str) -> Result<SourceOrModuleRef> {
        SourceOrModuleRef::try_from(self.get_ref(value)?)
    }

    /// Classifies an input that must resolve to an image
    fn get_input_ref(&self, value: &str) -> Result<InputRef> {
        Ok(InputRef::from(self.get_ref(value)?))
    }

    /// Classifies an input that must be a local directory
    fn get_dir_ref(&self, value: &str) -> Result<DirRef>;

    /// Classifies an input that must be a message, using `default_encoding`
    /// when neither an option nor the extension says otherwise
    fn get_message_ref(&self, value: &str, default_encoding: MessageEncoding) -> Result<MessageRef>;

    /// Converts a structured input
    fn get_ref_for_input_config(&self, config: &InputConfig) -> Result<InputRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_unions() {
        let message = Reference::Message(MessageRef::new(MessagePath::Stdio, MessageEncoding::Json));
        assert!(SourceOrModuleRef::try_from(message.clone()).is_err());
        assert!(matches!(InputRef::from(message), InputRef::Message(_)));

        let dir = Reference::Dir(DirRef {
            path: "proto".to_string(),
        });
        assert_eq!(
            SourceOrModuleRef::try_from(dir).unwrap(),
            SourceOrModuleRef::Source(SourceRef::Dir {
                path: "proto".to_string()
            })
        );
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("yml".parse::<MessageEncoding>().unwrap(), MessageEncoding::Yaml);
        assert_eq!("bin".parse::<MessageEncoding>().unwrap(), MessageEncoding::Binpb);
        assert!(matches!(
            "xml".parse::<MessageEncoding>(),
            Err(Error::UnknownEncoding(_))
        ));
        assert_eq!(MessageEncoding::from_extension(".txtpb"), Some(MessageEncoding::Txtpb));
    }

    #[test]
    fn test_null_message_ref() {
        assert!(MessageRef::new(MessagePath::Null, MessageEncoding::Binpb).is_null());
        assert!(!MessageRef::new(MessagePath::Stdio, MessageEncoding::Binpb).is_null());
    }
}
