//! Hand-written protobuf types for the `buf.alpha.image.v1` image format.
//!
//! Uses prost derive macros for encode/decode without prost-build. Field
//! numbers match `google/protobuf/descriptor.proto` and `image.proto`.
//!
//! Every `*Options` field is carried as raw bytes. The bytes are the encoded
//! options message, so custom options (extensions unknown to this crate)
//! survive a decode/encode round trip untouched.

#![allow(missing_docs)]

use prost::Message;
use prost_types::descriptor_proto::ReservedRange;
use prost_types::enum_descriptor_proto::EnumReservedRange;
use prost_types::SourceCodeInfo;

// ── Image ──────────────────────────────────────────────────────

/// `buf.alpha.image.v1.Image`; wire compatible with `FileDescriptorSet`
#[derive(Clone, PartialEq, Message)]
pub struct Image {
    /// Files in topological order
    #[prost(message, repeated, tag = "1")]
    pub file: Vec<ImageFile>,
}

/// `buf.alpha.image.v1.ImageFile`; wire compatible with `FileDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct ImageFile {
    /// File path
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    /// Package
    #[prost(string, optional, tag = "2")]
    pub package: Option<String>,
    /// Imports
    #[prost(string, repeated, tag = "3")]
    pub dependency: Vec<String>,
    /// Indexes into `dependency` of public imports
    #[prost(int32, repeated, packed = "false", tag = "10")]
    pub public_dependency: Vec<i32>,
    /// Indexes into `dependency` of weak imports
    #[prost(int32, repeated, packed = "false", tag = "11")]
    pub weak_dependency: Vec<i32>,
    /// Top-level messages
    #[prost(message, repeated, tag = "4")]
    pub message_type: Vec<DescriptorProto>,
    /// Top-level enums
    #[prost(message, repeated, tag = "5")]
    pub enum_type: Vec<EnumDescriptorProto>,
    /// Services
    #[prost(message, repeated, tag = "6")]
    pub service: Vec<ServiceDescriptorProto>,
    /// Top-level extensions
    #[prost(message, repeated, tag = "7")]
    pub extension: Vec<FieldDescriptorProto>,
    /// Encoded `FileOptions`
    #[prost(bytes = "vec", optional, tag = "8")]
    pub options: Option<Vec<u8>>,
    /// Source locations and comments
    #[prost(message, optional, tag = "9")]
    pub source_code_info: Option<SourceCodeInfo>,
    /// `proto2`, `proto3` or `editions`
    #[prost(string, optional, tag = "12")]
    pub syntax: Option<String>,
    /// `google.protobuf.Edition` number, set when `syntax` is `editions`
    #[prost(int32, optional, tag = "14")]
    pub edition: Option<i32>,
    /// Image metadata
    #[prost(message, optional, tag = "8042")]
    pub buf_extension: Option<ImageFileExtension>,
}

/// `buf.alpha.image.v1.ImageFileExtension`
#[derive(Clone, PartialEq, Message)]
pub struct ImageFileExtension {
    /// The file is not a build target
    #[prost(bool, optional, tag = "1")]
    pub is_import: Option<bool>,
    /// Owning module
    #[prost(message, optional, tag = "2")]
    pub module_info: Option<ModuleInfo>,
    /// The source had no `syntax` statement
    #[prost(bool, optional, tag = "3")]
    pub is_syntax_unspecified: Option<bool>,
    /// Indexes into `dependency` of unused imports
    #[prost(uint32, repeated, packed = "false", tag = "4")]
    pub unused_dependency: Vec<u32>,
}

/// `buf.alpha.image.v1.ModuleInfo`
#[derive(Clone, PartialEq, Message)]
pub struct ModuleInfo {
    /// Module name
    #[prost(message, optional, tag = "1")]
    pub name: Option<ModuleName>,
    /// Commit ID
    #[prost(string, optional, tag = "2")]
    pub commit: Option<String>,
}

/// `buf.alpha.image.v1.ModuleName`
#[derive(Clone, PartialEq, Message)]
pub struct ModuleName {
    /// Registry host
    #[prost(string, optional, tag = "1")]
    pub remote: Option<String>,
    /// Owner
    #[prost(string, optional, tag = "2")]
    pub owner: Option<String>,
    /// Repository
    #[prost(string, optional, tag = "3")]
    pub repository: Option<String>,
}

// ── Descriptors ────────────────────────────────────────────────

/// `google.protobuf.DescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct DescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub field: Vec<FieldDescriptorProto>,
    #[prost(message, repeated, tag = "6")]
    pub extension: Vec<FieldDescriptorProto>,
    #[prost(message, repeated, tag = "3")]
    pub nested_type: Vec<DescriptorProto>,
    #[prost(message, repeated, tag = "4")]
    pub enum_type: Vec<EnumDescriptorProto>,
    #[prost(message, repeated, tag = "5")]
    pub extension_range: Vec<ExtensionRange>,
    #[prost(message, repeated, tag = "8")]
    pub oneof_decl: Vec<OneofDescriptorProto>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub options: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "9")]
    pub reserved_range: Vec<ReservedRange>,
    #[prost(string, repeated, tag = "10")]
    pub reserved_name: Vec<String>,
}

/// `google.protobuf.DescriptorProto.ExtensionRange`
#[derive(Clone, PartialEq, Message)]
pub struct ExtensionRange {
    #[prost(int32, optional, tag = "1")]
    pub start: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub end: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub options: Option<Vec<u8>>,
}

/// `google.protobuf.FieldDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct FieldDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub number: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub label: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub type_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub extendee: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub default_value: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub oneof_index: Option<i32>,
    #[prost(string, optional, tag = "10")]
    pub json_name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub options: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "17")]
    pub proto3_optional: Option<bool>,
}

/// `google.protobuf.OneofDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct OneofDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub options: Option<Vec<u8>>,
}

/// `google.protobuf.EnumDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct EnumDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub value: Vec<EnumValueDescriptorProto>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub options: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "4")]
    pub reserved_range: Vec<EnumReservedRange>,
    #[prost(string, repeated, tag = "5")]
    pub reserved_name: Vec<String>,
}

/// `google.protobuf.EnumValueDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct EnumValueDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub number: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub options: Option<Vec<u8>>,
}

/// `google.protobuf.ServiceDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct ServiceDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub method: Vec<MethodDescriptorProto>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub options: Option<Vec<u8>>,
}

/// `google.protobuf.MethodDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct MethodDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub input_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub output_type: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub options: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "5")]
    pub client_streaming: Option<bool>,
    #[prost(bool, optional, tag = "6")]
    pub server_streaming: Option<bool>,
}

// ── Schema ─────────────────────────────────────────────────────

/// Path of the image schema file
pub const IMAGE_PROTO_PATH: &str = "buf/alpha/image/v1/image.proto";
/// Full name of the image message
pub const IMAGE_MESSAGE_NAME: &str = "buf.alpha.image.v1.Image";

/// Builds the descriptor of `buf/alpha/image/v1/image.proto`, for reflection
/// over images in the JSON, text and YAML encodings.
pub fn image_file_descriptor_proto() -> prost_types::FileDescriptorProto {
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto as D, FieldDescriptorProto as F, FileDescriptorProto};

    fn field(name: &str, number: i32, label: Label, ty: Type, type_name: Option<&str>) -> F {
        F {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            type_name: type_name.map(str::to_string),
            json_name: Some(json_name(name)),
            ..Default::default()
        }
    }

    fn message(name: &str, fields: Vec<F>) -> D {
        D {
            name: Some(name.to_string()),
            field: fields,
            ..Default::default()
        }
    }

    use Label::{Optional as Opt, Repeated as Rep};
    use Type::{Bool, Enum, Int32, Message as Msg, String as Str, Uint32};

    FileDescriptorProto {
        name: Some(IMAGE_PROTO_PATH.to_string()),
        package: Some("buf.alpha.image.v1".to_string()),
        dependency: vec!["google/protobuf/descriptor.proto".to_string()],
        syntax: Some("proto2".to_string()),
        message_type: vec![
            message(
                "Image",
                vec![field("file", 1, Rep, Msg, Some(".buf.alpha.image.v1.ImageFile"))],
            ),
            message(
                "ImageFile",
                vec![
                    field("name", 1, Opt, Str, None),
                    field("package", 2, Opt, Str, None),
                    field("dependency", 3, Rep, Str, None),
                    field("public_dependency", 10, Rep, Int32, None),
                    field("weak_dependency", 11, Rep, Int32, None),
                    field("message_type", 4, Rep, Msg, Some(".google.protobuf.DescriptorProto")),
                    field("enum_type", 5, Rep, Msg, Some(".google.protobuf.EnumDescriptorProto")),
                    field("service", 6, Rep, Msg, Some(".google.protobuf.ServiceDescriptorProto")),
                    field("extension", 7, Rep, Msg, Some(".google.protobuf.FieldDescriptorProto")),
                    field("options", 8, Opt, Msg, Some(".google.protobuf.FileOptions")),
                    field("source_code_info", 9, Opt, Msg, Some(".google.protobuf.SourceCodeInfo")),
                    field("syntax", 12, Opt, Str, None),
                    field("edition", 14, Opt, Enum, Some(".google.protobuf.Edition")),
                    field(
                        "buf_extension",
                        8042,
                        Opt,
                        Msg,
                        Some(".buf.alpha.image.v1.ImageFileExtension"),
                    ),
                ],
            ),
            message(
                "ImageFileExtension",
                vec![
                    field("is_import", 1, Opt, Bool, None),
                    field("module_info", 2, Opt, Msg, Some(".buf.alpha.image.v1.ModuleInfo")),
                    field("is_syntax_unspecified", 3, Opt, Bool, None),
                    field("unused_dependency", 4, Rep, Uint32, None),
                ],
            ),
            message(
                "ModuleInfo",
                vec![
                    field("name", 1, Opt, Msg, Some(".buf.alpha.image.v1.ModuleName")),
                    field("commit", 2, Opt, Str, None),
                ],
            ),
            message(
                "ModuleName",
                vec![
                    field("remote", 1, Opt, Str, None),
                    field("owner", 2, Opt, Str, None),
                    field("repository", 3, Opt, Str, None),
                ],
            ),
        ],
        ..Default::default()
    }
}

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl ImageFile {
    /// Encodes the file as a plain `FileDescriptorProto`, without image metadata
    pub fn encode_file_descriptor_proto(&self) -> Vec<u8> {
        let mut file = self.clone();
        file.buf_extension = None;
        file.encode_to_vec()
    }
}
