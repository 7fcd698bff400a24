//! Message encoding and decoding.
//!
//! A message is read or written in one of four encodings. Binary needs
//! nothing but the message descriptor; JSON, text format and YAML need a
//! [`Resolver`] so that `Any` payloads and custom options can be named.
//!
//! Images are themselves messages, and decoding one from a non-binary
//! encoding needs a resolver built from the very descriptors being decoded.
//! [`decode_image`] solves this with two passes.

mod bootstrap;
mod validate;

use crate::build::wkt;
use crate::error::{Error, Result};
use crate::image::{pb, Image};
use crate::reference::{MessageEncoding, MessageRef};
use prost::Message;
use prost_reflect::text_format::FormatOptions;
use prost_reflect::{DeserializeOptions, DescriptorPool, DynamicMessage, MessageDescriptor, SerializeOptions};
use std::sync::OnceLock;
use tracing::debug;

pub use bootstrap::{decode_image, marshal_image, reparse_image};
pub use validate::{FieldPathElement, RequiredFieldsValidator, Validator, Violation};

static BASE_POOL: OnceLock<std::result::Result<DescriptorPool, String>> = OnceLock::new();

fn build_base_pool() -> std::result::Result<DescriptorPool, String> {
    let mut compiler = protox::Compiler::with_file_resolver(protox::file::GoogleFileResolver::new());
    compiler.include_imports(true);
    compiler
        .open_files(wkt::WKT_NAMES)
        .map_err(|err| err.to_string())?;
    let mut pool = compiler.descriptor_pool();
    pool.add_file_descriptor_proto(pb::image_file_descriptor_proto())
        .map_err(|err| err.to_string())?;
    Ok(pool)
}

/// Maps fully-qualified type names to descriptors.
///
/// Every resolver knows the well-known types and the image schema itself.
#[derive(Debug, Clone)]
pub struct Resolver {
    pool: DescriptorPool,
}

impl Resolver {
    /// A resolver that knows only the well-known types and the image schema
    pub fn base() -> Result<Self> {
        let pool = BASE_POOL
            .get_or_init(build_base_pool)
            .clone()
            .map_err(Error::descriptor_build)?;
        Ok(Self { pool })
    }

    /// A resolver over every file of an image.
    ///
    /// Files already known to the base pool are skipped. A file that cannot
    /// be linked (an open image missing some imports) is skipped as well;
    /// only its types are unavailable.
    pub fn for_image(image: &Image) -> Result<Self> {
        let mut resolver = Self::base()?;
        for file in image.files() {
            if resolver.pool.get_file_by_name(file.path()).is_some() {
                continue;
            }
            let encoded = file.descriptor().encode_file_descriptor_proto();
            if let Err(err) = resolver.pool.decode_file_descriptor_proto(encoded.as_slice()) {
                debug!("resolver skips {}: {}", file.path(), err);
            }
        }
        Ok(resolver)
    }

    /// Looks up a message type
    pub fn message(&self, full_name: &str) -> Result<MessageDescriptor> {
        let name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.pool
            .get_message_by_name(name)
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    /// The underlying descriptor pool
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

/// Encodes messages in one encoding.
///
/// The formatting toggles only affect JSON and YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marshaler {
    encoding: MessageEncoding,
    use_proto_names: bool,
    use_enum_numbers: bool,
}

impl Marshaler {
    /// A marshaler with default formatting
    pub fn new(encoding: MessageEncoding) -> Self {
        Self {
            encoding,
            ..Default::default()
        }
    }

    /// The marshaler a message reference asks for
    pub fn for_message_ref(message_ref: &MessageRef) -> Self {
        Self {
            encoding: message_ref.encoding,
            use_proto_names: message_ref.use_proto_names,
            use_enum_numbers: message_ref.use_enum_numbers,
        }
    }

    /// Use `.proto` field names instead of lowerCamelCase JSON names
    pub fn with_proto_names(mut self, use_proto_names: bool) -> Self {
        self.use_proto_names = use_proto_names;
        self
    }

    /// Write enum values as numbers instead of names
    pub fn with_enum_numbers(mut self, use_enum_numbers: bool) -> Self {
        self.use_enum_numbers = use_enum_numbers;
        self
    }

    /// The target encoding
    pub fn encoding(&self) -> MessageEncoding {
        self.encoding
    }

    fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions::new()
            .use_proto_field_name(self.use_proto_names)
            .use_enum_numbers(self.use_enum_numbers)
    }

    /// Encodes a message
    pub fn marshal(&self, message: &DynamicMessage) -> Result<Vec<u8>> {
        match self.encoding {
            MessageEncoding::Binpb => Ok(message.encode_to_vec()),
            MessageEncoding::Json => {
                let mut out = Vec::new();
                let mut serializer = serde_json::Serializer::new(&mut out);
                message.serialize_with_options(&mut serializer, &self.serialize_options())?;
                Ok(out)
            }
            MessageEncoding::Txtpb => {
                let text = message.to_text_format_with_options(&FormatOptions::new().pretty(true));
                Ok(text.into_bytes())
            }
            MessageEncoding::Yaml => {
                let value = message
                    .serialize_with_options(serde_json::value::Serializer, &self.serialize_options())?;
                Ok(serde_yaml::to_string(&value)?.into_bytes())
            }
        }
    }
}

/// Decodes messages in one encoding
#[derive(Clone, Copy)]
pub struct Unmarshaler<'a> {
    encoding: MessageEncoding,
    lenient: bool,
    validator: Option<&'a dyn Validator>,
}

impl std::fmt::Debug for Unmarshaler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unmarshaler")
            .field("encoding", &self.encoding)
            .field("lenient", &self.lenient)
            .field("validates", &self.validator.is_some())
            .finish()
    }
}

impl<'a> Unmarshaler<'a> {
    /// A strict unmarshaler: unknown JSON and YAML fields are errors
    pub fn new(encoding: MessageEncoding) -> Self {
        Self {
            encoding,
            lenient: false,
            validator: None,
        }
    }

    /// Ignore JSON and YAML fields the resolver does not know
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Validate YAML input while decoding.
    ///
    /// Violations are reported with the line of the YAML source they refer
    /// to. Other encodings ignore the validator.
    pub fn with_yaml_validator(mut self, validator: &'a dyn Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    fn deserialize_options(&self) -> DeserializeOptions {
        DeserializeOptions::new().deny_unknown_fields(!self.lenient)
    }

    /// Decodes a message of type `descriptor`
    pub fn unmarshal(&self, descriptor: &MessageDescriptor, data: &[u8]) -> Result<DynamicMessage> {
        match self.encoding {
            MessageEncoding::Binpb => Ok(DynamicMessage::decode(descriptor.clone(), data)?),
            MessageEncoding::Json => {
                let mut deserializer = serde_json::Deserializer::from_slice(data);
                let message = DynamicMessage::deserialize_with_options(
                    descriptor.clone(),
                    &mut deserializer,
                    &self.deserialize_options(),
                )?;
                deserializer.end()?;
                Ok(message)
            }
            MessageEncoding::Txtpb => {
                let text = std::str::from_utf8(data).map_err(|err| Error::TextFormat(err.to_string()))?;
                DynamicMessage::parse_text_format(descriptor.clone(), text)
                    .map_err(|err| Error::TextFormat(err.to_string()))
            }
            MessageEncoding::Yaml => self.unmarshal_yaml(descriptor, data),
        }
    }

    fn unmarshal_yaml(&self, descriptor: &MessageDescriptor, data: &[u8]) -> Result<DynamicMessage> {
        let source = std::str::from_utf8(data).map_err(|err| Error::Yaml(err.to_string()))?;
        let message = if source.trim().is_empty() {
            DynamicMessage::new(descriptor.clone())
        } else {
            let value: serde_json::Value = serde_yaml::from_str(source)?;
            DynamicMessage::deserialize_with_options(descriptor.clone(), value, &self.deserialize_options())
                .map_err(|err| Error::Yaml(err.to_string()))?
        };
        if let Some(validator) = self.validator {
            let violations: Vec<Violation> = validator
                .validate(&message)
                .into_iter()
                .map(|violation| violation.located_in_yaml(source))
                .collect();
            if !violations.is_empty() {
                return Err(Error::Validation(violations));
            }
        }
        Ok(message)
    }
}

/// Runs a validator over a decoded message
pub fn validate_message(validator: &dyn Validator, message: &DynamicMessage) -> Result<()> {
    let violations = validator.validate(message);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use prost_reflect::DescriptorPool;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn field(name: &str, number: i32, label: Label, kind: Type, type_name: Option<&str>) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(kind as i32),
            type_name: type_name.map(str::to_string),
            json_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// `acme.Config { required string name = 1; optional Inner inner = 2;
    /// repeated Inner items = 3; }` and `acme.Inner { required int32 id = 1;
    /// optional string note = 2; }`
    pub(crate) fn config_pool() -> DescriptorPool {
        let file = FileDescriptorProto {
            name: Some("acme/config.proto".to_string()),
            package: Some("acme".to_string()),
            syntax: Some("proto2".to_string()),
            message_type: vec![
                DescriptorProto {
                    name: Some("Config".to_string()),
                    field: vec![
                        field("name", 1, Label::Required, Type::String, None),
                        field("inner", 2, Label::Optional, Type::Message, Some(".acme.Inner")),
                        field("items", 3, Label::Repeated, Type::Message, Some(".acme.Inner")),
                    ],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("Inner".to_string()),
                    field: vec![
                        field("id", 1, Label::Required, Type::Int32, None),
                        field("note", 2, Label::Optional, Type::String, None),
                    ],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(file).unwrap();
        pool
    }
}
