use super::{Marshaler, Resolver, Unmarshaler};
use crate::error::Result;
use crate::image::{pb, Image};
use crate::reference::MessageEncoding;
use prost::Message;
use prost_reflect::DynamicMessage;
use std::borrow::Cow;
use tracing::debug;

const FILE_DESCRIPTOR_SET_NAME: &str = "google.protobuf.FileDescriptorSet";

/// Decodes an image in any encoding.
///
/// Binary images carry custom options as raw bytes and decode in one go.
/// The other encodings name custom options by their extension, which only
/// the image's own descriptors define, so decoding takes two passes:
///
/// 1. decode leniently against the base resolver; standard descriptor
///    fields come out right, custom options are dropped (text format has no
///    lenient parser, so its extension entries are removed up front)
/// 2. build a resolver from the files of that first result
/// 3. decode the original bytes again against that resolver
///
/// The second result is returned, marked as already reparsed.
pub fn decode_image(data: &[u8], encoding: MessageEncoding) -> Result<Image> {
    if encoding == MessageEncoding::Binpb {
        return Image::decode(data);
    }
    let first = decode_image_single_pass(&Resolver::base()?, data, encoding, true)?;
    let resolver = Resolver::for_image(&first)?;
    debug!("decoding {} image with {} bootstrap files", encoding, first.files().len());
    let second = decode_image_single_pass(&resolver, data, encoding, false)?;
    Ok(second.mark_reparsed())
}

/// One decode pass against a fixed resolver
pub(crate) fn decode_image_single_pass(
    resolver: &Resolver,
    data: &[u8],
    encoding: MessageEncoding,
    lenient: bool,
) -> Result<Image> {
    let descriptor = resolver.message(pb::IMAGE_MESSAGE_NAME)?;
    let data: Cow<'_, [u8]> = match (lenient, encoding, std::str::from_utf8(data)) {
        (true, MessageEncoding::Txtpb, Ok(text)) => Cow::Owned(strip_text_extensions(text).into_bytes()),
        _ => Cow::Borrowed(data),
    };
    let message = Unmarshaler::new(encoding)
        .lenient(lenient)
        .unmarshal(&descriptor, &data)?;
    Image::from_pb(pb::Image::decode(message.encode_to_vec().as_slice())?)
}

/// Removes extension entries (`[pkg.ext]: value`, `[pkg.ext] { ... }`) from a
/// text-format message.
///
/// A `[` opens an extension name only when it holds a dotted name and is
/// followed by `:`, `{` or `<`; anything else is a list and is kept.
fn strip_text_extensions(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'#' => i = skip_comment(bytes, i),
            b'[' => match extension_entry_end(bytes, i) {
                Some(end) => {
                    out.push_str(&text[copied..i]);
                    copied = end;
                    i = end;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    out
}

fn extension_entry_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = skip_space(bytes, start + 1);
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.' | b'/')) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    i = skip_space(bytes, i);
    if bytes.get(i) != Some(&b']') {
        return None;
    }
    i = skip_space(bytes, i + 1);
    i = match bytes.get(i)? {
        b':' => skip_value(bytes, skip_space(bytes, i + 1)),
        b'{' | b'<' => skip_block(bytes, i),
        _ => return None,
    };
    let after = skip_space(bytes, i);
    if matches!(bytes.get(after), Some(b',') | Some(b';')) {
        i = after + 1;
    }
    Some(i)
}

fn skip_value(bytes: &[u8], mut i: usize) -> usize {
    match bytes.get(i) {
        Some(b'{') | Some(b'<') | Some(b'[') => skip_block(bytes, i),
        Some(b'"') | Some(b'\'') => {
            // adjacent literals concatenate
            loop {
                i = skip_string(bytes, i);
                let next = skip_space(bytes, i);
                if !matches!(bytes.get(next), Some(b'"') | Some(b'\'')) {
                    return i;
                }
                i = next;
            }
        }
        _ => {
            if bytes.get(i) == Some(&b'-') {
                i = skip_space(bytes, i + 1);
            }
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.' | b'+' | b'-')) {
                i += 1;
            }
            i
        }
    }
}

fn skip_block(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'#' => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'{' | b'<' | b'[' => depth += 1,
            b'}' | b'>' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    (i + 1).min(bytes.len())
}

fn skip_space(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else if bytes[i] == b'#' {
            i = skip_comment(bytes, i);
        } else {
            break;
        }
    }
    i
}

/// Resolves the options of a binary-decoded image against its own files.
///
/// Option bytes are re-encoded through the image's descriptors, which
/// rejects option payloads the declared extensions cannot read.
pub fn reparse_image(image: Image) -> Result<Image> {
    if image.is_reparsed() {
        return Ok(image);
    }
    let resolver = Resolver::for_image(&image)?;
    let descriptor = resolver.message(pb::IMAGE_MESSAGE_NAME)?;
    let message = DynamicMessage::decode(descriptor, image.to_pb(false).encode_to_vec().as_slice())?;
    let reparsed = Image::from_pb(pb::Image::decode(message.encode_to_vec().as_slice())?)?;
    Ok(reparsed.mark_reparsed())
}

/// Encodes an image.
///
/// With `as_file_descriptor_set` the image metadata is dropped and the
/// output is a plain `google.protobuf.FileDescriptorSet`.
pub fn marshal_image(marshaler: &Marshaler, image: &Image, as_file_descriptor_set: bool) -> Result<Vec<u8>> {
    let wire = image.to_pb(as_file_descriptor_set).encode_to_vec();
    if marshaler.encoding() == MessageEncoding::Binpb {
        return Ok(wire);
    }
    let resolver = Resolver::for_image(image)?;
    let name = if as_file_descriptor_set {
        FILE_DESCRIPTOR_SET_NAME
    } else {
        pb::IMAGE_MESSAGE_NAME
    };
    let message = DynamicMessage::decode(resolver.message(name)?, wire.as_slice())?;
    marshaler.marshal(&message)
}
