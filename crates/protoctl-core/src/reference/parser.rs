//! The `path#key=value,key=value` input grammar.
//!
//! The format is taken from the `format` option when present, otherwise
//! inferred from the path:
//!
//! | Path                                   | Format      |
//! |----------------------------------------|-------------|
//! | `-`                                    | message     |
//! | `/dev/null`                            | message     |
//! | `*.binpb`, `*.json`, `*.txtpb`, `*.yaml` | message   |
//! | `*.proto`                              | `protofile` |
//! | `*.tar`, `*.tar.gz`, `*.tgz`, `*.tar.zst` | `tar`    |
//! | `*.zip`                                | `zip`       |
//! | `*.git`, `git://...`, `ssh://...`      | `git`       |
//! | `registry.tld/owner/name[:ref]`        | `mod`       |
//! | anything else                          | `dir`       |

use super::{
    ArchiveType, Compression, DirRef, GitName, InputConfig, InputRef, MessageEncoding,
    MessagePath, MessageRef, ProtoFileRef, RefParser, Reference, SourceRef, DEV_NULL, STDIO,
};
use crate::error::{Error, Result};
use crate::module::ModuleRef;
use crate::normalpath;
use std::collections::BTreeMap;
use tracing::trace;

const DEFAULT_GIT_DEPTH: u32 = 1;
const DEFAULT_GIT_REF_DEPTH: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Dir,
    Git,
    Tar,
    Zip,
    ProtoFile,
    Mod,
    Message(MessageEncoding),
}

impl Format {
    fn parse(input: &str, value: &str) -> Result<Self> {
        match value {
            "dir" => Ok(Self::Dir),
            "git" => Ok(Self::Git),
            "tar" => Ok(Self::Tar),
            "zip" => Ok(Self::Zip),
            "protofile" => Ok(Self::ProtoFile),
            "mod" => Ok(Self::Mod),
            other => match other.parse::<MessageEncoding>() {
                Ok(encoding) => Ok(Self::Message(encoding)),
                Err(_) => Err(Error::malformed_input(
                    input,
                    format!(
                        "unknown format '{}', expected one of dir, git, tar, zip, protofile, mod, binpb, json, txtpb, yaml",
                        other
                    ),
                )),
            },
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::Git => "git",
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::ProtoFile => "protofile",
            Self::Mod => "mod",
            Self::Message(encoding) => encoding.as_str(),
        }
    }
}

/// The raw pieces of an input string
#[derive(Debug)]
struct RawInput<'a> {
    input: &'a str,
    path: String,
    options: BTreeMap<String, String>,
}

impl<'a> RawInput<'a> {
    fn split(input: &'a str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(Error::malformed_input(input, "input is empty"));
        }
        let (path, raw_options) = match input.split_once('#') {
            Some((path, raw_options)) => (path, Some(raw_options)),
            None => (input, None),
        };
        if path.is_empty() {
            return Err(Error::malformed_input(input, "path is empty"));
        }
        let mut options = BTreeMap::new();
        if let Some(raw_options) = raw_options {
            for pair in raw_options.split(',') {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    Error::malformed_input(input, format!("option '{}' must be key=value", pair))
                })?;
                if key.is_empty() || value.is_empty() {
                    return Err(Error::malformed_input(
                        input,
                        format!("option '{}' must be key=value", pair),
                    ));
                }
                if options.insert(key.to_string(), value.to_string()).is_some() {
                    return Err(Error::malformed_input(
                        input,
                        format!("duplicate option '{}'", key),
                    ));
                }
            }
        }
        Ok(Self {
            input,
            path: path.to_string(),
            options,
        })
    }

    fn take(&mut self, key: &str) -> Option<String> {
        self.options.remove(key)
    }

    fn take_bool(&mut self, key: &str) -> Result<bool> {
        match self.take(key).as_deref() {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(Error::malformed_input(
                self.input,
                format!("option '{}' must be true or false, got '{}'", key, other),
            )),
        }
    }

    fn take_u32(&mut self, key: &str) -> Result<Option<u32>> {
        self.take(key)
            .map(|value| {
                value.parse::<u32>().map_err(|_| {
                    Error::malformed_input(
                        self.input,
                        format!("option '{}' must be a non-negative integer, got '{}'", key, value),
                    )
                })
            })
            .transpose()
    }

    fn take_subdir(&mut self) -> Result<String> {
        match self.take("subdir") {
            Some(subdir) => normalpath::normalize_and_validate(&subdir),
            None => Ok(".".to_string()),
        }
    }

    /// Fails if any option was not consumed by the chosen format
    fn finish(self, format: Format) -> Result<()> {
        match self.options.keys().next() {
            Some(key) => Err(Error::malformed_input(
                self.input,
                format!("option '{}' is not valid for format {}", key, format.name()),
            )),
            None => Ok(()),
        }
    }
}

fn looks_like_module(path: &str) -> bool {
    if path.starts_with('.') || path.starts_with('/') {
        return false;
    }
    let parts: Vec<&str> = path.split('/').collect();
    parts.len() == 3 && parts[0].contains('.') && parts.iter().all(|p| !p.is_empty())
}

fn infer_format(path: &str) -> Format {
    if path == STDIO || path == DEV_NULL {
        return Format::Message(MessageEncoding::Binpb);
    }
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".tar")
        || lower.ends_with(".tar.gz")
        || lower.ends_with(".tgz")
        || lower.ends_with(".tar.zst")
    {
        return Format::Tar;
    }
    if lower.ends_with(".zip") {
        return Format::Zip;
    }
    if lower.ends_with(".git")
        || lower.starts_with("git://")
        || lower.starts_with("ssh://")
    {
        return Format::Git;
    }
    let ext = normalpath::ext(path);
    if ext == ".proto" {
        return Format::ProtoFile;
    }
    if let Some(encoding) = MessageEncoding::from_extension(ext) {
        return Format::Message(encoding);
    }
    if looks_like_module(path) {
        return Format::Mod;
    }
    Format::Dir
}

fn infer_compression(path: &str) -> Compression {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Compression::Gzip
    } else if lower.ends_with(".tar.zst") {
        Compression::Zstd
    } else {
        Compression::None
    }
}

fn message_path(path: &str) -> MessagePath {
    match path {
        STDIO => MessagePath::Stdio,
        DEV_NULL => MessagePath::Null,
        other => MessagePath::File(other.to_string()),
    }
}

fn build_message_ref(mut raw: RawInput<'_>, encoding: MessageEncoding) -> Result<MessageRef> {
    let format = Format::Message(encoding);
    let mut message_ref = MessageRef::new(message_path(&raw.path), encoding);
    if matches!(encoding, MessageEncoding::Json | MessageEncoding::Yaml) {
        message_ref.use_proto_names = raw.take_bool("use_proto_names")?;
        message_ref.use_enum_numbers = raw.take_bool("use_enum_numbers")?;
    }
    raw.finish(format)?;
    Ok(message_ref)
}

fn build_git_ref(mut raw: RawInput<'_>) -> Result<SourceRef> {
    let branch = raw.take("branch");
    let tag = raw.take("tag");
    let git_ref = raw.take("ref");
    let name = match (branch, tag, git_ref) {
        (None, None, None) => None,
        (Some(branch), None, None) => Some(GitName::Branch(branch)),
        (None, Some(tag), None) => Some(GitName::Tag(tag)),
        (None, None, Some(git_ref)) => Some(GitName::Ref(git_ref)),
        _ => {
            return Err(Error::malformed_input(
                raw.input,
                "only one of branch, tag and ref may be set",
            ))
        }
    };
    let default_depth = match name {
        Some(GitName::Ref(_)) => DEFAULT_GIT_REF_DEPTH,
        _ => DEFAULT_GIT_DEPTH,
    };
    let depth = raw.take_u32("depth")?.unwrap_or(default_depth);
    if depth == 0 {
        return Err(Error::malformed_input(raw.input, "depth must be positive"));
    }
    let recurse_submodules = raw.take_bool("recurse_submodules")?;
    let subdir = raw.take_subdir()?;
    let url = raw.path.clone();
    raw.finish(Format::Git)?;
    Ok(SourceRef::Git {
        url,
        name,
        depth,
        recurse_submodules,
        subdir,
    })
}

fn build_archive_ref(mut raw: RawInput<'_>, archive_type: ArchiveType) -> Result<SourceRef> {
    let format = match archive_type {
        ArchiveType::Tar => Format::Tar,
        ArchiveType::Zip => Format::Zip,
    };
    let compression = match archive_type {
        ArchiveType::Tar => match raw.take("compression") {
            Some(compression) => compression.parse()?,
            None => infer_compression(&raw.path),
        },
        ArchiveType::Zip => Compression::None,
    };
    let strip_components = raw.take_u32("strip_components")?.unwrap_or(0);
    let subdir = raw.take_subdir()?;
    let path = raw.path.clone();
    raw.finish(format)?;
    Ok(SourceRef::Archive {
        path,
        archive_type,
        compression,
        strip_components,
        subdir,
    })
}

fn build(mut raw: RawInput<'_>) -> Result<Reference> {
    let format = match raw.take("format") {
        Some(format) => Format::parse(raw.input, &format)?,
        None => infer_format(&raw.path),
    };
    trace!("classified '{}' as {}", raw.input, format.name());
    match format {
        Format::Dir => {
            let path = raw.path.clone();
            raw.finish(format)?;
            Ok(Reference::Source(SourceRef::Dir { path }))
        }
        Format::Git => build_git_ref(raw).map(Reference::Source),
        Format::Tar => build_archive_ref(raw, ArchiveType::Tar).map(Reference::Source),
        Format::Zip => build_archive_ref(raw, ArchiveType::Zip).map(Reference::Source),
        Format::ProtoFile => {
            let include_package_files = raw.take_bool("include_package_files")?;
            let path = raw.path.clone();
            raw.finish(format)?;
            Ok(Reference::ProtoFile(ProtoFileRef {
                path,
                include_package_files,
            }))
        }
        Format::Mod => {
            let module_ref: ModuleRef = raw
                .path
                .parse()
                .map_err(|e: Error| Error::malformed_input(raw.input, e.to_string()))?;
            raw.finish(format)?;
            Ok(Reference::Module(module_ref))
        }
        Format::Message(encoding) => build_message_ref(raw, encoding).map(Reference::Message),
    }
}

/// The default input grammar
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRefParser;

impl DefaultRefParser {
    /// Creates a parser
    pub fn new() -> Self {
        Self
    }
}

impl RefParser for DefaultRefParser {
    fn get_ref(&self, value: &str) -> Result<Reference> {
        build(RawInput::split(value)?)
    }

    fn get_dir_ref(&self, value: &str) -> Result<DirRef> {
        let mut raw = RawInput::split(value)?;
        if let Some(format) = raw.take("format") {
            if format != "dir" {
                return Err(Error::malformed_input(value, "expected a directory"));
            }
        }
        let path = raw.path.clone();
        raw.finish(Format::Dir)?;
        Ok(DirRef { path })
    }

    fn get_message_ref(&self, value: &str, default_encoding: MessageEncoding) -> Result<MessageRef> {
        let mut raw = RawInput::split(value)?;
        let encoding = match raw.take("format") {
            Some(format) => format.parse::<MessageEncoding>()?,
            None => MessageEncoding::from_extension(normalpath::ext(&raw.path))
                .unwrap_or(default_encoding),
        };
        build_message_ref(raw, encoding)
    }

    fn get_ref_for_input_config(&self, config: &InputConfig) -> Result<InputRef> {
        let locations = [
            (&config.directory, "dir"),
            (&config.module, "mod"),
            (&config.git_repo, "git"),
            (&config.tarball, "tar"),
            (&config.zip_archive, "zip"),
            (&config.proto_file, "protofile"),
            (&config.binary_image, "binpb"),
            (&config.json_image, "json"),
            (&config.text_image, "txtpb"),
            (&config.yaml_image, "yaml"),
        ];
        let mut set = locations
            .iter()
            .filter_map(|(path, format)| path.as_deref().map(|path| (path, *format)));
        let (path, format) = set.next().ok_or_else(|| {
            Error::malformed_input("<input config>", "exactly one input location must be set")
        })?;
        if set.next().is_some() {
            return Err(Error::malformed_input(
                "<input config>",
                "exactly one input location must be set",
            ));
        }

        let mut options = BTreeMap::new();
        options.insert("format".to_string(), format.to_string());
        let string_options = [
            ("branch", &config.branch),
            ("tag", &config.tag),
            ("ref", &config.git_ref),
            ("compression", &config.compression),
            ("subdir", &config.subdir),
        ];
        for (key, value) in string_options {
            if let Some(value) = value {
                options.insert(key.to_string(), value.clone());
            }
        }
        if let Some(depth) = config.depth {
            options.insert("depth".to_string(), depth.to_string());
        }
        if let Some(strip_components) = config.strip_components {
            options.insert("strip_components".to_string(), strip_components.to_string());
        }
        if config.recurse_submodules {
            options.insert("recurse_submodules".to_string(), "true".to_string());
        }
        if config.include_package_files {
            options.insert("include_package_files".to_string(), "true".to_string());
        }
        let raw = RawInput {
            input: path,
            path: path.to_string(),
            options,
        };
        build(raw).map(InputRef::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::SourceOrModuleRef;
    use pretty_assertions::assert_eq;

    fn parse(value: &str) -> Reference {
        DefaultRefParser.get_ref(value).unwrap()
    }

    fn parse_err(value: &str) -> String {
        match DefaultRefParser.get_ref(value) {
            Err(err @ Error::MalformedInput { .. }) => err.to_string(),
            other => panic!("expected malformed input for {}, got {:?}", value, other),
        }
    }

    #[test]
    fn test_infers_formats() {
        assert_eq!(
            parse("proto"),
            Reference::Source(SourceRef::Dir {
                path: "proto".to_string()
            })
        );
        assert_eq!(
            parse("foo/bar.proto#include_package_files=true"),
            Reference::ProtoFile(ProtoFileRef {
                path: "foo/bar.proto".to_string(),
                include_package_files: true,
            })
        );
        assert!(matches!(parse("buf.build/acme/weather:main"), Reference::Module(r) if r.reference() == Some("main")));
        assert!(matches!(parse("image.json"), Reference::Message(r) if r.encoding == MessageEncoding::Json));
        assert!(matches!(parse("-"), Reference::Message(r) if r.path == MessagePath::Stdio));
        assert!(matches!(parse("/dev/null"), Reference::Message(r) if r.is_null()));
        assert!(matches!(
            parse("dist.tar.gz#strip_components=1"),
            Reference::Source(SourceRef::Archive {
                compression: Compression::Gzip,
                strip_components: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_relative_dirs_are_not_modules() {
        assert!(matches!(parse("./a.b/c/d"), Reference::Source(_)));
        assert!(matches!(parse("proto/acme/v1"), Reference::Source(_)));
    }

    #[test]
    fn test_git_options() {
        match parse("https://github.com/acme/apis.git#tag=v1.0.0,subdir=proto/") {
            Reference::Source(SourceRef::Git {
                name, depth, subdir, ..
            }) => {
                assert_eq!(name, Some(GitName::Tag("v1.0.0".to_string())));
                assert_eq!(depth, 1);
                assert_eq!(subdir, "proto");
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("https://github.com/acme/apis.git#ref=abc123") {
            Reference::Source(SourceRef::Git { depth, .. }) => assert_eq!(depth, 50),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_err("x.git#branch=a,tag=b").contains("only one of"));
    }

    #[test]
    fn test_format_override() {
        assert!(matches!(
            parse("weird-name#format=yaml,use_enum_numbers=true"),
            Reference::Message(MessageRef {
                encoding: MessageEncoding::Yaml,
                use_enum_numbers: true,
                ..
            })
        ));
        assert!(matches!(parse("a.proto#format=dir"), Reference::Source(_)));
    }

    #[test]
    fn test_malformed_inputs() {
        parse_err("");
        parse_err("#format=dir");
        parse_err("proto#format");
        parse_err("proto#format=dir,format=dir");
        parse_err("proto#format=xml");
        assert!(parse_err("proto#use_proto_names=true").contains("not valid for format dir"));
        assert!(parse_err("image.binpb#use_proto_names=true").contains("not valid"));
        parse_err("a.proto#include_package_files=yes");
    }

    #[test]
    fn test_every_non_empty_string_classifies() {
        for value in ["x", "a b", "::", "...", "buf.build/x", "a/b/c/d.e"] {
            assert!(DefaultRefParser.get_ref(value).is_ok(), "{}", value);
        }
    }

    #[test]
    fn test_message_ref_default_encoding() {
        let message_ref = DefaultRefParser
            .get_message_ref("out", MessageEncoding::Json)
            .unwrap();
        assert_eq!(message_ref.encoding, MessageEncoding::Json);
        let message_ref = DefaultRefParser
            .get_message_ref("out.txtpb", MessageEncoding::Json)
            .unwrap();
        assert_eq!(message_ref.encoding, MessageEncoding::Txtpb);
        assert!(matches!(
            DefaultRefParser.get_message_ref("out#format=xml", MessageEncoding::Json),
            Err(Error::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_dir_ref() {
        assert_eq!(DefaultRefParser.get_dir_ref("proto").unwrap().path, "proto");
        assert!(DefaultRefParser.get_dir_ref("proto#format=git").is_err());
    }

    #[test]
    fn test_input_config() {
        let config: InputConfig = serde_yaml::from_str(
            "git_repo: https://github.com/acme/apis\nbranch: main\nsubdir: proto\n",
        )
        .unwrap();
        match DefaultRefParser.get_ref_for_input_config(&config).unwrap() {
            InputRef::SourceOrModule(SourceOrModuleRef::Source(SourceRef::Git {
                name,
                subdir,
                ..
            })) => {
                assert_eq!(name, Some(GitName::Branch("main".to_string())));
                assert_eq!(subdir, "proto");
            }
            other => panic!("unexpected {:?}", other),
        }

        let both = InputConfig {
            directory: Some("a".to_string()),
            module: Some("buf.build/a/b".to_string()),
            ..Default::default()
        };
        assert!(DefaultRefParser.get_ref_for_input_config(&both).is_err());
        assert!(DefaultRefParser
            .get_ref_for_input_config(&InputConfig::default())
            .is_err());

        let image = InputConfig {
            binary_image: Some("image.bin".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DefaultRefParser.get_ref_for_input_config(&image).unwrap(),
            InputRef::Message(_)
        ));
    }
}
