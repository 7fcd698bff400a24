use super::{BuildOptions, ImageBuilder};
use crate::annotation::{FileAnnotation, FileAnnotationSet};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::{pb, Image, ImageFile};
use crate::module::{FileInfo, ModuleReadBucket};
use crate::storage::ReadBucket;
use miette::Diagnostic;
use prost::Message;
use protox::file::{File, FileResolver, GoogleFileResolver};
use protox::Compiler;
use std::path::Path;
use tracing::{debug, trace};

/// Serves imports from a module read bucket, then from the bundled
/// well-known types
struct BucketFileResolver {
    bucket: ModuleReadBucket,
    google: GoogleFileResolver,
}

impl FileResolver for BucketFileResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        let name = path.to_str()?;
        self.bucket.file_info(name).map(|_| name.to_string())
    }

    fn open_file(&self, name: &str) -> std::result::Result<File, protox::Error> {
        if self.bucket.file_info(name).is_none() {
            return self.google.open_file(name);
        }
        trace!("compiler opens {}", name);
        let data = self.bucket.get(name).map_err(protox::Error::new)?;
        let source = std::str::from_utf8(&data).map_err(protox::Error::new)?;
        File::from_source(name, source)
    }
}

/// An [`ImageBuilder`] backed by the `protox` compiler
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoxImageBuilder;

impl ProtoxImageBuilder {
    /// Creates a builder
    pub fn new() -> Self {
        Self
    }
}

impl ImageBuilder for ProtoxImageBuilder {
    fn build(&self, ctx: &Context, bucket: &ModuleReadBucket, options: &BuildOptions) -> Result<Image> {
        ctx.check()?;
        let targets = bucket.target_file_infos();
        if targets.is_empty() {
            return Err(Error::NoTargetProtoFiles);
        }

        let mut compiler = Compiler::with_file_resolver(BucketFileResolver {
            bucket: bucket.clone(),
            google: GoogleFileResolver::new(),
        });
        compiler
            .include_imports(true)
            .include_source_info(!options.exclude_source_info);

        let mut annotations = Vec::new();
        for info in &targets {
            ctx.check()?;
            if let Err(err) = compiler.open_file(&info.path) {
                annotations.push(compile_annotation(bucket, info, &err));
            }
        }
        if let Some(set) = FileAnnotationSet::new(annotations) {
            return Err(Error::FileAnnotations(set));
        }
        ctx.check()?;

        let encoded = compiler.encode_file_descriptor_set();
        let files = pb::Image::decode(encoded.as_slice())?
            .file
            .into_iter()
            .map(|descriptor| {
                let file = ImageFile::new(descriptor)?;
                Ok(match bucket.file_info(file.path()) {
                    Some(info) => {
                        let syntax_unspecified = !declares_syntax(&bucket.get(&info.path)?);
                        file.with_is_import(!info.is_target)
                            .with_external_path(info.external_path.clone())
                            .with_module(info.module_full_name.clone(), info.commit_id.clone())
                            .with_syntax_unspecified(syntax_unspecified)
                    }
                    None => file.with_is_import(true),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "built image with {} files for {} targets",
            files.len(),
            targets.len()
        );
        Image::new(files)
    }
}

fn declares_syntax(source: &[u8]) -> bool {
    String::from_utf8_lossy(source).lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("syntax") || line.starts_with("edition")
    })
}

/// Turns a compiler error into an annotation.
///
/// The error names the file it occurred in, which may be an import of the
/// file that was opened. Its first labelled span gives the location.
fn compile_annotation(bucket: &ModuleReadBucket, opened: &FileInfo, err: &protox::Error) -> FileAnnotation {
    let path = err.file().unwrap_or(&opened.path);
    let external_path = match bucket.file_info(path) {
        Some(info) => info.external_path.clone(),
        None => path.to_string(),
    };
    let annotation = FileAnnotation::new(external_path, "COMPILE", err.to_string());
    let offset = err.labels().and_then(|mut labels| labels.next()).map(|label| label.offset());
    match (offset, bucket.get(path)) {
        (Some(offset), Ok(source)) => {
            let (line, column) = line_column(&source, offset);
            annotation.at(line, column)
        }
        _ => annotation,
    }
}

/// 1-based line and column of a byte offset
fn line_column(source: &[u8], offset: usize) -> (u32, u32) {
    let before = &source[..offset.min(source.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    let column = String::from_utf8_lossy(&before[line_start..]).chars().count() + 1;
    (line as u32, column as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, ModuleFullName};
    use crate::storage::MemBucket;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn module(id: &str, files: &[(&'static str, &'static str)]) -> Module {
        Module::new(id, Arc::new(MemBucket::from_files(files.iter().copied())))
    }

    fn build(modules: Vec<Module>, options: BuildOptions) -> Result<Image> {
        let ctx = Context::background();
        let bucket = ModuleReadBucket::new(&ctx, modules)?;
        ProtoxImageBuilder::new().build(&ctx, &bucket, &options)
    }

    #[test]
    fn test_build_marks_imports() {
        let dep_name: ModuleFullName = "buf.test/acme/dep".parse().unwrap();
        let dep = module("dep", &[("dep/d.proto", "syntax = \"proto3\";\npackage dep;\nmessage D {}\n")])
            .with_full_name(Some(dep_name.clone()))
            .with_local(false)
            .with_target(false);
        let local = module(
            ".",
            &[(
                "acme/a.proto",
                "syntax = \"proto3\";\npackage acme;\nimport \"dep/d.proto\";\nimport \"google/protobuf/timestamp.proto\";\nmessage A { dep.D d = 1; google.protobuf.Timestamp t = 2; }\n",
            )],
        );
        let image = build(vec![local, dep], BuildOptions::default()).unwrap();

        let mut paths: Vec<&str> = image.files().iter().map(ImageFile::path).collect();
        paths.sort();
        assert_eq!(paths, vec!["acme/a.proto", "dep/d.proto", "google/protobuf/timestamp.proto"]);
        assert!(!image.file("acme/a.proto").unwrap().is_import());
        let d = image.file("dep/d.proto").unwrap();
        assert!(d.is_import());
        assert_eq!(d.module_full_name(), Some(&dep_name));
        assert!(image.file("google/protobuf/timestamp.proto").unwrap().is_import());
        assert!(image.file("acme/a.proto").unwrap().descriptor().source_code_info.is_some());
        // imports come before their importers
        let index = |path: &str| image.files().iter().position(|f| f.path() == path).unwrap();
        assert!(index("dep/d.proto") < index("acme/a.proto"));
    }

    #[test]
    fn test_build_exclude_source_info_and_syntax() {
        let local = module(".", &[("a.proto", "package a;\nmessage A {}\n")]);
        let image = build(vec![local], BuildOptions { exclude_source_info: true }).unwrap();
        let a = image.file("a.proto").unwrap();
        assert!(a.descriptor().source_code_info.is_none());
        assert!(a.is_syntax_unspecified());
    }

    #[test]
    fn test_build_keeps_custom_options() {
        let local = module(
            ".",
            &[
                (
                    "acme/options.proto",
                    "syntax = \"proto2\";\npackage acme;\nimport \"google/protobuf/descriptor.proto\";\nextend google.protobuf.FileOptions { optional string owner = 50000; }\n",
                ),
                (
                    "acme/b.proto",
                    "syntax = \"proto3\";\npackage acme;\nimport \"acme/options.proto\";\noption (acme.owner) = \"team\";\nmessage B {}\n",
                ),
            ],
        );
        let image = build(vec![local], BuildOptions::default()).unwrap();
        let options = image.file("acme/b.proto").unwrap().descriptor().options.clone().unwrap();
        assert!(options.windows(4).any(|w| w == b"team"));
    }

    #[test]
    fn test_build_errors_are_annotations() {
        let local = module(".", &[("bad.proto", "syntax = \"proto3\";\nmessage Bad { Missing m = 1; }\n")]);
        match build(vec![local], BuildOptions::default()) {
            Err(Error::FileAnnotations(set)) => {
                let annotation = &set.annotations()[0];
                assert_eq!(set.annotations().len(), 1);
                assert_eq!(annotation.kind, "COMPILE");
                assert_eq!(annotation.path, "bad.proto");
                assert_eq!((annotation.start_line, annotation.start_column), (2, 15));
                assert!(annotation.message.contains("Missing"));
            }
            other => panic!("expected annotations, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_syntax_errors_have_locations() {
        let local = module(".", &[("bad.proto", "syntax = \"proto3\";\n\nmessage Bad {\n  int32 = 1;\n}\n")]);
        match build(vec![local], BuildOptions::default()) {
            Err(Error::FileAnnotations(set)) => {
                let annotation = &set.annotations()[0];
                assert_eq!(annotation.path, "bad.proto");
                assert_eq!(annotation.start_line, 4);
                assert!(annotation.start_column > 0);
            }
            other => panic!("expected annotations, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_line_column() {
        let source = "ab\ncdé\nf".as_bytes();
        assert_eq!(line_column(source, 0), (1, 1));
        assert_eq!(line_column(source, 4), (2, 2));
        // é is two bytes
        assert_eq!(line_column(source, 8), (3, 1));
        assert_eq!(line_column(source, 99), (3, 2));
    }

    #[test]
    fn test_build_without_targets() {
        let dep = module(".", &[("a.proto", "syntax = \"proto3\";\n")]).with_target(false);
        assert!(matches!(build(vec![dep], BuildOptions::default()), Err(Error::NoTargetProtoFiles)));
    }

    #[test]
    fn test_declares_syntax() {
        assert!(declares_syntax(b"// x\nsyntax = \"proto3\";"));
        assert!(declares_syntax(b"edition = \"2023\";"));
        assert!(!declares_syntax(b"package a;"));
    }
}
