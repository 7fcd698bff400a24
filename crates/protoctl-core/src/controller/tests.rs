use super::*;
use crate::bufio::{BucketTargeting, ReadCloser, WriteCloser};
use crate::config::BufLockFile;
use crate::image::testing::{file, image_file};
use crate::module::{MemModuleProvider, ModuleFullName, ModuleKey, ModuleRef};
use crate::reference::DirRef;
use crate::storage::{MemBucket, ReadBucketCloser, ReadWriteBucket};
use pretty_assertions::assert_eq;
use prost_reflect::{ReflectMessage, Value};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

const BUF_YAML: &str = "version: v2
modules:
  - path: proto
  - path: vendor
lint:
  use: [MINIMAL]
plugins:
  - plugin: buf-plugin-x
policies:
  - policy: acme-policy
";

const A_PROTO: &str = "syntax = \"proto3\";
package acme;
import \"acme/b.proto\";
message A { B b = 1; string note = 2; }
";
const B_PROTO: &str = "syntax = \"proto3\";\npackage acme;\nmessage B { int32 id = 1; }\n";
const C_PROTO: &str = "syntax = \"proto2\";\npackage acme;\nmessage C { required string name = 1; }\n";
const V_PROTO: &str = "syntax = \"proto3\";\npackage v;\nmessage V {}\n";

fn write(root: &Path, path: &str, content: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

struct Fixture {
    temp: TempDir,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            write(temp.path(), path, content);
        }
        Self {
            temp,
            stdout: Arc::new(Mutex::new(Vec::new())),
            stderr: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn workspace() -> Self {
        Self::new(&[
            ("buf.yaml", BUF_YAML),
            ("proto/acme/a.proto", A_PROTO),
            ("proto/acme/b.proto", B_PROTO),
            ("proto/acme/c.proto", C_PROTO),
            ("vendor/v/v.proto", V_PROTO),
        ])
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }

    fn builder(&self) -> ControllerBuilder {
        Controller::builder(
            Container::new(self.temp.path())
                .with_stdout(self.stdout.clone())
                .with_stderr(self.stderr.clone()),
        )
    }

    fn controller(&self) -> Controller {
        self.builder().build()
    }

    fn stderr(&self) -> String {
        String::from_utf8(self.stderr.lock().unwrap().clone()).unwrap()
    }
}

fn target_paths(image: &Image) -> Vec<String> {
    let mut paths: Vec<String> = image
        .files()
        .iter()
        .filter(|file| !file.is_import())
        .map(|file| file.path().to_string())
        .collect();
    paths.sort();
    paths
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn dep_registry() -> (ModuleFullName, Arc<MemModuleProvider>) {
    let name: ModuleFullName = "buf.test/acme/dep".parse().unwrap();
    let provider = MemModuleProvider::new().with_module(
        name.clone(),
        MemBucket::from_files([("dep/d.proto", "syntax = \"proto3\";\npackage dep;\nmessage D {}\n")]),
        vec![],
    );
    (name, Arc::new(provider))
}

#[derive(Default)]
struct CountingWriter {
    calls: AtomicUsize,
    fail: bool,
}

impl Writer for CountingWriter {
    fn put_message_file(
        &self,
        _ctx: &Context,
        _container: &Container,
        _message_ref: &MessageRef,
    ) -> Result<Box<dyn WriteCloser>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestWriteCloser { fail: self.fail }))
    }
}

struct TestWriteCloser {
    fail: bool,
}

impl io::Write for TestWriteCloser {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteCloser for TestWriteCloser {
    fn close(self: Box<Self>) -> Result<()> {
        if self.fail {
            return Err(Error::internal("close failed"));
        }
        Ok(())
    }
}

/// Reads like [`LocalReader`] but every source bucket fails to close
struct FailingCloseReader(LocalReader);

struct FailingCloser(Box<dyn ReadBucketCloser>);

impl ReadBucketCloser for FailingCloser {
    fn bucket(&self) -> Arc<dyn ReadBucket> {
        self.0.bucket()
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.0.close()?;
        Err(Error::internal("bucket close failed"))
    }
}

impl Reader for FailingCloseReader {
    fn get_source_read_bucket_closer(
        &self,
        ctx: &Context,
        container: &Container,
        bucket_ref: &BucketRef,
        options: &BucketOptions,
    ) -> Result<(Box<dyn ReadBucketCloser>, BucketTargeting)> {
        let (closer, targeting) = self.0.get_source_read_bucket_closer(ctx, container, bucket_ref, options)?;
        Ok((Box::new(FailingCloser(closer)), targeting))
    }

    fn get_dir_read_write_bucket(
        &self,
        ctx: &Context,
        container: &Container,
        dir_ref: &DirRef,
    ) -> Result<Arc<dyn ReadWriteBucket>> {
        self.0.get_dir_read_write_bucket(ctx, container, dir_ref)
    }

    fn get_module_key(&self, ctx: &Context, container: &Container, module_ref: &ModuleRef) -> Result<ModuleKey> {
        self.0.get_module_key(ctx, container, module_ref)
    }

    fn get_message_file(
        &self,
        ctx: &Context,
        container: &Container,
        message_ref: &MessageRef,
    ) -> Result<Box<dyn ReadCloser>> {
        self.0.get_message_file(ctx, container, message_ref)
    }
}

#[test]
fn test_every_input_kind_resolves() {
    let fixture = Fixture::workspace();
    let (_, registry) = dep_registry();
    let controller = fixture.builder().with_registry(registry).build();
    let ctx = Context::background();
    let options = FunctionOptions::new();

    let dir = controller.get_image(&ctx, "proto", &options).unwrap();
    assert_eq!(target_paths(&dir), strings(&["acme/a.proto", "acme/b.proto", "acme/c.proto"]));

    let proto_file = controller.get_image(&ctx, "proto/acme/a.proto", &options).unwrap();
    assert_eq!(target_paths(&proto_file), strings(&["acme/a.proto"]));
    assert!(proto_file.file("acme/b.proto").unwrap().is_import());

    let module = controller.get_image(&ctx, "buf.test/acme/dep", &options).unwrap();
    assert_eq!(target_paths(&module), strings(&["dep/d.proto"]));

    for output in ["image.binpb", "image.json", "image.txtpb", "image.yaml"] {
        controller.put_image(&ctx, output, &dir, &options).unwrap();
        let decoded = controller.get_image(&ctx, output, &options).unwrap();
        assert_eq!(target_paths(&decoded), target_paths(&dir), "{}", output);
    }

    assert!(matches!(
        controller.get_image(&ctx, "/dev/null", &options),
        Err(Error::MalformedInput { .. })
    ));
    assert!(matches!(
        controller.get_image(&ctx, "https://example.com/acme/apis.git", &options),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_module_input_without_registry_is_unsupported() {
    let fixture = Fixture::workspace();
    let result = fixture
        .controller()
        .get_workspace(&Context::background(), "buf.test/acme/dep", &FunctionOptions::new());
    assert!(matches!(result, Err(Error::Unsupported(_))));
}

#[test]
fn test_target_paths_are_relative_to_the_working_directory() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let ctx = Context::background();
    let options = FunctionOptions::new().with_target_paths(strings(&["proto/acme/a.proto"]), vec![]);

    let from_root = controller.get_image(&ctx, ".", &options).unwrap();
    let from_module = controller.get_image(&ctx, "proto", &options).unwrap();
    let from_file = controller
        .get_image(&ctx, "proto/acme/a.proto", &FunctionOptions::new())
        .unwrap();
    assert_eq!(target_paths(&from_root), strings(&["acme/a.proto"]));
    assert_eq!(target_paths(&from_module), target_paths(&from_root));
    assert_eq!(target_paths(&from_file), target_paths(&from_root));

    let excluded = controller
        .get_image(
            &ctx,
            "proto",
            &FunctionOptions::new().with_target_paths(vec![], strings(&["proto/acme/c.proto"])),
        )
        .unwrap();
    assert_eq!(target_paths(&excluded), strings(&["acme/a.proto", "acme/b.proto"]));

    let missing = controller.get_image(
        &ctx,
        ".",
        &FunctionOptions::new().with_target_paths(strings(&["proto/acme/missing.proto"]), vec![]),
    );
    assert!(matches!(missing, Err(Error::PathsNotFound(_))));
}

#[test]
fn test_proto_file_input_rejects_path_flags() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let ctx = Context::background();

    let with_path = controller.get_image(
        &ctx,
        "proto/acme/a.proto",
        &FunctionOptions::new().with_target_paths(strings(&["proto/acme"]), vec![]),
    );
    assert!(matches!(with_path, Err(Error::InvalidFlagCombination(msg)) if msg.contains("--path")));

    let with_exclude = controller.get_image(
        &ctx,
        "proto/acme/a.proto",
        &FunctionOptions::new().with_target_paths(vec![], strings(&["proto/acme/b.proto"])),
    );
    assert!(matches!(with_exclude, Err(Error::InvalidFlagCombination(msg)) if msg.contains("--exclude-path")));
}

#[test]
fn test_filters_apply_in_order() {
    let image = Image::new(vec![
        image_file(file("b.proto", "acme", &[], &[("B", &[])]), true),
        image_file(file("a.proto", "acme", &["b.proto"], &[("A", &[("b", ".acme.B")])]), false),
        image_file(file("c.proto", "acme", &[], &[("C", &[])]), false),
    ])
    .unwrap();

    let by_path = FunctionOptions::new().with_target_paths(strings(&["a.proto"]), vec![]);
    let filtered = filter_image(image.clone(), &by_path, ImageProvenance::Message).unwrap();
    assert_eq!(target_paths(&filtered), strings(&["a.proto"]));
    assert!(filtered.file("b.proto").unwrap().is_import());
    assert!(filtered.file("c.proto").is_none());

    // an import dropped first stays dropped
    let filtered = filter_image(
        image.clone(),
        &by_path.clone().with_image_exclude_imports(true),
        ImageProvenance::Message,
    )
    .unwrap();
    let paths: Vec<&str> = filtered.files().iter().map(|file| file.path()).collect();
    assert_eq!(paths, vec!["a.proto"]);

    let by_type = FunctionOptions::new().with_image_types(strings(&["acme.C"]));
    let filtered = filter_image(image, &by_type, ImageProvenance::Workspace).unwrap();
    assert!(filtered.file("c.proto").is_some());
    assert!(filtered.file("a.proto").is_none());
}

#[test]
fn test_workspace_images_are_not_path_filtered_twice() {
    let image = Image::new(vec![
        image_file(file("a.proto", "acme", &[], &[("A", &[])]), false),
        image_file(file("b.proto", "acme", &[], &[("B", &[])]), false),
    ])
    .unwrap();
    // caller paths are relative to the working directory, not the image
    let options = FunctionOptions::new().with_target_paths(strings(&["proto/a.proto"]), vec![]);

    let from_workspace = filter_image(image.clone(), &options, ImageProvenance::Workspace).unwrap();
    assert_eq!(target_paths(&from_workspace), strings(&["a.proto", "b.proto"]));
    assert!(matches!(
        filter_image(image, &options, ImageProvenance::Message),
        Err(Error::NoTargetProtoFiles)
    ));
}

#[test]
fn test_decoded_images_honor_paths_and_types() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let ctx = Context::background();
    let image = controller.get_image(&ctx, "proto", &FunctionOptions::new()).unwrap();
    controller.put_image(&ctx, "image.binpb", &image, &FunctionOptions::new()).unwrap();

    let by_path = controller
        .get_image(
            &ctx,
            "image.binpb",
            &FunctionOptions::new().with_target_paths(strings(&["acme/a.proto"]), vec![]),
        )
        .unwrap();
    assert_eq!(target_paths(&by_path), strings(&["acme/a.proto"]));
    assert!(by_path.file("acme/b.proto").unwrap().is_import());

    let by_type = controller
        .get_image(
            &ctx,
            "image.binpb",
            &FunctionOptions::new()
                .with_image_types(strings(&["acme.B"]))
                .with_image_exclude_source_info(true),
        )
        .unwrap();
    assert!(by_type.file("acme/b.proto").is_some());
    assert!(by_type.file("acme/c.proto").is_none());
    assert!(by_type.files().iter().all(|file| file.descriptor().source_code_info.is_none()));
}

#[test]
fn test_messages_resolve_against_the_image() {
    let fixture = Fixture::workspace();
    write(fixture.path(), "a.yaml", "b:\n  id: 3\nnote: hi\n");
    let controller = fixture.controller();
    let ctx = Context::background();
    let options = FunctionOptions::new();
    let schema = controller.get_image(&ctx, "proto", &options).unwrap();

    let (message, encoding) = controller
        .get_message(&ctx, &schema, "a.yaml", "acme.A", MessageEncoding::Binpb, &options)
        .unwrap();
    assert_eq!(encoding, MessageEncoding::Yaml);
    assert_eq!(
        message.get_field_by_name("note").unwrap().into_owned(),
        Value::String("hi".to_string())
    );

    controller
        .put_message(&ctx, "a.json", &message, MessageEncoding::Binpb)
        .unwrap();
    let written: serde_json::Value = serde_json::from_slice(&fs::read(fixture.path().join("a.json")).unwrap()).unwrap();
    assert_eq!(written, serde_json::json!({"b": {"id": 3}, "note": "hi"}));

    let (empty, _) = controller
        .get_message(&ctx, &schema, "/dev/null", "acme.A", MessageEncoding::Json, &options)
        .unwrap();
    assert_eq!(empty.descriptor().full_name(), schema_message(&schema, "acme.A").full_name());
    assert_eq!(empty.fields().count(), 0);

    assert!(matches!(
        controller.get_message(&ctx, &schema, "a.yaml", "acme.Missing", MessageEncoding::Binpb, &options),
        Err(Error::TypeNotFound(_))
    ));
}

fn schema_message(schema: &Image, name: &str) -> prost_reflect::MessageDescriptor {
    Resolver::for_image(schema).unwrap().message(name).unwrap()
}

#[test]
fn test_message_validation() {
    let fixture = Fixture::workspace();
    write(fixture.path(), "c.yaml", "{}\n");
    write(fixture.path(), "c.json", "{}");
    let controller = fixture.controller();
    let ctx = Context::background();
    let schema = controller.get_image(&ctx, "proto", &FunctionOptions::new()).unwrap();
    let validating = FunctionOptions::new().with_message_validation(true);

    for input in ["c.yaml", "c.json"] {
        assert!(controller
            .get_message(&ctx, &schema, input, "acme.C", MessageEncoding::Binpb, &FunctionOptions::new())
            .is_ok());
        assert!(
            matches!(
                controller.get_message(&ctx, &schema, input, "acme.C", MessageEncoding::Binpb, &validating),
                Err(Error::Validation(_))
            ),
            "{}",
            input
        );
    }
}

#[test]
fn test_modules_without_targets_are_skipped() {
    let fixture = Fixture::new(&[
        ("buf.yaml", "version: v2\nmodules:\n  - path: proto\n  - path: docs\n"),
        ("proto/acme/b.proto", B_PROTO),
        ("docs/README.md", "# docs\n"),
    ]);
    let controller = fixture.controller();
    let ctx = Context::background();

    let images = controller
        .get_target_image_with_configs(&ctx, ".", &FunctionOptions::new())
        .unwrap();
    let ids: Vec<&str> = images.iter().map(ImageWithConfig::module_opaque_id).collect();
    assert_eq!(ids, vec!["proto"]);

    let only_docs = controller.get_target_image_with_configs(&ctx, "docs", &FunctionOptions::new());
    assert!(matches!(only_docs, Err(Error::NoTargetProtoFiles)));
}

#[test]
fn test_target_images_carry_module_configs() {
    let fixture = Fixture::workspace();
    let ctx = Context::background();
    for parallel in [false, true] {
        let controller = fixture.builder().with_parallel(parallel).build();
        let (images, client) = controller
            .get_target_image_with_configs_and_check_client(&ctx, ".", &FunctionOptions::new())
            .unwrap();
        let ids: Vec<&str> = images.iter().map(ImageWithConfig::module_opaque_id).collect();
        assert_eq!(ids, vec!["proto", "vendor"]);
        assert_eq!(target_paths(images[1].image()), strings(&["v/v.proto"]));
        for image in &images {
            assert_eq!(image.lint_config().use_ids, strings(&["MINIMAL"]));
        }
        let plugins: Vec<&str> = client.plugin_configs().iter().map(|p| p.name.as_str()).collect();
        let policies: Vec<&str> = client.policy_configs().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(plugins, vec!["buf-plugin-x"]);
        assert_eq!(policies, vec!["acme-policy"]);
    }
}

#[test]
fn test_failing_module_error_wins_over_cancelled_siblings() {
    for parallel in [false, true] {
        let fixture = Fixture::new(&[
            (
                "buf.yaml",
                "version: v2\nmodules:\n  - path: proto\n  - path: broken\n  - path: vendor\n",
            ),
            ("proto/acme/b.proto", B_PROTO),
            ("broken/bad/bad.proto", "syntax = \"proto3\";\nmessage Bad { Missing m = 1; }\n"),
            ("vendor/v/v.proto", V_PROTO),
        ]);
        let controller = fixture.builder().with_parallel(parallel).build();

        let result = controller.get_target_image_with_configs(&Context::background(), ".", &FunctionOptions::new());
        assert!(
            matches!(result, Err(Error::FileAnnotationsReported)),
            "parallel={}: {:?}",
            parallel,
            result.map(|images| images.len())
        );
        assert_eq!(fixture.stderr().matches("bad.proto").count(), 1, "parallel={}", parallel);
    }
}

#[test]
fn test_target_image_for_decoded_input_uses_working_directory_config() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let ctx = Context::background();
    let image = controller.get_image(&ctx, "proto", &FunctionOptions::new()).unwrap();
    controller
        .put_image(&ctx, "image.binpb", &image, &FunctionOptions::new())
        .unwrap();

    let images = controller
        .get_target_image_with_configs(&ctx, "image.binpb", &FunctionOptions::new())
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].module_opaque_id(), "");
    assert!(images[0].module_full_name().is_none());
    assert_eq!(images[0].lint_config().use_ids, strings(&["MINIMAL"]));
    assert_eq!(images[0].plugin_configs().len(), 1);

    let overridden = controller
        .get_target_image_with_configs(
            &ctx,
            "image.binpb",
            &FunctionOptions::new().with_config_override("version: v1\nlint:\n  use: [BASIC]\n"),
        )
        .unwrap();
    assert_eq!(overridden[0].lint_config().use_ids, strings(&["BASIC"]));
    assert!(overridden[0].plugin_configs().is_empty());
}

#[test]
fn test_importable_files_include_well_known_types() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let infos = controller
        .get_importable_image_file_infos(&Context::background(), "proto", &FunctionOptions::new())
        .unwrap();
    let paths: Vec<&str> = infos.iter().map(|info| info.path.as_str()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
    assert!(paths.contains(&"google/protobuf/timestamp.proto"));
    assert!(paths.contains(&"v/v.proto"));

    let info = |path: &str| infos.iter().find(|info| info.path == path).unwrap();
    assert!(!info("acme/a.proto").is_import);
    assert!(info("v/v.proto").is_import);
    assert!(info("google/protobuf/timestamp.proto").is_import);
}

#[test]
fn test_unconfigured_imports_are_reported_once_per_import() {
    let ctx = Context::background();
    let (name, registry) = dep_registry();
    let key = registry.get_module_key(&ctx, &ModuleRef::new(name, None)).unwrap();
    let importer = "syntax = \"proto3\";\npackage acme;\nimport \"dep/d.proto\";\nmessage A { dep.D d = 1; }\n";
    let fixture = Fixture::new(&[
        ("buf.yaml", "version: v2\nmodules:\n  - path: proto\n"),
        ("proto/acme/a.proto", importer),
        ("proto/acme/b.proto", "syntax = \"proto3\";\npackage acme;\nimport \"dep/d.proto\";\nmessage B { dep.D d = 1; }\n"),
    ]);
    config::put_buf_lock_file(
        &OsBucket::new(fixture.path()),
        ".",
        &BufLockFile::new(FileVersion::V2, vec![key]),
    )
    .unwrap();
    let controller = fixture.builder().with_registry(registry).build();

    let unconfigured = |controller: &Controller| {
        let workspace = controller.get_workspace(&ctx, ".", &FunctionOptions::new()).unwrap();
        let bucket = workspace.module_read_bucket(&ctx).unwrap();
        let image = controller
            .get_image_for_workspace(&ctx, &workspace, &FunctionOptions::new())
            .unwrap();
        check_unconfigured_imports(&workspace, &bucket, &image)
    };
    let found = unconfigured(&controller);
    let importers: Vec<&str> = found.iter().map(|import| import.path.as_str()).collect();
    assert_eq!(importers, vec!["acme/a.proto", "acme/b.proto"]);
    assert!(found[0].to_string().contains("buf.test/acme/dep"));

    write(
        fixture.path(),
        "buf.yaml",
        "version: v2\nmodules:\n  - path: proto\ndeps:\n  - buf.test/acme/dep\n",
    );
    assert!(unconfigured(&controller).is_empty());

    let image = controller
        .get_image(&ctx, ".", &FunctionOptions::new().with_image_exclude_imports(true))
        .unwrap();
    assert_eq!(target_paths(&image), strings(&["acme/a.proto", "acme/b.proto"]));
}

#[test]
fn test_null_outputs_write_nothing() {
    let fixture = Fixture::workspace();
    let writer = Arc::new(CountingWriter::default());
    let controller = fixture.builder().with_writer(writer.clone()).build();
    let ctx = Context::background();
    let image = controller.get_image(&ctx, "proto", &FunctionOptions::new()).unwrap();
    let message = DynamicMessage::new(schema_message(&image, "acme.B"));

    controller
        .put_image(&ctx, "/dev/null", &image, &FunctionOptions::new())
        .unwrap();
    controller
        .put_message(&ctx, "/dev/null", &message, MessageEncoding::Json)
        .unwrap();
    assert_eq!(writer.calls.load(Ordering::SeqCst), 0);

    controller
        .put_image(&ctx, "image.binpb", &image, &FunctionOptions::new())
        .unwrap();
    assert_eq!(writer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_write_and_close_failures_are_joined() {
    let fixture = Fixture::workspace();
    let writer = Arc::new(CountingWriter {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let controller = fixture.builder().with_writer(writer).build();
    let ctx = Context::background();
    let image = controller.get_image(&ctx, "proto", &FunctionOptions::new()).unwrap();

    match controller.put_image(&ctx, "image.binpb", &image, &FunctionOptions::new()) {
        Err(Error::Joined { primary, close }) => {
            assert!(matches!(*primary, Error::Io(_)));
            assert!(matches!(*close, Error::Internal(_)));
        }
        other => panic!("expected joined errors, got {:?}", other),
    }
}

#[test]
fn test_annotations_are_reported_before_close_errors() {
    let fixture = Fixture::new(&[("proto/acme/bad.proto", "syntax = \"proto3\";\nmessage {\n")]);
    let controller = fixture
        .builder()
        .with_reader(Arc::new(FailingCloseReader(LocalReader::new())))
        .build();

    match controller.get_image(&Context::background(), "proto", &FunctionOptions::new()) {
        Err(err @ Error::Joined { .. }) => {
            assert_eq!(err.exit_code(), 100);
            let Error::Joined { primary, close } = err else { unreachable!() };
            assert!(matches!(*primary, Error::FileAnnotationsReported));
            assert!(matches!(*close, Error::Internal(_)));
        }
        other => panic!("expected joined errors, got {:?}", other),
    }
    assert!(fixture.stderr().contains("bad.proto"));
    assert!(fixture.stdout.lock().unwrap().is_empty());
}

#[test]
fn test_annotations_follow_format_and_stream() {
    let fixture = Fixture::new(&[("proto/acme/bad.proto", "syntax = \"proto3\";\nmessage {\n")]);
    let controller = fixture
        .builder()
        .with_error_format(ErrorFormat::Json)
        .with_annotation_stream(AnnotationStream::Stdout)
        .build();

    let result = controller.get_image(&Context::background(), "proto", &FunctionOptions::new());
    assert!(matches!(result, Err(Error::FileAnnotationsReported)));
    let stdout = String::from_utf8(fixture.stdout.lock().unwrap().clone()).unwrap();
    let first: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert!(first["path"].as_str().unwrap().ends_with("bad.proto"));
    assert!(fixture.stderr().is_empty());
}

#[test]
fn test_cancelled_context_stops_work() {
    let fixture = Fixture::workspace();
    let ctx = Context::background();
    ctx.cancel();
    let result = fixture.controller().get_image(&ctx, "proto", &FunctionOptions::new());
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_dep_manager_for_directory() {
    let fixture = Fixture::new(&[("buf.yaml", "version: v1\ndeps:\n  - buf.test/acme/dep\n")]);
    let ctx = Context::background();
    let (_, registry) = dep_registry();
    let manager = fixture.controller().get_workspace_dep_manager(&ctx, ".").unwrap();
    let refs = manager.config_dep_module_refs(&ctx).unwrap();
    assert_eq!(refs.len(), 1);

    let key = registry.get_module_key(&ctx, &refs[0]).unwrap();
    manager.update_lock(&ctx, vec![key.clone()]).unwrap();
    assert_eq!(manager.existing_dep_module_keys(&ctx).unwrap(), vec![key]);
    assert!(fixture.path().join(config::BUF_LOCK).is_file());
}

#[test]
fn test_input_config_supplies_paths() {
    let fixture = Fixture::workspace();
    let controller = fixture.controller();
    let input_config = InputConfig {
        directory: Some("proto".to_string()),
        paths: strings(&["proto/acme/b.proto"]),
        ..InputConfig::default()
    };
    let image = controller
        .get_image_for_input_config(&Context::background(), &input_config, &FunctionOptions::new())
        .unwrap();
    assert_eq!(target_paths(&image), strings(&["acme/b.proto"]));
}
