use super::{
    BucketOptions, BucketRef, BucketTargeting, Container, ProtoFileTarget, ReadCloser, Reader, SharedReader,
    SharedWriter, WriteCloser, Writer,
};
use crate::config::{self, FileVersion, BUF_WORK_YAML, BUF_YAML};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::module::{ModuleKey, ModuleKeyProvider, ModuleRef};
use crate::normalpath;
use crate::reference::{DirRef, MessagePath, MessageRef, SourceRef};
use crate::storage::{NopCloser, OsBucket, ReadBucketCloser, ReadWriteBucket};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Reads local directories, local `.proto` files and message files.
///
/// Git repositories and archives need a fetching reader and are reported as
/// unsupported. Module references are pinned through the configured
/// [`ModuleKeyProvider`], if any.
#[derive(Clone, Default)]
pub struct LocalReader {
    module_key_provider: Option<Arc<dyn ModuleKeyProvider>>,
}

impl std::fmt::Debug for LocalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReader")
            .field("has_registry", &self.module_key_provider.is_some())
            .finish()
    }
}

impl LocalReader {
    /// A reader without a registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins module references through `provider`
    pub fn with_module_key_provider(mut self, provider: Arc<dyn ModuleKeyProvider>) -> Self {
        self.module_key_provider = Some(provider);
        self
    }
}

/// Whether `dir` holds a configuration file that makes it a workspace root
/// for `input`
fn is_workspace_root(dir: &Path, input: &Path) -> Result<bool> {
    let work_path = dir.join(BUF_WORK_YAML);
    if work_path.is_file() {
        let data = fs::read(&work_path).map_err(|e| Error::file_read(&work_path, e))?;
        let work = config::parse_buf_work_yaml(&work_path.display().to_string(), &data)?;
        let relative = input.strip_prefix(dir).unwrap_or(input);
        let relative = normalpath::normalize(&relative.to_string_lossy().replace('\\', "/"));
        if relative == "."
            || work
                .directories
                .iter()
                .any(|directory| normalpath::is_equal_or_contains(directory, &relative))
        {
            return Ok(true);
        }
    }
    let yaml_path = dir.join(BUF_YAML);
    if yaml_path.is_file() {
        let data = fs::read(&yaml_path).map_err(|e| Error::file_read(&yaml_path, e))?;
        let name = yaml_path.display().to_string();
        if config::peek_file_version(&name, &data)? == FileVersion::V2 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Finds the workspace root of an input directory.
///
/// Inside the working directory, ancestors up to the working directory are
/// searched for a `buf.work.yaml` listing the input or a v2 `buf.yaml`.
/// Otherwise, or when nothing is found, the input directory is the root.
fn find_workspace_root(cwd: &Path, input: &Path) -> Result<PathBuf> {
    let cwd = normalpath::clean_os_path(cwd);
    let mut dir = Some(input);
    while let Some(current) = dir {
        if is_workspace_root(current, input)? {
            debug!("workspace root for {} is {}", input.display(), current.display());
            return Ok(current.to_path_buf());
        }
        if current == cwd || !current.starts_with(&cwd) {
            break;
        }
        dir = current.parent();
    }
    Ok(input.to_path_buf())
}

fn rerooted(cwd: &Path, root: &Path, paths: &[String]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| normalpath::rel_to_root(cwd, root, Path::new(path)))
        .collect()
}

impl Reader for LocalReader {
    fn get_source_read_bucket_closer(
        &self,
        ctx: &Context,
        container: &Container,
        bucket_ref: &BucketRef,
        options: &BucketOptions,
    ) -> Result<(Box<dyn ReadBucketCloser>, BucketTargeting)> {
        ctx.check()?;
        let cwd = container.cwd();
        let (input_dir, proto_file) = match bucket_ref {
            BucketRef::ProtoFile(proto_file) => {
                let path = normalpath::clean_os_path(&cwd.join(&proto_file.path));
                if !path.is_file() {
                    return Err(Error::object_not_found(proto_file.path.clone()));
                }
                let dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| Error::malformed_input(&proto_file.path, "file has no parent directory"))?;
                (dir, Some((path, proto_file.include_package_files)))
            }
            BucketRef::Source(SourceRef::Dir { path }) => {
                let dir = normalpath::clean_os_path(&cwd.join(path));
                let metadata = fs::metadata(&dir).map_err(|e| Error::file_read(&dir, e))?;
                if !metadata.is_dir() {
                    return Err(Error::malformed_input(path, "not a directory"));
                }
                (dir, None)
            }
            BucketRef::Source(SourceRef::Git { url, .. }) => {
                return Err(Error::Unsupported(format!(
                    "git repository {}: remote sources need a fetching reader",
                    url
                )))
            }
            BucketRef::Source(SourceRef::Archive { path, .. }) => {
                return Err(Error::Unsupported(format!(
                    "archive {}: archives need a fetching reader",
                    path
                )))
            }
        };

        let root = find_workspace_root(cwd, &input_dir)?;
        let targeting = BucketTargeting {
            subdir_path: normalpath::rel_to_root(cwd, &root, &input_dir)?,
            target_paths: rerooted(cwd, &root, &options.target_paths)?,
            target_exclude_paths: rerooted(cwd, &root, &options.target_exclude_paths)?,
            proto_file: match proto_file {
                Some((path, include_package_files)) => Some(ProtoFileTarget {
                    path: normalpath::rel_to_root(cwd, &root, &path)?,
                    include_package_files,
                }),
                None => None,
            },
        };
        debug!("bucket at {} with {:?}", root.display(), targeting);
        Ok((Box::new(NopCloser::new(Arc::new(OsBucket::new(root)))), targeting))
    }

    fn get_dir_read_write_bucket(
        &self,
        ctx: &Context,
        container: &Container,
        dir_ref: &DirRef,
    ) -> Result<Arc<dyn ReadWriteBucket>> {
        ctx.check()?;
        let dir = normalpath::clean_os_path(&container.cwd().join(&dir_ref.path));
        let metadata = fs::metadata(&dir).map_err(|e| Error::file_read(&dir, e))?;
        if !metadata.is_dir() {
            return Err(Error::malformed_input(&dir_ref.path, "not a directory"));
        }
        Ok(Arc::new(OsBucket::new(dir)))
    }

    fn get_module_key(&self, ctx: &Context, _container: &Container, module_ref: &ModuleRef) -> Result<ModuleKey> {
        ctx.check()?;
        match &self.module_key_provider {
            Some(provider) => provider.get_module_key(ctx, module_ref),
            None => Err(Error::Unsupported(format!(
                "module {}: no registry configured",
                module_ref
            ))),
        }
    }

    fn get_message_file(
        &self,
        ctx: &Context,
        container: &Container,
        message_ref: &MessageRef,
    ) -> Result<Box<dyn ReadCloser>> {
        ctx.check()?;
        match &message_ref.path {
            MessagePath::File(path) => {
                let path = container.cwd().join(path);
                let file = fs::File::open(&path).map_err(|e| Error::file_read(&path, e))?;
                Ok(Box::new(FileReadCloser(file)))
            }
            MessagePath::Stdio => Ok(Box::new(SharedReadCloser(container.stdin()))),
            MessagePath::Null => Ok(Box::new(FileReadCloser(io::empty()))),
        }
    }
}

/// Writes message files and standard output
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWriter;

impl LocalWriter {
    /// Creates a writer
    pub fn new() -> Self {
        Self
    }
}

impl Writer for LocalWriter {
    fn put_message_file(
        &self,
        ctx: &Context,
        container: &Container,
        message_ref: &MessageRef,
    ) -> Result<Box<dyn WriteCloser>> {
        ctx.check()?;
        match &message_ref.path {
            MessagePath::File(path) => {
                let path = container.cwd().join(path);
                let file = fs::File::create(&path).map_err(|e| Error::file_write(&path, e))?;
                Ok(Box::new(FileWriteCloser {
                    writer: BufWriter::new(file),
                    path,
                }))
            }
            MessagePath::Stdio => Ok(Box::new(SharedWriteCloser(container.stdout()))),
            MessagePath::Null => Ok(Box::new(SharedWriteCloser(Arc::new(std::sync::Mutex::new(io::sink()))))),
        }
    }
}

struct FileReadCloser<R>(R);

impl<R: Read> Read for FileReadCloser<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> ReadCloser for FileReadCloser<R> {
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct SharedReadCloser(SharedReader);

impl Read for SharedReadCloser {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self
            .0
            .lock()
            .map_err(|_| io::Error::other("stdin lock poisoned"))?;
        reader.read(buf)
    }
}

impl ReadCloser for SharedReadCloser {
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct FileWriteCloser {
    writer: BufWriter<fs::File>,
    path: PathBuf,
}

impl Write for FileWriteCloser {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WriteCloser for FileWriteCloser {
    fn close(mut self: Box<Self>) -> Result<()> {
        self.writer.flush().map_err(|e| Error::file_write(&self.path, e))
    }
}

struct SharedWriteCloser(SharedWriter);

impl Write for SharedWriteCloser {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self
            .0
            .lock()
            .map_err(|_| io::Error::other("output lock poisoned"))?;
        writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self
            .0
            .lock()
            .map_err(|_| io::Error::other("output lock poisoned"))?;
        writer.flush()
    }
}

impl WriteCloser for SharedWriteCloser {
    fn close(mut self: Box<Self>) -> Result<()> {
        Ok(self.flush()?)
    }
}
