//! Image filters.
//!
//! Filters compose left to right: each takes the output of the previous one
//! as its whole world. A symbol or file dropped by an earlier filter is never
//! brought back by a later one; references to it are left dangling.

use super::{pb, Image, ImageFile};
use crate::error::{Error, Result};
use crate::normalpath;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Drops every import. The result may be open and is meant for output only.
pub fn exclude_imports(image: Image) -> Result<Image> {
    let reparsed = image.is_reparsed();
    let files: Vec<ImageFile> = image
        .into_files()
        .into_iter()
        .filter(|file| !file.is_import())
        .collect();
    if files.is_empty() {
        return Err(Error::NoTargetProtoFiles);
    }
    let image = Image::new_open(files)?;
    Ok(if reparsed { image.mark_reparsed() } else { image })
}

/// Restricts an image to target paths.
///
/// `paths` and `exclude_paths` name files or directories. Files matched by
/// `paths` (all non-imports when empty) and not matched by `exclude_paths`
/// become the targets; their transitive imports are kept as imports and
/// everything else is dropped. Paths that match nothing are an error unless
/// `allow_not_exist` is set.
pub fn filter_by_paths(
    image: &Image,
    paths: &[String],
    exclude_paths: &[String],
    allow_not_exist: bool,
) -> Result<Image> {
    let paths = normalize_all(paths)?;
    let exclude_paths = normalize_all(exclude_paths)?;
    let matches = |prefix: &str, file: &ImageFile| normalpath::is_equal_or_contains(prefix, file.path());

    let mut missing = Vec::new();
    for path in paths.iter().chain(exclude_paths.iter()) {
        if !image.files().iter().any(|file| matches(path, file)) {
            missing.push(path.clone());
        }
    }
    if !missing.is_empty() && !allow_not_exist {
        return Err(Error::PathsNotFound(missing));
    }

    let targets: HashSet<&str> = image
        .files()
        .iter()
        .filter(|file| {
            let included = if paths.is_empty() {
                !file.is_import()
            } else {
                paths.iter().any(|path| matches(path, file))
            };
            included && !exclude_paths.iter().any(|path| matches(path, file))
        })
        .map(ImageFile::path)
        .collect();
    if targets.is_empty() {
        return Err(Error::NoTargetProtoFiles);
    }

    let mut imports = HashSet::new();
    for target in &targets {
        imports.extend(image.transitive_imports(target));
    }
    let files: Vec<ImageFile> = image
        .files()
        .iter()
        .filter_map(|file| {
            if targets.contains(file.path()) {
                Some(file.clone().with_is_import(false))
            } else if imports.contains(file.path()) {
                Some(file.clone().with_is_import(true))
            } else {
                None
            }
        })
        .collect();
    debug!(
        "path filter kept {} of {} files ({} targets)",
        files.len(),
        image.files().len(),
        targets.len()
    );
    let filtered = Image::new_open(files)?;
    Ok(if image.is_reparsed() { filtered.mark_reparsed() } else { filtered })
}

fn normalize_all(paths: &[String]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| normalpath::normalize_and_validate(path))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Message,
    Enum,
    Service,
    Method,
    Extension,
}

#[derive(Debug)]
struct Symbol {
    kind: SymbolKind,
    file: usize,
    parent: Option<String>,
    /// Symbols this one needs: field types, extendees, method types
    refs: Vec<String>,
    /// Declarations nested inside this one
    children: Vec<String>,
}

/// Index of every symbol declared in an image
#[derive(Debug, Default)]
struct SymbolIndex {
    symbols: HashMap<String, Symbol>,
    packages: HashMap<String, Vec<String>>,
    file_extensions: Vec<Vec<String>>,
}

fn strip_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn join_name(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn field_refs(field: &pb::FieldDescriptorProto) -> Vec<String> {
    field
        .type_name
        .iter()
        .chain(field.extendee.iter())
        .filter(|name| !name.is_empty())
        .map(|name| strip_dot(name).to_string())
        .collect()
}

impl SymbolIndex {
    fn new(image: &Image) -> Self {
        let mut index = Self::default();
        for (i, file) in image.files().iter().enumerate() {
            let descriptor = file.descriptor();
            let package = file.package();
            let mut top_level = Vec::new();
            let mut extensions = Vec::new();
            for message in &descriptor.message_type {
                top_level.push(index.add_message(i, package, None, message, &mut extensions));
            }
            for enum_type in &descriptor.enum_type {
                top_level.push(index.add_leaf(i, package, None, enum_type.name.as_deref(), SymbolKind::Enum, Vec::new()));
            }
            for extension in &descriptor.extension {
                let name = index.add_leaf(i, package, None, extension.name.as_deref(), SymbolKind::Extension, field_refs(extension));
                extensions.push(name.clone());
                top_level.push(name);
            }
            for service in &descriptor.service {
                let full_name = join_name(package, service.name.as_deref().unwrap_or_default());
                let mut children = Vec::new();
                for method in &service.method {
                    let refs = method
                        .input_type
                        .iter()
                        .chain(method.output_type.iter())
                        .map(|name| strip_dot(name).to_string())
                        .collect();
                    children.push(index.add_leaf(
                        i,
                        &full_name,
                        Some(full_name.clone()),
                        method.name.as_deref(),
                        SymbolKind::Method,
                        refs,
                    ));
                }
                index.symbols.insert(
                    full_name.clone(),
                    Symbol {
                        kind: SymbolKind::Service,
                        file: i,
                        parent: None,
                        refs: Vec::new(),
                        children,
                    },
                );
                top_level.push(full_name);
            }
            index
                .packages
                .entry(package.to_string())
                .or_default()
                .extend(top_level);
            index.file_extensions.push(extensions);
        }
        index
    }

    fn add_leaf(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<String>,
        name: Option<&str>,
        kind: SymbolKind,
        refs: Vec<String>,
    ) -> String {
        let full_name = join_name(scope, name.unwrap_or_default());
        self.symbols.insert(
            full_name.clone(),
            Symbol {
                kind,
                file,
                parent,
                refs,
                children: Vec::new(),
            },
        );
        full_name
    }

    fn add_message(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<String>,
        message: &pb::DescriptorProto,
        extensions: &mut Vec<String>,
    ) -> String {
        let full_name = join_name(scope, message.name.as_deref().unwrap_or_default());
        let refs = message.field.iter().flat_map(field_refs).collect();
        let mut children = Vec::new();
        for nested in &message.nested_type {
            children.push(self.add_message(file, &full_name, Some(full_name.clone()), nested, extensions));
        }
        for enum_type in &message.enum_type {
            children.push(self.add_leaf(
                file,
                &full_name,
                Some(full_name.clone()),
                enum_type.name.as_deref(),
                SymbolKind::Enum,
                Vec::new(),
            ));
        }
        for extension in &message.extension {
            let name = self.add_leaf(
                file,
                &full_name,
                Some(full_name.clone()),
                extension.name.as_deref(),
                SymbolKind::Extension,
                field_refs(extension),
            );
            extensions.push(name.clone());
            children.push(name);
        }
        self.symbols.insert(
            full_name.clone(),
            Symbol {
                kind: SymbolKind::Message,
                file,
                parent,
                refs,
                children,
            },
        );
        full_name
    }

    /// Resolves a user-given name to the symbols it denotes
    fn lookup(&self, name: &str) -> Option<Vec<String>> {
        let name = strip_dot(name);
        if self.symbols.contains_key(name) {
            return Some(vec![name.to_string()]);
        }
        self.packages.get(name).cloned()
    }
}

/// Which declarations survive a type filter
#[derive(Debug, Default)]
struct Selection {
    /// `None` keeps everything not removed
    keep: Option<HashSet<String>>,
    /// Services kept only as a container for some of their methods
    service_containers: HashSet<String>,
    removed: HashSet<String>,
}

impl Selection {
    fn keeps(&self, name: &str) -> bool {
        !self.removed.contains(name)
            && self.keep.as_ref().map_or(true, |keep| keep.contains(name))
    }

    fn keeps_service(&self, name: &str) -> bool {
        self.keeps(name) || (!self.removed.contains(name) && self.service_containers.contains(name))
    }

    fn keeps_ref(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) if !name.is_empty() => !self.removed.contains(strip_dot(name)),
            _ => true,
        }
    }

    fn keeps_field(&self, field: &pb::FieldDescriptorProto) -> bool {
        self.keeps_ref(field.type_name.as_deref()) && self.keeps_ref(field.extendee.as_deref())
    }
}

/// Restricts an image to the closure of `include_types` and removes
/// `exclude_types`.
///
/// Names may be messages, enums, services, methods, extensions or packages.
/// Including a message keeps it whole, with its nested declarations and the
/// types its fields use; including a nested declaration keeps its parents.
/// Imports that declare extensions are kept so custom options stay
/// interpretable. Removing a type also removes the fields, methods and
/// extensions that use it. References to symbols absent from the image are
/// tolerated and left as they are.
pub fn filter_by_types(image: &Image, include_types: &[String], exclude_types: &[String]) -> Result<Image> {
    if include_types.is_empty() && exclude_types.is_empty() {
        return Ok(image.clone());
    }
    let index = SymbolIndex::new(image);
    let mut selection = Selection::default();

    for name in exclude_types {
        let roots = index
            .lookup(name)
            .ok_or_else(|| Error::TypeNotFound(name.clone()))?;
        let mut stack = roots;
        while let Some(current) = stack.pop() {
            if let Some(symbol) = index.symbols.get(&current) {
                stack.extend(symbol.children.iter().cloned());
            }
            selection.removed.insert(current);
        }
    }

    if !include_types.is_empty() {
        let mut worklist = Vec::new();
        for name in include_types {
            if exclude_types.contains(name) {
                return Err(Error::InvalidFlagCombination(format!(
                    "type {} is both included and excluded",
                    name
                )));
            }
            let roots = index
                .lookup(name)
                .ok_or_else(|| Error::TypeNotFound(name.clone()))?;
            worklist.extend(roots);
        }
        let (keep, service_containers) = include_closure(image, &index, &selection.removed, worklist);
        selection.keep = Some(keep);
        selection.service_containers = service_containers;
    }

    let mut kept_paths: HashSet<String> = HashSet::new();
    let mut pruned: Vec<Option<ImageFile>> = Vec::with_capacity(image.files().len());
    for file in image.files() {
        let descriptor = prune_file(file.descriptor(), file.package(), &selection);
        let has_declarations = !descriptor.message_type.is_empty()
            || !descriptor.enum_type.is_empty()
            || !descriptor.service.is_empty()
            || !descriptor.extension.is_empty();
        if selection.keep.is_some() && !has_declarations {
            pruned.push(None);
            continue;
        }
        kept_paths.insert(file.path().to_string());
        let mut pruned_file = file.clone();
        if &descriptor != file.descriptor() {
            *pruned_file.descriptor_mut() = descriptor;
            pruned_file.descriptor_mut().source_code_info = None;
        }
        pruned.push(Some(pruned_file));
    }

    // a public import re-exports symbols; keep the re-exporting file when the
    // re-exported file is kept
    if selection.keep.is_some() {
        loop {
            let mut added = false;
            for (i, file) in image.files().iter().enumerate() {
                if pruned[i].is_some() || !reexports_kept(image, file, &kept_paths) {
                    continue;
                }
                if image.files().iter().enumerate().any(|(j, other)| {
                    pruned[j].is_some() && other.imports().iter().any(|import| import == file.path())
                }) {
                    trace!("keeping {} for its public imports", file.path());
                    let mut kept = file.clone();
                    let descriptor = kept.descriptor_mut();
                    descriptor.message_type.clear();
                    descriptor.enum_type.clear();
                    descriptor.service.clear();
                    descriptor.extension.clear();
                    descriptor.source_code_info = None;
                    kept_paths.insert(file.path().to_string());
                    pruned[i] = Some(kept);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
    }

    let original_paths: HashSet<&str> = image.files().iter().map(ImageFile::path).collect();
    let files: Vec<ImageFile> = pruned
        .into_iter()
        .flatten()
        .map(|mut file| {
            let mut unused = file.unused_dependency_indexes().to_vec();
            prune_dependencies(file.descriptor_mut(), &original_paths, &kept_paths, &mut unused);
            file.with_unused_dependency_indexes(unused)
        })
        .collect();
    if files.is_empty() {
        return Err(Error::NoTargetProtoFiles);
    }
    let filtered = Image::new_open(files)?;
    Ok(if image.is_reparsed() { filtered.mark_reparsed() } else { filtered })
}

fn reexports_kept(image: &Image, file: &ImageFile, kept_paths: &HashSet<String>) -> bool {
    file.descriptor().public_dependency.iter().any(|&i| {
        file.imports()
            .get(i as usize)
            .map_or(false, |import| kept_paths.contains(import) && image.file(import).is_some())
    })
}

fn include_closure(
    image: &Image,
    index: &SymbolIndex,
    removed: &HashSet<String>,
    mut worklist: Vec<String>,
) -> (HashSet<String>, HashSet<String>) {
    let mut keep: HashSet<String> = HashSet::new();
    let mut service_containers = HashSet::new();
    let mut extension_files_done: HashSet<usize> = HashSet::new();
    loop {
        while let Some(name) = worklist.pop() {
            if removed.contains(&name) || keep.contains(&name) {
                continue;
            }
            let Some(symbol) = index.symbols.get(&name) else {
                trace!("dangling reference to {}", name);
                continue;
            };
            worklist.extend(symbol.refs.iter().cloned());
            match symbol.kind {
                SymbolKind::Message | SymbolKind::Service => {
                    worklist.extend(symbol.children.iter().cloned());
                }
                SymbolKind::Enum | SymbolKind::Extension => {}
                SymbolKind::Method => {
                    if let Some(parent) = &symbol.parent {
                        service_containers.insert(parent.clone());
                    }
                }
            }
            if symbol.kind != SymbolKind::Method {
                if let Some(parent) = &symbol.parent {
                    worklist.push(parent.clone());
                }
            }
            keep.insert(name);
        }

        // imports of kept files that declare extensions stay, for custom options
        let kept_files: HashSet<usize> = keep
            .iter()
            .chain(service_containers.iter())
            .filter_map(|name| index.symbols.get(name).map(|symbol| symbol.file))
            .collect();
        let mut added = false;
        for &i in &kept_files {
            for import in image.files()[i].imports() {
                let Some(j) = image.files().iter().position(|file| file.path() == import) else {
                    continue;
                };
                if !extension_files_done.insert(j) {
                    continue;
                }
                for extension in &index.file_extensions[j] {
                    if !keep.contains(extension) {
                        worklist.push(extension.clone());
                        added = true;
                    }
                }
            }
        }
        if !added {
            break;
        }
    }
    (keep, service_containers)
}

fn prune_file(descriptor: &pb::ImageFile, package: &str, selection: &Selection) -> pb::ImageFile {
    let mut out = descriptor.clone();
    out.message_type = descriptor
        .message_type
        .iter()
        .filter_map(|message| prune_message(package, message, selection))
        .collect();
    out.enum_type
        .retain(|e| selection.keeps(&join_name(package, e.name.as_deref().unwrap_or_default())));
    out.extension.retain(|x| {
        selection.keeps(&join_name(package, x.name.as_deref().unwrap_or_default()))
            && selection.keeps_field(x)
    });
    out.service = descriptor
        .service
        .iter()
        .filter_map(|service| {
            let full_name = join_name(package, service.name.as_deref().unwrap_or_default());
            if !selection.keeps_service(&full_name) {
                return None;
            }
            let mut service = service.clone();
            service.method.retain(|method| {
                selection.keeps(&join_name(&full_name, method.name.as_deref().unwrap_or_default()))
                    && selection.keeps_ref(method.input_type.as_deref())
                    && selection.keeps_ref(method.output_type.as_deref())
            });
            Some(service)
        })
        .collect();
    out
}

fn prune_message(scope: &str, message: &pb::DescriptorProto, selection: &Selection) -> Option<pb::DescriptorProto> {
    let full_name = join_name(scope, message.name.as_deref().unwrap_or_default());
    if !selection.keeps(&full_name) {
        return None;
    }
    let mut out = message.clone();
    out.field.retain(|field| selection.keeps_field(field));
    out.nested_type = message
        .nested_type
        .iter()
        .filter_map(|nested| prune_message(&full_name, nested, selection))
        .collect();
    out.enum_type
        .retain(|e| selection.keeps(&join_name(&full_name, e.name.as_deref().unwrap_or_default())));
    out.extension.retain(|x| {
        selection.keeps(&join_name(&full_name, x.name.as_deref().unwrap_or_default()))
            && selection.keeps_field(x)
    });
    prune_empty_oneofs(&mut out);
    Some(out)
}

/// Drops oneofs left without fields and renumbers `oneof_index`
fn prune_empty_oneofs(message: &mut pb::DescriptorProto) {
    let used: HashSet<i32> = message.field.iter().filter_map(|f| f.oneof_index).collect();
    let mut remap = HashMap::new();
    let mut oneofs = Vec::new();
    for (i, oneof) in message.oneof_decl.iter().enumerate() {
        if used.contains(&(i as i32)) {
            remap.insert(i as i32, oneofs.len() as i32);
            oneofs.push(oneof.clone());
        }
    }
    message.oneof_decl = oneofs;
    for field in &mut message.field {
        if let Some(index) = field.oneof_index {
            field.oneof_index = remap.get(&index).copied();
        }
    }
}

/// Removes imports of files that were in the image but did not survive, and
/// renumbers the index lists. `extra` is renumbered the same way.
fn prune_dependencies(
    descriptor: &mut pb::ImageFile,
    original_paths: &HashSet<&str>,
    kept_paths: &HashSet<String>,
    extra: &mut Vec<u32>,
) {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut dependency = Vec::new();
    for (i, import) in descriptor.dependency.iter().enumerate() {
        if original_paths.contains(import.as_str()) && !kept_paths.contains(import) {
            continue;
        }
        remap.insert(i, dependency.len());
        dependency.push(import.clone());
    }
    if dependency.len() == descriptor.dependency.len() {
        return;
    }
    descriptor.dependency = dependency;
    let renumber = |indexes: &[i32]| -> Vec<i32> {
        indexes
            .iter()
            .filter_map(|&i| remap.get(&(i as usize)).map(|&j| j as i32))
            .collect()
    };
    descriptor.public_dependency = renumber(&descriptor.public_dependency);
    descriptor.weak_dependency = renumber(&descriptor.weak_dependency);
    *extra = extra
        .iter()
        .filter_map(|&i| remap.get(&(i as usize)).map(|&j| j as u32))
        .collect();
}
