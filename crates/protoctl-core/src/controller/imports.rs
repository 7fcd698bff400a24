use crate::image::Image;
use crate::module::{ModuleFullName, ModuleReadBucket};
use crate::workspace::Workspace;
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// A local file importing a file of a named module the workspace does not
/// declare as a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfiguredImport {
    /// The importing file
    pub path: String,
    /// The imported file
    pub import: String,
    /// The module the imported file belongs to
    pub module_full_name: ModuleFullName,
}

impl fmt::Display for UnconfiguredImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} imports {} from module {}, which is not declared in your buf.yaml deps; add it to deps",
            self.path, self.import, self.module_full_name
        )
    }
}

/// Warns once per (file, import) pair where a local target file imports a
/// file of a named module that is neither local nor a configured dependency.
///
/// Workspaces without local modules declare no dependencies of their own
/// and are not checked.
pub fn check_unconfigured_imports(
    workspace: &Workspace,
    bucket: &ModuleReadBucket,
    image: &Image,
) -> Vec<UnconfiguredImport> {
    let local_modules = workspace.local_modules();
    if local_modules.is_empty() {
        return Vec::new();
    }
    let local_names: HashSet<&ModuleFullName> = local_modules
        .iter()
        .filter_map(|module| module.full_name())
        .collect();
    let configured = workspace.configured_dep_full_names();

    let mut found = Vec::new();
    for file in image.files().iter().filter(|file| !file.is_import()) {
        let is_local = bucket
            .file_info(file.path())
            .map(|info| info.is_local)
            .unwrap_or(false);
        if !is_local {
            continue;
        }
        for import in file.imports() {
            let Some(module_full_name) = image.file(import).and_then(|imported| imported.module_full_name()) else {
                continue;
            };
            if configured.contains(module_full_name) || local_names.contains(module_full_name) {
                continue;
            }
            let unconfigured = UnconfiguredImport {
                path: file.path().to_string(),
                import: import.clone(),
                module_full_name: module_full_name.clone(),
            };
            warn!("{}", unconfigured);
            found.push(unconfigured);
        }
    }
    found
}
