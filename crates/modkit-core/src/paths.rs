//! Platform default module roots and the layout under a destination root.

use std::path::{Path, PathBuf};

/// Platform default module roots, used when the caller supplies none.
///
/// Windows: `Documents\PowerShell\Modules`.
/// Elsewhere: `$XDG_DATA_HOME/powershell/Modules` (`~/.local/share` on Linux).
pub fn default_module_roots() -> Vec<PathBuf> {
    let base = if cfg!(windows) {
        dirs::document_dir().map(|d| d.join("PowerShell").join("Modules"))
    } else {
        dirs::data_local_dir().map(|d| d.join("powershell").join("Modules"))
    };
    base.into_iter().collect()
}

/// Module folder under a destination root: `<root>/<name>`
pub fn module_dir(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Version folder under a destination root: `<root>/<name>/<version>`
pub fn version_dir(root: &Path, name: &str, version: &str) -> PathBuf {
    module_dir(root, name).join(version)
}

/// Manifest file name for a module: `<name>.psd1`
pub fn manifest_file_name(name: &str) -> String {
    format!("{name}.{}", crate::MANIFEST_EXTENSION)
}
