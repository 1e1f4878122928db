//! Path conventions for sockets, bundles and build output.

use std::path::{Path, PathBuf};

/// File extension of compiled bundles.
pub const BUNDLE_EXTENSION: &str = "bundle.json";

/// File extension of component template sources.
pub const TEMPLATE_EXTENSION: &str = "html";

/// Get the directory holding Unix sockets.
///
/// Uses the XDG runtime directory when available (`$XDG_RUNTIME_DIR/ssr`),
/// falling back to `<tmp>/ssr`.
pub fn get_runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ssr")
}

/// Default directory of compiled bundles, relative to the working directory.
pub fn default_bundles_dir() -> PathBuf {
    PathBuf::from(".ssr").join("bundles")
}

/// Default directory for client assets emitted by the bundler.
pub fn default_dist_dir() -> PathBuf {
    PathBuf::from(".ssr").join("static").join("dist")
}

/// Socket path of the render worker with the given index.
///
/// # Examples
///
/// ```
/// let path = worker_socket_path(Path::new("/run/ssr"), 3);
/// assert_eq!(path, PathBuf::from("/run/ssr/renderer-3.sock"));
/// ```
pub fn worker_socket_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("renderer-{}.sock", index))
}

/// Socket path of a supervisor's private side channel.
pub fn supervisor_socket_path(dir: &Path, supervisor_pid: u32) -> PathBuf {
    dir.join(format!("supervisor-{}.sock", supervisor_pid))
}

/// Socket path of the development bundler.
pub fn bundler_socket_path(dir: &Path) -> PathBuf {
    dir.join("bundler.sock")
}

/// Path of the compiled bundle for a template, relative to the bundles root.
///
/// `pages/home.html` becomes `pages/home.bundle.json`.
pub fn bundle_relpath(template_relpath: &Path) -> PathBuf {
    template_relpath.with_extension(BUNDLE_EXTENSION)
}

/// Locator under which a compiled bundle is registered.
///
/// `pages/home.bundle.json` becomes `pages/home`. Separators are normalized
/// to `/` so locators are stable across platforms.
pub fn locator_for(bundle_relpath: &Path) -> Option<String> {
    let name = bundle_relpath.to_str()?;
    let stem = name.strip_suffix(&format!(".{}", BUNDLE_EXTENSION))?;
    Some(stem.replace(std::path::MAIN_SEPARATOR, "/"))
}

/// Recursively collect files under `root` whose names end with `.{extension}`.
///
/// Returned paths are relative to `root` and sorted. A missing root yields an
/// empty list. Symlinked directories are not descended into.
pub fn find_files(root: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let suffix = format!(".{}", extension);
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == root => {
                return Ok(found);
            }
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
                && let Ok(rel) = path.strip_prefix(root)
            {
                found.push(rel.to_path_buf());
            }
        }
    }

    found.sort();
    Ok(found)
}
