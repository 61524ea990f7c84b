use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

/// Files whose presence marks the top of a source checkout
const PROJECT_MARKERS: &[&str] = &[
    "CMakeLists.txt",
    "Makefile",
    "build.zig",
    "meson.build",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    ".git",
];

pub fn normalise_path(path: &Path) -> Cow<'_, Path> {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return Cow::Owned(home.join(stripped));
        }
        tracing::warn!("cannot determine home directory, using path as-is");
    }
    Cow::Borrowed(path)
}

/// Nearest directory at or above the executable's that holds a project marker
pub fn find_source_root(executable: &Path) -> Option<PathBuf> {
    let start = executable.parent()?;
    let root = start.ancestors().find(|dir| {
        PROJECT_MARKERS
            .iter()
            .any(|marker| dir.join(marker).exists())
    })?;
    tracing::debug!(root = %root.display(), "found project root");
    Some(root.to_path_buf())
}
