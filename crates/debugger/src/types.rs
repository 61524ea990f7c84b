use std::path::PathBuf;

/// Backend-assigned breakpoint id
pub type BreakpointId = u64;

/// A source location, the line is 1-based
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: PathBuf,
    pub line: u32,
}

impl Location {
    pub fn new(path: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// A breakpoint the backend holds, by where it was set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRecord {
    pub id: BreakpointId,
    pub location: Location,
}

/// Compile unit of a module, as the backend reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub directory: Option<PathBuf>,
    pub filename: Option<String>,
}

impl CompileUnit {
    pub fn new(directory: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            directory: Some(directory.into()),
            filename: Some(filename.into()),
        }
    }

    /// `directory/filename`, when both parts are known
    pub fn path(&self) -> Option<PathBuf> {
        match (&self.directory, &self.filename) {
            (Some(directory), Some(filename)) => Some(directory.join(filename)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub compile_units: Vec<CompileUnit>,
}

/// Description of a created target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub executable: PathBuf,
    pub modules: Vec<Module>,
}

/// Where the debug info places a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub file: PathBuf,
    pub line: u32,
}

/// The selected target as the session keeps it
#[derive(Debug, Clone)]
pub struct Target {
    pub executable: PathBuf,
    pub modules: Vec<Module>,
    /// Nearest ancestor of the executable that looks like a project root
    pub source_root: Option<PathBuf>,
}
