//! Tool availability checks

use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Resolves tool names against a search path
///
/// Nothing is cached: the set of installed tools is re-read on every call.
#[derive(Debug, Clone, Default)]
pub struct ToolProbe {
    /// Search path override; `None` uses the process `PATH`
    search_path: Option<OsString>,
}

impl ToolProbe {
    /// Probe using the process `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe using an explicit search path (same syntax as `PATH`)
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Configured search path, if overridden
    pub fn search_path(&self) -> Option<&OsString> {
        self.search_path.as_ref()
    }

    /// Absolute path of `tool`, if it resolves
    pub fn locate(&self, tool: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(tool, Some(paths), cwd)
            }
            None => which::which(tool),
        };

        match found {
            Ok(path) => {
                debug!("Resolved tool {} -> {}", tool, path.display());
                Some(path)
            }
            Err(e) => {
                debug!("Tool {} not found: {}", tool, e);
                None
            }
        }
    }

    /// Whether `tool` is resolvable on the search path
    pub fn find_available(&self, tool: &str) -> bool {
        self.locate(tool).is_some()
    }
}
