//! Directory-backed script source

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScriptDiscoveryConfig;
use crate::error::{Error, Result};
use crate::scripts::{ScriptProvider, ScriptUnit};

const UTF8_BOM: char = '\u{feff}';

/// Reads `*.sql` files from a directory.
///
/// Script names are the path relative to the directory, with `/` separators,
/// so nested scripts stay unique and sort together with their folder.
#[derive(Debug, Clone)]
pub struct FileSystemScriptProvider {
    directory: PathBuf,
    include_subdirectories: bool,
    extension: String,
    filter: Option<Regex>,
}

impl FileSystemScriptProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            include_subdirectories: false,
            extension: "sql".to_string(),
            filter: None,
        }
    }

    /// Create a provider with the discovery options from configuration
    pub fn with_options(
        directory: impl Into<PathBuf>,
        options: &ScriptDiscoveryConfig,
    ) -> Result<Self> {
        let filter = options
            .filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::ConfigError(format!("Invalid script filter: {}", e)))?;

        Ok(Self {
            directory: directory.into(),
            include_subdirectories: options.include_subdirectories,
            extension: options.extension.trim_start_matches('.').to_lowercase(),
            filter,
        })
    }

    pub fn include_subdirectories(mut self, include: bool) -> Self {
        self.include_subdirectories = include;
        self
    }

    fn has_script_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    fn script_name(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.directory).map_err(|_| {
            Error::DiscoveryError(format!(
                "{} is outside of {}",
                path.display(),
                self.directory.display()
            ))
        })?;

        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn is_selected(&self, name: &str) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter.is_match(name))
    }

    fn read_script(&self, path: &Path, name: String) -> Result<ScriptUnit> {
        let mut contents = fs::read_to_string(path).map_err(|e| {
            Error::DiscoveryError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if let Some(stripped) = contents.strip_prefix(UTF8_BOM) {
            contents = stripped.to_string();
        }

        Ok(ScriptUnit { name, contents })
    }
}

impl ScriptProvider for FileSystemScriptProvider {
    fn location(&self) -> String {
        self.directory.display().to_string()
    }

    fn get_scripts(&self) -> Result<Vec<ScriptUnit>> {
        if !self.directory.is_dir() {
            return Err(Error::ScriptNotFound(self.directory.display().to_string()));
        }

        let max_depth = if self.include_subdirectories { usize::MAX } else { 1 };
        let mut scripts = Vec::new();

        for entry in WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::DiscoveryError(e.to_string()))?;
            if !entry.file_type().is_file() || !self.has_script_extension(entry.path()) {
                continue;
            }

            // Excluded files are never opened
            let name = self.script_name(entry.path())?;
            if !self.is_selected(&name) {
                tracing::debug!(script = %name, "Script excluded by filter");
                continue;
            }
            scripts.push(self.read_script(entry.path(), name)?);
        }

        tracing::debug!(
            directory = %self.directory.display(),
            count = scripts.len(),
            "Discovered scripts"
        );
        Ok(scripts)
    }
}
