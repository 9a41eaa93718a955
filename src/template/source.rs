//! Where template text comes from.

use std::{collections::HashMap, fs, io, path::Path, path::PathBuf};

/// Reads raw template text for a resolved path
pub trait TemplateSource: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads templates from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemSource;

impl TemplateSource for FileSystemSource {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Templates held in memory, keyed by the path the engine resolves
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: HashMap<PathBuf, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }

    pub fn with(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl TemplateSource for MemorySource {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no template at {}", path.display()),
            )
        })
    }
}
