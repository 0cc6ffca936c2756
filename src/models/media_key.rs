use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Normalized absolute path identifying one media file.
///
/// Normalization is purely lexical: relative paths are resolved against the
/// current directory and `.`/`..` components are folded. The file system is
/// never touched, so keys can be built for files that no longer exist.
///
/// The path is kept as the OS gave it, so non-UTF-8 names stay distinct and
/// openable. `Display` is lossy and only meant for logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaKey(Arc<Path>);

impl MediaKey {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(Arc::from(normalize(path.as_ref())))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.as_path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&Path> for MediaKey {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for MediaKey {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&str> for MediaKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl AsRef<Path> for MediaKey {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}
