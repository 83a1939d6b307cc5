//! Confines patch targets to the project root.

use std::io;
use std::path::{Component, Path, PathBuf};

/// A patch target that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct SafePath {
    /// Absolute path under the canonical root.
    pub absolute: PathBuf,
    /// Normalized path relative to the root, `/`-separated.
    pub relative: String,
}

/// The canonical form of `root`, against which every target is checked.
pub struct Sandbox {
    root: PathBuf,
    original_root: PathBuf,
}

impl Sandbox {
    pub fn new(root: &Path) -> io::Result<Sandbox> {
        Ok(Sandbox {
            root: root.canonicalize()?,
            original_root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (relative to the root, or absolute but inside it). Returns `None` if the
    /// path leaves the root, lexically or through a symlink.
    pub fn resolve(&self, path: &str) -> Option<SafePath> {
        let path = Path::new(path.trim());
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .or_else(|_| path.strip_prefix(&self.original_root))
                .ok()?
        } else {
            path
        };

        let mut parts: Vec<&std::ffi::OsStr> = vec![];
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop()?;
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        let absolute: PathBuf = parts.iter().fold(self.root.clone(), |p, part| p.join(part));

        // The deepest existing ancestor decides where a symlink would lead.
        let mut existing = absolute.as_path();
        while std::fs::symlink_metadata(existing).is_err() {
            existing = existing.parent()?;
        }
        if !existing.canonicalize().ok()?.starts_with(&self.root) {
            return None;
        }

        let relative = parts
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(SafePath { absolute, relative })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ats_core::test_util::tempdir;

    #[test]
    fn relative_paths_are_normalized() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let safe = sandbox.resolve("./app/../app/x.py").unwrap();
        assert_eq!(safe.relative, "app/x.py");
        assert_eq!(safe.absolute, sandbox.root().join("app/x.py"));
    }

    #[test]
    fn escapes_are_rejected() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        assert_eq!(sandbox.resolve("../../etc/passwd"), None);
        assert_eq!(sandbox.resolve("app/../../x.py"), None);
        assert_eq!(sandbox.resolve("/etc/passwd"), None);
        assert_eq!(sandbox.resolve(""), None);
        assert_eq!(sandbox.resolve("."), None);
    }

    #[test]
    fn absolute_paths_inside_root_are_allowed() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let inside = sandbox.root().join("main.py");
        let safe = sandbox.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(safe.relative, "main.py");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_out_of_root_are_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        assert_eq!(sandbox.resolve("link/evil.py"), None);
    }
}
