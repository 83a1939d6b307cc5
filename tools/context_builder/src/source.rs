//! Discovery of the target project's source files.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One source file of the target, with its path relative to the target root.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFile {
    /// Relative path with `/` separators.
    pub relative: String,
    pub absolute: PathBuf,
    pub content: String,
}

/// Reads every file under `root` whose extension is in `extensions`, skipping directories named in
/// `skip_dirs` and anything under `exclude` (the benchmark's own output, when it lives inside the
/// target). Files are returned in sorted path order.
pub fn collect(
    root: &Path,
    extensions: &[String],
    skip_dirs: &[String],
    exclude: Option<&Path>,
) -> io::Result<Vec<SourceFile>> {
    let excluded = exclude.and_then(|ex| excluded_relative(root, ex));
    let mut files = vec![];
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if let Some(ref excluded) = excluded {
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if relative.starts_with(excluded) {
                    return false;
                }
            }
            !entry.file_type().is_dir()
                || !skip_dirs.iter().any(|d| entry.file_name() == d.as_str())
        });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches_ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x == e));
        if !matches_ext {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(SourceFile {
            relative,
            absolute: entry.path().to_path_buf(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(files)
}

/// `exclude` relative to `root`, if it lies strictly inside it. Both are canonicalised so `.`
/// and symlinked spellings of the same directory compare equal.
fn excluded_relative(root: &Path, exclude: &Path) -> Option<PathBuf> {
    let root = root.canonicalize().ok()?;
    let exclude = exclude.canonicalize().ok()?;
    let relative = exclude.strip_prefix(&root).ok()?;
    (!relative.as_os_str().is_empty()).then(|| relative.to_path_buf())
}

/// Total size of the sources in bytes.
pub fn raw_size(files: &[SourceFile]) -> usize {
    files.iter().map(|f| f.content.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ats_core::test_util::tempdir;
    use std::fs;

    #[test]
    fn skips_ignored_dirs_and_sorts() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::create_dir_all(root.join("__pycache__")).unwrap();
        fs::create_dir_all(root.join(".venv/lib")).unwrap();
        fs::write(root.join("z.py"), "z = 1\n").unwrap();
        fs::write(root.join("pkg/a.py"), "a = 1\n").unwrap();
        fs::write(root.join("notes.md"), "# notes\n").unwrap();
        fs::write(root.join("__pycache__/z.py"), "junk").unwrap();
        fs::write(root.join(".venv/lib/site.py"), "junk").unwrap();

        let files = collect(
            root,
            &["py".to_string()],
            &["__pycache__".to_string(), ".venv".to_string()],
            None,
        )
        .unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, ["pkg/a.py", "z.py"]);
        assert_eq!(raw_size(&files), 12);
    }

    #[test]
    fn output_inside_the_target_is_not_source() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("calc.py"), "x = 1\n").unwrap();
        fs::create_dir_all(root.join("ats_out/repair/baseline/workspace")).unwrap();
        fs::write(
            root.join("ats_out/repair/baseline/workspace/calc.py"),
            "x = 2\n",
        )
        .unwrap();
        let exts = ["py".to_string()];

        let files = collect(root, &exts, &[], Some(&root.join("ats_out"))).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, ["calc.py"]);

        // An output directory elsewhere, or the target itself, excludes nothing.
        let elsewhere = tempdir().unwrap();
        assert_eq!(collect(root, &exts, &[], Some(elsewhere.path())).unwrap().len(), 2);
        assert_eq!(collect(root, &exts, &[], Some(root)).unwrap().len(), 2);
    }
}
