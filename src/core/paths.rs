//! Path helpers for stream files, logs and the config file.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Replace a leading `~` with `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    env::var_os("HOME").map_or_else(|| path.to_path_buf(), |home| PathBuf::from(home).join(rest))
}

/// Absolute form of `path`, following symlinks when the target exists.
///
/// Paths that do not exist yet (an output stream about to be created) are
/// joined onto the working directory and cleaned up lexically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    std::fs::canonicalize(&absolute).unwrap_or_else(|_| clean(&absolute))
}

/// Whether two paths name the same file, whether or not it exists yet.
pub fn same_file(a: &Path, b: &Path) -> bool {
    resolve_absolute_path(a) == resolve_absolute_path(b)
}

fn clean(path: &Path) -> PathBuf {
    let mut kept: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(kept.last(), Some(Component::Normal(_))) {
                    kept.pop();
                }
            }
            other => kept.push(other),
        }
    }
    kept.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_output_path_is_cleaned_lexically() {
        let input = Path::new("/nonexistent-dah/streams/../out.jsonl");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_absolute_path(input),
            Path::new("/nonexistent-dah/out.jsonl")
        );
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(clean(Path::new("/../metadata.jsonl")), Path::new("/metadata.jsonl"));
    }

    #[test]
    fn same_file_sees_through_relative_segments() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("metadata.jsonl");
        std::fs::write(&stream, "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let indirect = dir.path().join("sub").join("..").join("metadata.jsonl");
        assert!(same_file(&stream, &indirect));
        assert!(!same_file(&stream, &dir.path().join("resumed.jsonl")));
    }

    #[test]
    fn non_home_paths_are_untouched() {
        assert_eq!(expand_home(Path::new("/var/log/x")), Path::new("/var/log/x"));
        assert_eq!(expand_home(Path::new("rel/~x")), Path::new("rel/~x"));
    }
}
