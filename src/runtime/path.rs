//! Path utility functions for normalization and comparison.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Keep the `..` if there is nothing left to pop
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => {
                result.push(component);
            }
        }
    }
    result
}

/// Check if a path is under a given directory by comparing normalized path components.
///
/// `/envs/foo/../../etc/passwd` is NOT under `/envs`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);

    let path_components: Vec<_> = normalized_path.components().collect();
    let dir_components: Vec<_> = normalized_dir.components().collect();

    if path_components.len() < dir_components.len() {
        return false;
    }

    dir_components
        .iter()
        .zip(path_components.iter())
        .all(|(d, p)| d == p)
}

/// Whether `path` is a plain relative path that stays inside whatever directory it is
/// joined onto: no root, no drive prefix and no `..` components.
///
/// Archive entries and manifest lines must satisfy this before they are joined onto a
/// cache or environment directory.
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Calculate the relative path from a symlink location to a target.
///
/// For a link at `/envs/foo/bin/tool` pointing to `/pkgs/tool-1.0-0/bin/tool`, this
/// returns `../../../pkgs/tool-1.0-0/bin/tool`.
///
/// Returns `None` if a relative path cannot be computed (e.g., different drive letters on Windows).
pub fn relative_symlink_path(from_link: &Path, to_target: &Path) -> Option<PathBuf> {
    let from_dir = from_link.parent()?;
    let result = pathdiff::diff_paths(to_target, from_dir)?;

    if result.is_absolute() {
        return None;
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_with_dot() {
        assert_eq!(
            normalize_path(Path::new("/envs/./foo/./bin")),
            PathBuf::from("/envs/foo/bin")
        );
    }

    #[test]
    fn test_normalize_path_multiple_parent_dirs() {
        assert_eq!(
            normalize_path(Path::new("/envs/foo/bin/../../bar")),
            PathBuf::from("/envs/bar")
        );
    }

    #[test]
    fn test_normalize_path_parent_at_root() {
        assert_eq!(normalize_path(Path::new("../lib")), PathBuf::from("../lib"));
    }

    #[test]
    fn test_is_path_under_simple() {
        assert!(is_path_under(
            Path::new("/opt/envfarm/envs/foo"),
            Path::new("/opt/envfarm")
        ));
    }

    #[test]
    fn test_is_path_under_partial_component_match() {
        // "/envs/foobar" shares a string prefix with "/envs/foo" but is not under it
        assert!(!is_path_under(
            Path::new("/envs/foobar/bin"),
            Path::new("/envs/foo")
        ));
    }

    #[test]
    fn test_is_path_under_directory_traversal() {
        assert!(!is_path_under(
            Path::new("/envs/foo/../../etc/passwd"),
            Path::new("/envs")
        ));
    }

    #[test]
    fn test_is_contained_relative() {
        assert!(is_contained_relative(Path::new("bin/python")));
        assert!(is_contained_relative(Path::new("./lib/libz.so")));
        assert!(!is_contained_relative(Path::new("/etc/passwd")));
        assert!(!is_contained_relative(Path::new("lib/../../escape")));
        assert!(!is_contained_relative(Path::new("")));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_relative_symlink_path_into_cache() {
        let link = Path::new("/opt/envfarm/envs/foo/bin/tool");
        let target = Path::new("/opt/envfarm/pkgs/tool-1.0-0/bin/tool");
        assert_eq!(
            relative_symlink_path(link, target),
            Some(PathBuf::from("../../../pkgs/tool-1.0-0/bin/tool"))
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_relative_symlink_path_same_parent() {
        let link = Path::new("/prefix/bin/python");
        let target = Path::new("/prefix/bin/python3.11");
        assert_eq!(
            relative_symlink_path(link, target),
            Some(PathBuf::from("python3.11"))
        );
    }
}
