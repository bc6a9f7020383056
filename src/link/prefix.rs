//! Build-prefix placeholders recorded in `info/has_prefix`.
//!
//! Each line names a file that embeds the prefix it was built in. A bare path uses
//! the default placeholder in text mode; the three-field form
//! `<placeholder> <text|binary> <path>` names both explicitly.

use anyhow::Result;
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, is_contained_relative};

/// Placeholder written into relocatable files at build time.
pub const PREFIX_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

pub const HAS_PREFIX_PATH: &str = "info/has_prefix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixEntry {
    pub placeholder: String,
    pub mode: FileMode,
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
        .unwrap_or(token)
}

pub fn parse_has_prefix(content: &str) -> BTreeMap<PathBuf, PrefixEntry> {
    let mut entries = BTreeMap::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().map(unquote).collect();
        let (placeholder, mode, path) = match tokens.as_slice() {
            [path] => (PREFIX_PLACEHOLDER, FileMode::Text, *path),
            [placeholder, "text", path] => (*placeholder, FileMode::Text, *path),
            [placeholder, "binary", path] => (*placeholder, FileMode::Binary, *path),
            _ => {
                warn!("Ignoring malformed has_prefix line: {:?}", line);
                continue;
            }
        };

        let path = PathBuf::from(path);
        if !is_contained_relative(&path) {
            warn!("Ignoring has_prefix entry outside the prefix: {:?}", line);
            continue;
        }
        entries.insert(
            path,
            PrefixEntry {
                placeholder: placeholder.to_string(),
                mode,
            },
        );
    }

    entries
}

/// Entries of `<package_dir>/info/has_prefix`, empty when the package has none.
pub fn load_has_prefix<R: Runtime + ?Sized>(
    runtime: &R,
    package_dir: &Path,
) -> Result<BTreeMap<PathBuf, PrefixEntry>> {
    let path = package_dir.join(HAS_PREFIX_PATH);
    if !runtime.exists(&path) {
        return Ok(BTreeMap::new());
    }
    Ok(parse_has_prefix(&runtime.read_to_string(&path)?))
}

/// Replace every occurrence of `from` in `data` with `to`.
pub fn replace_bytes(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return data.to_vec();
    }

    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(pos) = rest.windows(from.len()).position(|w| w == from) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Write `src` to `dst` with the placeholder replaced by `prefix`.
///
/// Binary-mode files would need length-preserving padding; they are copied unchanged.
pub fn install_with_prefix<R: Runtime + ?Sized>(
    runtime: &R,
    src: &Path,
    dst: &Path,
    entry: &PrefixEntry,
    prefix: &Path,
) -> Result<()> {
    match entry.mode {
        FileMode::Text => {
            let data = runtime.read(src)?;
            let prefix = prefix.to_string_lossy();
            let rewritten = replace_bytes(&data, entry.placeholder.as_bytes(), prefix.as_bytes());
            runtime.write(dst, &rewritten)?;
            runtime.copy_metadata(src, dst)?;
        }
        FileMode::Binary => {
            warn!(
                "Binary prefix replacement is not supported, copying {:?} unchanged",
                src
            );
            runtime.copy(src, dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    #[test]
    fn test_parse_has_prefix_forms() {
        let entries = parse_has_prefix(
            "bin/python3-config\n\
             /build/placeholder_path text \"lib/pkgconfig/zlib.pc\"\n\
             /opt/anaconda1anaconda2anaconda3 binary lib/libpython3.so\n\
             \n\
             too many tokens here ok\n\
             ../../etc/passwd\n",
        );

        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[Path::new("bin/python3-config")],
            PrefixEntry {
                placeholder: PREFIX_PLACEHOLDER.to_string(),
                mode: FileMode::Text
            }
        );
        assert_eq!(
            entries[Path::new("lib/pkgconfig/zlib.pc")].placeholder,
            "/build/placeholder_path"
        );
        assert_eq!(
            entries[Path::new("lib/libpython3.so")].mode,
            FileMode::Binary
        );
    }

    #[test]
    fn test_replace_bytes() {
        assert_eq!(
            replace_bytes(b"a/OLD/b/OLD", b"/OLD", b"/new/path"),
            b"a/new/path/b/new/path".to_vec()
        );
        assert_eq!(replace_bytes(b"\xff\x00abc", b"x", b"y"), b"\xff\x00abc".to_vec());
        assert_eq!(replace_bytes(b"abc", b"", b"y"), b"abc".to_vec());
    }

    #[test]
    fn test_install_with_prefix_text_mode() {
        let mut runtime = MockRuntime::new();
        let src = PathBuf::from("/pkgs/python-3.11.0-0/bin/python3-config");
        let dst = PathBuf::from("/envs/work/bin/python3-config");

        runtime
            .expect_read()
            .with(eq(src.clone()))
            .returning(|_| Ok(b"prefix=/opt/anaconda1anaconda2anaconda3\n".to_vec()));
        runtime
            .expect_write()
            .withf(|path, data| {
                path == Path::new("/envs/work/bin/python3-config")
                    && data == b"prefix=/envs/work\n"
            })
            .returning(|_, _| Ok(()));
        runtime
            .expect_copy_metadata()
            .with(eq(src.clone()), eq(dst.clone()))
            .returning(|_, _| Ok(()));

        let entry = PrefixEntry {
            placeholder: PREFIX_PLACEHOLDER.to_string(),
            mode: FileMode::Text,
        };
        install_with_prefix(&runtime, &src, &dst, &entry, Path::new("/envs/work")).unwrap();
    }

    #[test]
    fn test_install_with_prefix_binary_mode_copies() {
        let mut runtime = MockRuntime::new();
        let src = PathBuf::from("/pkgs/lib-1.0-0/lib/libfoo.so");
        let dst = PathBuf::from("/envs/work/lib/libfoo.so");

        runtime.expect_read().never();
        runtime
            .expect_copy()
            .with(eq(src.clone()), eq(dst.clone()))
            .returning(|_, _| Ok(42));

        let entry = PrefixEntry {
            placeholder: PREFIX_PLACEHOLDER.to_string(),
            mode: FileMode::Binary,
        };
        install_with_prefix(&runtime, &src, &dst, &entry, Path::new("/envs/work")).unwrap();
    }
}
