use anyhow::{Context, Result};
use log::debug;
use std::path::Path;

use crate::runtime::Runtime;

/// Copy `src` to `dst`, replacing `old_prefix` by `new_prefix` inside text files.
///
/// Symlinks are recreated; absolute targets inside `old_prefix` are moved to
/// `new_prefix`. Content that is not valid UTF-8 is copied byte for byte.
/// Permissions and modification time follow the source.
pub fn copy_with_rewrite<R: Runtime + ?Sized>(
    runtime: &R,
    src: &Path,
    dst: &Path,
    old_prefix: &Path,
    new_prefix: &Path,
) -> Result<()> {
    if let Some(parent) = dst.parent() {
        runtime.create_dir_all(parent)?;
    }

    if runtime.is_symlink(src) {
        let target = runtime.read_link(src)?;
        let target = if target.is_absolute()
            && let Ok(rest) = target.strip_prefix(old_prefix)
        {
            new_prefix.join(rest)
        } else {
            target
        };
        return runtime.symlink(&target, dst);
    }

    let data = runtime.read(src)?;
    let contents = match String::from_utf8(data) {
        Ok(text) => {
            let old = old_prefix.to_string_lossy();
            let new = new_prefix.to_string_lossy();
            if text.contains(old.as_ref()) {
                debug!("Rewriting prefix in {:?}", dst);
            }
            text.replace(old.as_ref(), new.as_ref()).into_bytes()
        }
        Err(e) => e.into_bytes(),
    };

    runtime
        .write(dst, &contents)
        .with_context(|| format!("Failed to copy {:?} to {:?}", src, dst))?;
    runtime.copy_metadata(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_text_file_prefix_is_rewritten() -> Result<()> {
        let dir = tempdir()?;
        let old = dir.path().join("envs/old");
        let new = dir.path().join("envs/new");
        fs::create_dir_all(old.join("etc"))?;
        fs::write(
            old.join("etc/app.cfg"),
            format!("home={0}\nplugins={0}/plugins\n", old.display()),
        )?;

        copy_with_rewrite(
            &RealRuntime,
            &old.join("etc/app.cfg"),
            &new.join("etc/app.cfg"),
            &old,
            &new,
        )?;

        assert_eq!(
            fs::read_to_string(new.join("etc/app.cfg"))?,
            format!("home={0}\nplugins={0}/plugins\n", new.display())
        );
        Ok(())
    }

    #[test]
    fn test_binary_file_is_copied_unchanged() -> Result<()> {
        let dir = tempdir()?;
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        fs::create_dir_all(&old)?;

        let mut blob = vec![0xff, 0xfe, 0x00];
        blob.extend_from_slice(old.to_string_lossy().as_bytes());
        blob.push(0x80);
        fs::write(old.join("blob.bin"), &blob)?;

        copy_with_rewrite(&RealRuntime, &old.join("blob.bin"), &new.join("blob.bin"), &old, &new)?;

        assert_eq!(fs::read(new.join("blob.bin"))?, blob);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_and_mtime_follow_source() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, SystemTime};

        let dir = tempdir()?;
        let src = dir.path().join("run.sh");
        fs::write(&src, "#!/bin/sh\n")?;
        fs::set_permissions(&src, fs::Permissions::from_mode(0o750))?;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::File::options().write(true).open(&src)?.set_modified(mtime)?;

        let dst = dir.path().join("copy/run.sh");
        copy_with_rewrite(&RealRuntime, &src, &dst, Path::new("/nowhere"), Path::new("/elsewhere"))?;

        let meta = fs::metadata(&dst)?;
        assert_eq!(meta.permissions().mode() & 0o777, 0o750);
        assert_eq!(meta.modified()?, mtime);
        Ok(())
    }

    #[test]
    fn test_symlink_target_inside_prefix_is_moved() {
        let mut runtime = MockRuntime::new();
        let src = PathBuf::from("/envs/old/bin/current");
        let dst = PathBuf::from("/envs/new/bin/current");

        runtime
            .expect_create_dir_all()
            .with(eq(PathBuf::from("/envs/new/bin")))
            .returning(|_| Ok(()));
        runtime
            .expect_is_symlink()
            .with(eq(src.clone()))
            .returning(|_| true);
        runtime
            .expect_read_link()
            .with(eq(src.clone()))
            .returning(|_| Ok(PathBuf::from("/envs/old/opt/tool-2")));
        runtime
            .expect_symlink()
            .with(eq(PathBuf::from("/envs/new/opt/tool-2")), eq(dst.clone()))
            .returning(|_, _| Ok(()));
        runtime.expect_read().never();

        copy_with_rewrite(&runtime, &src, &dst, Path::new("/envs/old"), Path::new("/envs/new")).unwrap();
    }
}
