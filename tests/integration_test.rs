use assert_cmd::Command;
use assert_cmd::cargo;
use bzip2::Compression;
use bzip2::write::BzEncoder;
use std::fs;
use std::path::Path;
use tar::Builder;
use tempfile::tempdir;

fn create_tar_bz2(path: &Path, files: &[(&str, &str)]) {
    let mut tar_builder = Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_path(name).unwrap();
        header.set_mode(0o644);
        header.set_cksum();
        tar_builder.append(&header, content.as_bytes()).unwrap();
    }
    let tar = tar_builder.into_inner().unwrap();

    let mut encoder = BzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    std::io::copy(&mut tar.as_slice(), &mut encoder).unwrap();
    encoder.finish().unwrap();
}

/// Cached archive for `name-1.0-0` whose record carries no download location.
fn cache_package(pkgs: &Path, name: &str, depends: &[&str], files: &[(&str, &str)]) {
    fs::create_dir_all(pkgs).unwrap();
    let manifest: String = files.iter().map(|(f, _)| format!("{}\n", f)).collect();
    let index = serde_json::json!({
        "name": name,
        "version": "1.0",
        "build": "0",
        "build_number": 0,
        "depends": depends,
    })
    .to_string();

    let mut entries = files.to_vec();
    entries.push(("info/files", manifest.as_str()));
    entries.push(("info/index.json", index.as_str()));
    create_tar_bz2(&pkgs.join(format!("{}-1.0-0.tar.bz2", name)), &entries);
}

fn envfarm(root: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("envfarm"));
    cmd.arg("--root")
        .arg(root)
        .env_remove("CONDA_PREFIX")
        .env_remove("ENVFARM_PKGS_DIR")
        .env_remove("ENVFARM_INDEX");
    cmd
}

/// Root with environment `work` holding `python` and `app`, and a channel listing both.
fn setup_root(root: &Path) {
    fs::create_dir_all(root.join("conda-meta")).unwrap();
    let pkgs = root.join("pkgs");
    cache_package(&pkgs, "python", &[], &[("bin/python", "elf")]);
    cache_package(&pkgs, "app", &["python"], &[("bin/app", "#!/usr/bin/env python\n")]);

    let channel = root.join("channel");
    fs::create_dir_all(&channel).unwrap();
    fs::write(
        channel.join("repodata.json"),
        serde_json::json!({
            "packages": {
                "python-1.0-0.tar.bz2": {"name": "python", "version": "1.0", "build": "0", "build_number": 0, "depends": []},
                "app-1.0-0.tar.bz2": {"name": "app", "version": "1.0", "build": "0", "build_number": 0, "depends": ["python"]}
            }
        })
        .to_string(),
    )
    .unwrap();

    for package in ["python-1.0-0", "app-1.0-0"] {
        envfarm(root).args(["extract", package]).assert().success();
        envfarm(root)
            .args(["activate", package, "-n", "work"])
            .assert()
            .success()
            .stdout(predicates::str::contains(format!("Activated {}", package)));
    }

    let work = root.join("envs/work");
    fs::create_dir_all(work.join("etc")).unwrap();
    fs::write(work.join("etc/app.ini"), format!("home={}\n", work.display())).unwrap();
}

#[test]
fn test_end_to_end_rename() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    setup_root(&root);
    let work = root.join("envs/work");
    let renamed = root.join("envs/renamed");

    envfarm(&root)
        .args(["rename", "-n", "work", "renamed", "--dry-run", "--index"])
        .arg(root.join("channel"))
        .assert()
        .success()
        .stdout(predicates::str::contains("Dry run action: extract python-1.0-0"))
        .stdout(predicates::str::contains("Dry run action: link app-1.0-0"))
        .stdout(predicates::str::contains("Dry run action: remove"));
    assert!(work.join("bin/app").exists());
    assert!(!renamed.exists());

    envfarm(&root)
        .args(["rename", "-n", "work", "renamed", "--index"])
        .arg(root.join("channel"))
        .assert()
        .success()
        .stdout(predicates::str::contains("Renamed"));

    assert!(!work.exists());
    assert_eq!(fs::read_to_string(renamed.join("bin/python")).unwrap(), "elf");
    assert!(renamed.join("bin/app").exists());
    assert!(renamed.join("conda-meta/app-1.0-0.json").exists());
    assert_eq!(
        fs::read_to_string(renamed.join("etc/app.ini")).unwrap(),
        format!("home={}\n", renamed.display())
    );
}

#[test]
fn test_rename_with_relative_prefixes_rewrites_absolute_paths() {
    let dir = tempdir().unwrap();
    // The child's current directory comes back with symlinks resolved
    let root = dir.path().canonicalize().unwrap().join("root");
    setup_root(&root);
    let envs = root.join("envs");

    envfarm(&root)
        .current_dir(&envs)
        .args(["rename", "-p", "./work", "./moved", "--index"])
        .arg(root.join("channel"))
        .assert()
        .success()
        .stdout(predicates::str::contains(format!("Renamed {}", envs.join("work").display())));

    let moved = envs.join("moved");
    assert!(!envs.join("work").exists());
    assert_eq!(
        fs::read_to_string(moved.join("etc/app.ini")).unwrap(),
        format!("home={}\n", moved.display())
    );
    assert!(moved.join("bin/app").exists());
}

#[test]
fn test_activate_with_relative_prefix_links_into_absolute_prefix() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("root");
    setup_root(&root);

    envfarm(&root)
        .current_dir(&root)
        .args(["activate", "python-1.0-0", "-p", "./solo"])
        .assert()
        .success()
        .stdout(predicates::str::contains(format!("in {}", root.join("solo").display())));
    assert_eq!(fs::read_to_string(root.join("solo/bin/python")).unwrap(), "elf");
}

#[test]
fn test_rename_without_index_fails_for_unlocated_packages() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    setup_root(&root);

    envfarm(&root)
        .args(["rename", "-n", "work", "renamed"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("Package index unavailable"));
    assert!(root.join("envs/work/bin/app").exists());
    assert!(!root.join("envs/renamed").exists());
}

#[test]
fn test_rename_onto_existing_destination_needs_force() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    setup_root(&root);
    let existing = root.join("envs/renamed");
    fs::create_dir_all(existing.join("conda-meta")).unwrap();
    fs::write(existing.join("old.txt"), "old").unwrap();

    envfarm(&root)
        .args(["rename", "-n", "work", "renamed", "--index"])
        .arg(root.join("channel"))
        .assert()
        .failure()
        .stderr(predicates::str::contains("already exists"));
    assert!(existing.join("old.txt").exists());

    envfarm(&root)
        .args(["rename", "-n", "work", "renamed", "--force", "--index"])
        .arg(root.join("channel"))
        .assert()
        .success();
    assert!(!existing.join("old.txt").exists());
    assert!(existing.join("bin/app").exists());
    assert!(!root.join("envs/renamed.envfarm-backup").exists());
}

#[test]
fn test_rename_root_environment_is_refused() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    fs::create_dir_all(root.join("conda-meta")).unwrap();

    envfarm(&root)
        .args(["rename", "-n", "base", "renamed"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("root environment"));
}

#[test]
fn test_deactivate_removes_package_files() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    setup_root(&root);

    envfarm(&root)
        .args(["deactivate", "app-1.0-0", "-n", "work"])
        .assert()
        .success()
        .stdout(predicates::str::contains("removed 1 file(s)"));

    let work = root.join("envs/work");
    assert!(!work.join("bin/app").exists());
    assert!(work.join("bin/python").exists());
    assert!(!work.join("conda-meta/app-1.0-0.json").exists());
}
