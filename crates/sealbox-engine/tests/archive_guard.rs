//! Crafted archives must be refused before anything is written.

use std::path::Path;
use std::process::Command;

use sealbox_core::config::SealConfig;
use sealbox_core::SealError;
use sealbox_engine::ArchiveBundler;

/// `tar -P` keeps `..` and leading `/` in member names.
fn crafted_archive(cwd: &Path, archive: &Path, member: &str) {
    let status = Command::new("tar")
        .arg("-C")
        .arg(cwd)
        .arg("-czPf")
        .arg(archive)
        .arg(member)
        .status()
        .unwrap();
    assert!(status.success());
}

fn bundler() -> ArchiveBundler {
    ArchiveBundler::new(&SealConfig::default())
}

#[tokio::test]
async fn parent_traversal_member_rejected() {
    let root = tempfile::tempdir().unwrap();
    let work = root.path().join("work");
    let dest = root.path().join("dest");
    std::fs::create_dir_all(work.join("sub")).unwrap();
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(work.join("evil"), b"payload").unwrap();

    let archive = root.path().join("evil.tar.gz");
    crafted_archive(&work.join("sub"), &archive, "../evil");
    let members = bundler().list_members(&archive).await.unwrap();
    assert!(members.iter().any(|m| m == "../evil"), "{members:?}");

    let err = bundler().extract(&archive, &dest).await.unwrap_err();
    assert!(matches!(err, SealError::Validation(_)));
    assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    assert!(!root.path().join("evil").exists());
}

#[tokio::test]
async fn absolute_member_rejected() {
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("dest");
    std::fs::create_dir(&dest).unwrap();
    let passwd = root.path().join("passwd");
    std::fs::write(&passwd, b"root:x:0:0").unwrap();

    let archive = root.path().join("abs.tar.gz");
    crafted_archive(root.path(), &archive, passwd.to_str().unwrap());

    let err = bundler().extract(&archive, &dest).await.unwrap_err();
    assert!(matches!(err, SealError::Validation(_)));
    assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
}

#[tokio::test]
async fn mixed_archive_rejected_as_a_whole() {
    let root = tempfile::tempdir().unwrap();
    let work = root.path().join("work");
    let dest = root.path().join("dest");
    std::fs::create_dir_all(work.join("sub")).unwrap();
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(work.join("sub/fine.txt"), b"ok").unwrap();
    std::fs::write(work.join("evil"), b"payload").unwrap();

    // the harmless member comes first in the stream
    let archive = root.path().join("mixed.tar.gz");
    let status = Command::new("tar")
        .arg("-C")
        .arg(work.join("sub"))
        .arg("-czPf")
        .arg(&archive)
        .arg("fine.txt")
        .arg("../evil")
        .status()
        .unwrap();
    assert!(status.success());

    assert!(bundler().extract(&archive, &dest).await.is_err());
    assert!(!dest.join("fine.txt").exists());
}
