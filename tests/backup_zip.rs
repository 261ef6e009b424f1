#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip_with_uploads() {
    let workspace = temp_dir("enrolld-backup-src");
    let workspace2 = temp_dir("enrolld-backup-dst");
    let out_dir = temp_dir("enrolld-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("enrollment.sqlite3"), bytes).expect("write source db");
    let pictures = workspace.join("uploads").join("profile_pictures");
    std::fs::create_dir_all(&pictures).expect("create uploads");
    std::fs::write(pictures.join("2024-0001-a.png"), b"png").expect("write picture");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 3);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    archive
        .by_name("db/enrollment.sqlite3")
        .expect("database entry in bundle");
    archive
        .by_name("uploads/profile_pictures/2024-0001-a.png")
        .expect("upload entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.restored_uploads, 1);

    let restored = std::fs::read(workspace2.join("enrollment.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    let picture = std::fs::read(
        workspace2
            .join("uploads")
            .join("profile_pictures")
            .join("2024-0001-a.png"),
    )
    .expect("read restored picture");
    assert_eq!(picture, b"png");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("enrolld-backup-raw");
    let workspace = temp_dir("enrolld-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    assert_eq!(import.restored_uploads, 0);

    let restored =
        std::fs::read(workspace.join("enrollment.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_without_database_fails() {
    let workspace = temp_dir("enrolld-backup-empty");
    let out = workspace.join("out.zip");
    let e = backup::export_workspace_bundle(&workspace, &out).expect_err("no database");
    assert!(e.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}
