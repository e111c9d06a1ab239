use std::io::Cursor;
use std::path::Path;

use crate::config::RestoreOptions;
use crate::context::RestoreContext;
use crate::error::ThawError;
use crate::increment::{apply_segment, parse_increment_manifest, Patch};
use crate::stream::ArchiveSource;
use crate::testutil::ArchiveBuilder;

fn test_ctx(data_dir: &Path) -> RestoreContext {
    let mut ctx = RestoreContext::new(&RestoreOptions::default());
    ctx.data_dir = Some(data_dir.to_path_buf());
    ctx.db_name = Some("mydb".to_string());
    ctx
}

fn test_opts() -> RestoreOptions {
    RestoreOptions {
        percent_full: 100,
        ..RestoreOptions::default()
    }
}

#[test]
fn parses_increment_manifest() {
    let text = "\
# increment 3
Updated t1.dta Type berkdb PageSize 4096
Patch t1.dta 100 50
Patch t1.dta 140 10
New t2.dta Type berkdb PageSize 4096
Deleted t3.dta
Option -setattr foo 1
Fingerprint deadbeef
";
    let m = parse_increment_manifest(text).unwrap();
    assert_eq!(m.file_order, vec!["t1.dta", "t2.dta"]);
    assert_eq!(
        m.updated["t1.dta"].1,
        vec![
            Patch {
                offset: 100,
                len: 50
            },
            Patch {
                offset: 140,
                len: 10
            }
        ]
    );
    assert!(m.new_files.contains_key("t2.dta"));
    assert!(m.deleted.contains("t3.dta"));
    assert_eq!(m.options, vec!["-setattr", "foo", "1"]);
    assert_eq!(m.fingerprint.as_deref(), Some("deadbeef"));
}

#[test]
fn unknown_increment_directive_is_fatal() {
    assert!(matches!(
        parse_increment_manifest("Shrink t1.dta\n"),
        Err(ThawError::Increment(_))
    ));
}

#[test]
fn patch_for_undeclared_file_is_fatal() {
    assert!(parse_increment_manifest("Patch ghost.dta 0 10\n").is_err());
}

#[test]
fn applies_overlapping_patches_in_declared_order() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("t1.dta"), vec![b'a'; 200]).unwrap();

    let manifest = "\
Updated t1.dta Type plain PageSize 4096
Patch t1.dta 100 50
Patch t1.dta 140 10
";
    let mut payload = vec![b'b'; 50];
    payload.extend(vec![b'c'; 10]);

    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .file("0001.data", &payload)
        .terminator()
        .finish();

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(apply_segment(&mut source, &mut ctx, &test_opts()).unwrap());

    let out = std::fs::read(tmp.path().join("t1.dta")).unwrap();
    assert_eq!(&out[..100], &[b'a'; 100][..]);
    assert_eq!(&out[100..140], &[b'b'; 40][..]);
    // The later patch landed after the earlier one: its bytes survive in
    // the overlap.
    assert_eq!(&out[140..150], &[b'c'; 10][..]);
    assert_eq!(&out[150..], &[b'a'; 50][..]);
}

#[test]
fn patches_may_span_multiple_data_blocks() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("t1.dta"), vec![0u8; 64]).unwrap();

    let manifest = "Updated t1.dta\nPatch t1.dta 0 30\n";
    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .file("0001.data", &vec![1u8; 20])
        .file("0002.data", &vec![2u8; 10])
        .terminator()
        .finish();

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(apply_segment(&mut source, &mut ctx, &test_opts()).unwrap());

    let out = std::fs::read(tmp.path().join("t1.dta")).unwrap();
    assert_eq!(&out[..20], &[1u8; 20][..]);
    assert_eq!(&out[20..30], &[2u8; 10][..]);
    assert_eq!(&out[30..], &[0u8; 34][..]);
}

#[test]
fn deletes_new_files_and_log_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let logs = tmp.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("log.0000000001"), b"old log").unwrap();
    std::fs::write(logs.join("keepme.txt"), b"not a log").unwrap();
    std::fs::write(tmp.path().join("gone.dta"), b"stale").unwrap();

    let manifest = "New fresh.dta Type plain\nDeleted gone.dta\n";
    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .file("fresh.dta", b"fresh content")
        .terminator()
        .finish();

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(apply_segment(&mut source, &mut ctx, &test_opts()).unwrap());

    assert!(!tmp.path().join("gone.dta").exists());
    assert!(!logs.join("log.0000000001").exists());
    assert!(logs.join("keepme.txt").exists());
    assert_eq!(
        std::fs::read(tmp.path().join("fresh.dta")).unwrap(),
        b"fresh content"
    );
}

#[test]
fn unapplied_patches_at_segment_end_are_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("t1.dta"), vec![0u8; 64]).unwrap();

    let manifest = "Updated t1.dta\nPatch t1.dta 0 30\n";
    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .terminator()
        .finish();

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(matches!(
        apply_segment(&mut source, &mut ctx, &test_opts()),
        Err(ThawError::Increment(_))
    ));
}

#[test]
fn excess_payload_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("t1.dta"), vec![0u8; 64]).unwrap();

    let manifest = "Updated t1.dta\nPatch t1.dta 0 10\n";
    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .file("0001.data", &vec![9u8; 40])
        .terminator()
        .finish();

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(apply_segment(&mut source, &mut ctx, &test_opts()).is_err());
}

#[test]
fn clean_end_of_stream_reports_no_segment() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = test_ctx(tmp.path());

    let mut empty = ArchiveSource::new(Cursor::new(Vec::new()));
    assert!(!apply_segment(&mut empty, &mut ctx, &test_opts()).unwrap());

    // A trailing terminator block after the last segment also means done.
    let mut trailing =
        ArchiveSource::new(Cursor::new(ArchiveBuilder::new().terminator().finish()));
    assert!(!apply_segment(&mut trailing, &mut ctx, &test_opts()).unwrap());
}

#[test]
fn stream_ending_inside_segment_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = "Updated t1.dta\n";
    let stream = ArchiveBuilder::new()
        .file("INCR_MANIFEST", manifest.as_bytes())
        .finish(); // no terminator

    let mut ctx = test_ctx(tmp.path());
    let mut source = ArchiveSource::new(Cursor::new(stream));
    assert!(apply_segment(&mut source, &mut ctx, &test_opts()).is_err());
}
