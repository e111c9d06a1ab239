use std::io::Cursor;

use crate::block::BLOCK_SIZE;
use crate::materialize::{materialize, MaterializeParams};
use crate::stream::ArchiveSource;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Content + block padding + a trailing marker byte, so tests can verify
/// the stream is left exactly at the next block boundary.
fn stream_for(content: &[u8]) -> (Vec<u8>, u64) {
    let padding = (BLOCK_SIZE - content.len() % BLOCK_SIZE) % BLOCK_SIZE;
    let mut bytes = content.to_vec();
    bytes.extend(std::iter::repeat(0u8).take(padding));
    bytes.push(0xEE);
    (bytes, padding as u64)
}

fn run_one(content: &[u8], page_size: usize, sparse: bool, workers: usize) -> (Vec<u8>, u64) {
    let tmp = tempfile::tempdir().unwrap();
    let dest_path = tmp.path().join("out.dta");
    let (bytes, padding) = stream_for(content);
    let mut source = ArchiveSource::new(Cursor::new(bytes));

    let params = MaterializeParams {
        filename: "out.dta",
        dest_dir: tmp.path(),
        dest_path: &dest_path,
        size: content.len() as u64,
        page_size,
        sparse,
        workers,
        percent_full: 100,
    };
    let written = materialize(&mut source, padding, &params).unwrap();

    // Padding fully drained: the marker is the next byte.
    let mut marker = [0u8; 1];
    source.read_exact(&mut marker).unwrap();
    assert_eq!(marker[0], 0xEE);

    (std::fs::read(&dest_path).unwrap(), written)
}

#[test]
fn roundtrips_various_sizes_and_worker_counts() {
    for &len in &[1usize, 511, 512, 4096, 3 * 4096 + 17] {
        for &workers in &[1usize, 4] {
            let content = pattern(len);
            let (out, written) = run_one(&content, 4096, false, workers);
            assert_eq!(out, content, "len={} workers={}", len, workers);
            assert_eq!(written, len as u64);
        }
    }
}

#[test]
fn large_file_with_many_chunks() {
    // Small page size keeps the chunk small relative to the content so
    // several claim/write cycles happen per worker.
    let content = pattern(64 * 1024 + 123);
    let tmp = tempfile::tempdir().unwrap();
    let dest_path = tmp.path().join("big.dta");
    let (bytes, padding) = stream_for(&content);
    let mut source = ArchiveSource::new(Cursor::new(bytes));

    let params = MaterializeParams {
        filename: "big.dta",
        dest_dir: tmp.path(),
        dest_path: &dest_path,
        size: content.len() as u64,
        page_size: 512,
        sparse: true, // keeps the chunk at page size
        workers: 4,
        percent_full: 100,
    };
    materialize(&mut source, padding, &params).unwrap();
    assert_eq!(std::fs::read(&dest_path).unwrap(), content);
}

#[test]
fn sparse_chunks_are_skipped_but_content_is_preserved() {
    let page = 4096usize;
    let mut content = vec![0u8; page * 3];
    content[page..2 * page].fill(b'x');

    let (out, written) = run_one(&content, page, true, 2);
    assert_eq!(out.len(), content.len());
    assert_eq!(out, content);
    // Only the non-zero page was physically written.
    assert_eq!(written, page as u64);
}

#[test]
fn sparse_tail_keeps_logical_size() {
    let page = 4096usize;
    let mut content = vec![0u8; page * 4];
    content[..page].fill(b'y');

    let (out, written) = run_one(&content, page, true, 3);
    assert_eq!(out.len(), page * 4);
    assert_eq!(out, content);
    assert_eq!(written, page as u64);
}

#[test]
fn empty_file_materializes() {
    let (out, written) = run_one(&[], 4096, false, 2);
    assert!(out.is_empty());
    assert_eq!(written, 0);
}

#[test]
fn truncated_stream_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let dest_path = tmp.path().join("short.dta");
    // Header will claim 1024 bytes; only 100 arrive.
    let mut source = ArchiveSource::new(Cursor::new(vec![7u8; 100]));

    let params = MaterializeParams {
        filename: "short.dta",
        dest_dir: tmp.path(),
        dest_path: &dest_path,
        size: 1024,
        page_size: 4096,
        sparse: false,
        workers: 2,
        percent_full: 100,
    };
    assert!(materialize(&mut source, 0, &params).is_err());
}
