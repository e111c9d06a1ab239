use crate::block::{decode, decode_size_field, BLOCK_SIZE};
use crate::error::ThawError;
use crate::testutil::header_block;

#[test]
fn octal_size_decodes() {
    let field = b"0000001234\0\0";
    assert_eq!(decode_size_field(field).unwrap(), 0o1234);
    assert_eq!(decode_size_field(field).unwrap(), 668);
}

#[test]
fn base256_size_decodes() {
    // 2^33 does not fit an 11-digit octal field comfortably enough for the
    // serializer, which flips to base-256: marker byte then big-endian.
    let mut field = [0u8; 12];
    field[0] = 0x80;
    field[7] = 0x02; // 2 << (4*8) == 2^33
    assert_eq!(decode_size_field(&field).unwrap(), 1u64 << 33);
}

#[test]
fn octal_size_without_nul_fails() {
    let field = b"777777777777";
    assert!(decode_size_field(field).is_err());
}

#[test]
fn octal_size_with_bad_digit_fails() {
    let field = b"0000001294\0\0";
    assert!(matches!(
        decode_size_field(field),
        Err(ThawError::BadBlock(_))
    ));
}

#[test]
fn empty_size_field_fails() {
    let field = [0u8; 12];
    assert!(decode_size_field(&field).is_err());
}

#[test]
fn all_zero_block_is_terminator() {
    let raw = [0u8; BLOCK_SIZE];
    assert!(decode(&raw).unwrap().is_none());
}

#[test]
fn header_roundtrip() {
    let raw = header_block("mydb.lrl", 700, 0o640);
    let header = decode(&raw).unwrap().unwrap();
    assert_eq!(header.filename, "mydb.lrl");
    assert_eq!(header.size, 700);
    assert_eq!(header.mode, 0o640);
    assert_eq!(header.content_blocks(), 2);
    assert_eq!(header.padding(), 324);
}

#[test]
fn block_aligned_size_has_no_padding() {
    let raw = header_block("t1.dta", 1024, 0o644);
    let header = decode(&raw).unwrap().unwrap();
    assert_eq!(header.content_blocks(), 2);
    assert_eq!(header.padding(), 0);
}

#[test]
fn unterminated_filename_fails() {
    let mut raw = header_block("x", 0, 0o644);
    raw[..100].fill(b'a');
    assert!(matches!(decode(&raw), Err(ThawError::BadBlock(_))));
}

#[test]
fn garbled_mode_degrades_to_zero() {
    let mut raw = header_block("t1.dta", 512, 0o644);
    raw[100..108].copy_from_slice(b"zzzzzzz\0");
    let header = decode(&raw).unwrap().unwrap();
    assert_eq!(header.mode, 0);
    assert_eq!(header.size, 512);
}
