use keel::codec;
use keel::config::CompressionConfig;
use serde_json::json;

fn config(enabled: bool, threshold: usize) -> CompressionConfig {
    CompressionConfig {
        enabled,
        threshold,
        ..CompressionConfig::default()
    }
}

// --- Framing ---

#[test]
fn compress_frames_with_magic() {
    let out = codec::compress(b"hello world", 6).unwrap();
    assert_eq!(&out[..2], &codec::MAGIC);
    assert!(codec::is_compressed(&out));
}

#[test]
fn round_trip_preserves_bytes() {
    let raw = br#"{"count":2,"name":"timeline","values":[1,2,3,4,5]}"#.repeat(20);
    let packed = codec::compress(&raw, 6).unwrap();
    assert!(packed.len() < raw.len());
    assert_eq!(codec::decompress(&packed).unwrap(), raw);
}

#[test]
fn level_zero_still_frames() {
    let packed = codec::compress(b"abc", 0).unwrap();
    assert!(codec::is_compressed(&packed));
    assert_eq!(codec::decompress(&packed).unwrap(), b"abc");
}

#[test]
fn decompress_rejects_unframed_input() {
    assert!(matches!(
        codec::decompress(b"{\"raw\":true}"),
        Err(keel::CodecError::MissingHeader)
    ));
}

#[test]
fn decompress_rejects_corrupt_stream() {
    let mut packed = codec::compress(b"some payload that compresses", 6).unwrap();
    let len = packed.len();
    packed.truncate(len - 3);
    packed.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    assert!(codec::decompress(&packed).is_err());
}

// --- Value encoding ---

#[test]
fn small_values_stay_raw_json() {
    let value = json!({"a": 1});
    let bytes = codec::encode_value(&value, &config(true, 100)).unwrap();
    assert!(!codec::is_compressed(&bytes));
    assert_eq!(codec::decode_value(&bytes).unwrap(), value);
}

#[test]
fn large_values_compress() {
    let value = json!({"text": "x".repeat(500)});
    let bytes = codec::encode_value(&value, &config(true, 100)).unwrap();
    assert!(codec::is_compressed(&bytes));
    assert_eq!(codec::decode_value(&bytes).unwrap(), value);
}

#[test]
fn disabled_config_never_compresses() {
    let value = json!({"text": "x".repeat(500)});
    let bytes = codec::encode_value(&value, &config(false, 0)).unwrap();
    assert!(!codec::is_compressed(&bytes));
    assert_eq!(codec::decode_value(&bytes).unwrap(), value);
}

#[test]
fn decode_value_reads_plain_json() {
    let value = codec::decode_value(br#"{"k":"v"}"#).unwrap();
    assert_eq!(value, json!({"k": "v"}));
}

// --- Blob encoding ---

#[test]
fn blob_round_trip() {
    let raw = br#"[{"id":"01H","type":"NEXT"}]"#.repeat(30);
    let packed = codec::encode_bytes(&raw, &config(true, 100)).unwrap();
    assert!(codec::is_compressed(&packed));
    assert_eq!(codec::decode_bytes(&packed).unwrap(), raw);
}

#[test]
fn blob_below_threshold_stays_raw() {
    let raw = b"[]";
    let packed = codec::encode_bytes(raw, &config(true, 100)).unwrap();
    assert_eq!(packed, raw);
    assert_eq!(codec::decode_bytes(&packed).unwrap(), raw);
}
