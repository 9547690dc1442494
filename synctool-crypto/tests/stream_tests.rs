use proptest::prelude::*;
use synctool_crypto::{
    decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, sealed_len, CryptoError,
    FileSecret, StreamDecryptor, StreamEncryptor, CHUNK_SIZE, HEADER_SIZE, SEALED_CHUNK_SIZE,
};

fn seal(secret: &FileSecret, plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encrypt_stream(secret, &mut &plaintext[..], &mut out).unwrap();
    out
}

fn open(secret: &FileSecret, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    decrypt_stream(secret, &mut &ciphertext[..], &mut out)?;
    Ok(out)
}

// ── Round trips at chunk boundaries ──────────────────────────────

#[test]
fn empty_plaintext_roundtrip() {
    let secret = FileSecret::generate();
    let sealed = seal(&secret, b"");
    assert_eq!(sealed.len() as u64, sealed_len(0));
    assert_eq!(open(&secret, &sealed).unwrap(), b"");
}

#[test]
fn exact_chunk_multiple_roundtrip() {
    let secret = FileSecret::generate();
    let plaintext = vec![0xAB; CHUNK_SIZE * 2];
    let sealed = seal(&secret, &plaintext);
    assert_eq!(sealed.len() as u64, sealed_len(plaintext.len() as u64));
    assert_eq!(open(&secret, &sealed).unwrap(), plaintext);
}

#[test]
fn one_byte_past_chunk_roundtrip() {
    let secret = FileSecret::generate();
    let plaintext: Vec<u8> = (0..CHUNK_SIZE + 1).map(|i| (i % 251) as u8).collect();
    let sealed = seal(&secret, &plaintext);
    assert_eq!(open(&secret, &sealed).unwrap(), plaintext);
}

#[test]
fn header_starts_with_magic() {
    let secret = FileSecret::generate();
    let sealed = seal(&secret, b"hello");
    assert_eq!(&sealed[..4], b"STC1");
}

// ── Adversarial ──────────────────────────────────────────────────

#[test]
fn wrong_secret_fails() {
    let sealed = seal(&FileSecret::generate(), b"secret contents");
    let err = open(&FileSecret::generate(), &sealed).unwrap_err();
    assert!(matches!(err, CryptoError::Decryption(_)), "got {err:?}");
}

#[test]
fn flipped_byte_fails() {
    let secret = FileSecret::generate();
    let mut sealed = seal(&secret, b"secret contents");
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(open(&secret, &sealed).is_err());
}

#[test]
fn dropping_final_chunk_is_detected() {
    let secret = FileSecret::generate();
    let plaintext = vec![7u8; CHUNK_SIZE + 100];
    let sealed = seal(&secret, &plaintext);
    let truncated = &sealed[..HEADER_SIZE + SEALED_CHUNK_SIZE];
    let err = open(&secret, truncated).unwrap_err();
    assert!(matches!(err, CryptoError::Truncated), "got {err:?}");
}

#[test]
fn header_only_is_truncated() {
    let secret = FileSecret::generate();
    let sealed = seal(&secret, b"abc");
    let err = open(&secret, &sealed[..HEADER_SIZE]).unwrap_err();
    assert!(matches!(err, CryptoError::Truncated), "got {err:?}");
}

#[test]
fn garbage_header_rejected() {
    let secret = FileSecret::generate();
    let err = open(&secret, &[0u8; 64]).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidHeader(_)), "got {err:?}");
}

#[test]
fn reordered_chunks_fail() {
    let secret = FileSecret::generate();
    let plaintext = vec![1u8; CHUNK_SIZE * 2 + 10];
    let sealed = seal(&secret, &plaintext);
    let body = &sealed[HEADER_SIZE..];
    let mut swapped = sealed[..HEADER_SIZE].to_vec();
    swapped.extend_from_slice(&body[SEALED_CHUNK_SIZE..SEALED_CHUNK_SIZE * 2]);
    swapped.extend_from_slice(&body[..SEALED_CHUNK_SIZE]);
    swapped.extend_from_slice(&body[SEALED_CHUNK_SIZE * 2..]);
    assert!(open(&secret, &swapped).is_err());
}

// ── Push API fed in odd slices ───────────────────────────────────

#[test]
fn push_api_accepts_arbitrary_slicing() {
    let secret = FileSecret::generate();
    let plaintext: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 13) as u8).collect();

    let mut enc = StreamEncryptor::new(&secret);
    let mut sealed = enc.header().to_vec();
    for piece in plaintext.chunks(1000) {
        sealed.extend(enc.update(piece).unwrap());
    }
    sealed.extend(enc.finish().unwrap());

    let mut dec = StreamDecryptor::new(&secret);
    let mut recovered = Vec::new();
    for piece in sealed.chunks(777) {
        recovered.extend(dec.update(piece).unwrap());
    }
    recovered.extend(dec.finish().unwrap());

    assert_eq!(recovered, plaintext);
}

// ── File helpers ─────────────────────────────────────────────────

#[test]
fn file_helpers_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("plain.txt");
    let enc = dir.path().join("plain.txt.crypt");
    let out = dir.path().join("restored.txt");
    std::fs::write(&src, b"file contents to protect").unwrap();

    let secret = FileSecret::generate();
    let sealed = encrypt_file(&secret, &src, &enc).unwrap();
    assert_eq!(sealed, std::fs::metadata(&enc).unwrap().len());
    assert_ne!(std::fs::read(&enc).unwrap(), std::fs::read(&src).unwrap());

    let plain = decrypt_file(&secret, &enc, &out).unwrap();
    assert_eq!(plain, 24);
    assert_eq!(std::fs::read(&out).unwrap(), b"file contents to protect");
}

#[test]
fn secret_serde_roundtrip() {
    let secret = FileSecret::generate();
    let json = serde_json::to_string(&secret).unwrap();
    let back: FileSecret = serde_json::from_str(&json).unwrap();
    assert_eq!(secret, back);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn arbitrary_plaintext_roundtrips(plaintext in proptest::collection::vec(any::<u8>(), 0..200_000)) {
        let secret = FileSecret::generate();
        let sealed = seal(&secret, &plaintext);
        prop_assert_eq!(sealed.len() as u64, sealed_len(plaintext.len() as u64));
        prop_assert_eq!(open(&secret, &sealed).unwrap(), plaintext);
    }
}

#[test]
fn encrypt_file_never_overwrites_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("plain.txt");
    let dst = dir.path().join("plain.txt.crypt");
    std::fs::write(&src, b"new contents").unwrap();
    std::fs::write(&dst, b"somebody else's file").unwrap();

    let err = encrypt_file(&FileSecret::generate(), &src, &dst).unwrap_err();

    assert!(matches!(err, CryptoError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists), "got {err:?}");
    assert_eq!(std::fs::read(&dst).unwrap(), b"somebody else's file");
}
