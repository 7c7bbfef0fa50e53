use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use archive_engine::crypto::kdf::RustArgon2;
use archive_engine::format::reader::StreamReader;
use archive_engine::format::{header, varint};
use archive_engine::{
    ArchiveError, Argon2Backend, Argon2Options, CompressOptions, CryptoAlgorithm, Decryptor,
    EncryptOptions, Encryptor, ErrorClass, InputChunk, chunks_of,
};
use bytes::Bytes;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::tempdir;

fn collect<I: Iterator<Item = archive_engine::Result<Bytes>>>(iter: I) -> archive_engine::Result<Vec<u8>> {
    let mut out = Vec::new();
    for chunk in iter {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

fn encrypt_chunks(chunks: &[&[u8]], password: &str, options: EncryptOptions) -> Vec<u8> {
    let source = chunks_of(chunks.iter().map(|c| c.to_vec()));
    let archive = Encryptor::new(options)
        .encrypt_iter(source, password)
        .expect("start encryption");
    collect(archive).expect("encrypt chunks")
}

fn decrypt_chunks(chunks: Vec<Vec<u8>>, password: &str) -> archive_engine::Result<Vec<u8>> {
    collect(Decryptor::new().decrypt_iter(chunks_of(chunks), password)?)
}

fn all_options() -> Vec<EncryptOptions> {
    let mut out = Vec::new();
    for algorithm in [CryptoAlgorithm::Aes256Gcm, CryptoAlgorithm::ChaCha20Poly1305] {
        for compress in [None, Some(CompressOptions::gzip()), Some(CompressOptions::brotli())] {
            out.push(EncryptOptions {
                algorithm,
                compress,
                ..EncryptOptions::default()
            });
        }
    }
    out
}

#[test]
fn repeated_digits_decrypt_only_with_exact_password() {
    // 20 个 chunk，每个都是 "123456789"，默认 chacha20-poly1305、不压缩
    let chunks = vec![b"123456789".as_slice(); 20];
    let archive = encrypt_chunks(&chunks, "dragon", EncryptOptions::default());

    let decrypted = archive_engine::decrypt(archive.clone(), "dragon").expect("decrypt");
    assert_eq!(decrypted, b"123456789".repeat(20));

    let err = archive_engine::decrypt(archive, "dragon ").unwrap_err();
    assert!(matches!(err, ArchiveError::Authentication));
}

#[test]
fn roundtrip_across_algorithms_and_compression() {
    let chunks: Vec<&[u8]> = vec![b"alpha ", b"", b"beta gamma ", &[0u8; 300], b"delta"];
    let expected: Vec<u8> = chunks.concat();

    for options in all_options() {
        let archive = encrypt_chunks(&chunks, "pw", options);
        let decrypted = archive_engine::decrypt(archive, "pw").expect("decrypt");
        assert_eq!(decrypted, expected, "options {options:?}");
    }
}

#[test]
fn archive_can_be_fed_back_in_arbitrary_slices() {
    let chunks: Vec<&[u8]> = vec![b"first chunk", b"second chunk", b"third"];
    let archive = encrypt_chunks(&chunks, "pw", EncryptOptions::default());

    for size in [1, 2, 7, 64] {
        let pieces: Vec<Vec<u8>> = archive.chunks(size).map(<[u8]>::to_vec).collect();
        let decrypted = decrypt_chunks(pieces, "pw").expect("decrypt sliced archive");
        assert_eq!(decrypted, b"first chunksecond chunkthird");
    }
}

#[test]
fn wrong_password_fails_authentication() {
    let archive =
        archive_engine::encrypt("secret payload", "correct-password", &EncryptOptions::default())
            .expect("encrypt");

    let err = archive_engine::decrypt(archive, "wrong-password").unwrap_err();
    assert_eq!(err.class(), ErrorClass::Integrity);
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let chunks: Vec<&[u8]> = vec![b"one", b"two", b"three"];
    let archive = encrypt_chunks(&chunks, "pw", EncryptOptions::default());

    let mut tampered = archive.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let err = archive_engine::decrypt(tampered, "pw").unwrap_err();
    assert!(matches!(err, ArchiveError::Authentication));
}

/// 单个 chunk 在归档中的字节位置
struct ChunkLayout {
    auth_tag_offset: usize,
    auth_tag_len: usize,
    length_offset: usize,
    ciphertext_offset: usize,
    ciphertext_len: usize,
}

fn chunk_layouts(archive: &[u8]) -> Vec<ChunkLayout> {
    fn position<S>(total: usize, reader: &StreamReader<S>) -> usize
    where
        S: Iterator<Item = archive_engine::Result<Bytes>>,
    {
        total - reader.buffered_len()
    }

    let total = archive.len();
    let mut reader = StreamReader::new(std::iter::once(Ok(Bytes::copy_from_slice(archive))));
    header::validate_cid(&mut reader).unwrap();

    let mut layouts = Vec::new();
    while !reader.is_end().unwrap() {
        let record_start = position(total, &reader);
        let auth_tag = if layouts.is_empty() {
            header::parse_header_data(&mut reader).unwrap().auth_tag
        } else {
            header::parse_simple_header_data(&mut reader).unwrap().auth_tag
        };
        let length_offset = position(total, &reader);
        let auth_tag_offset = record_start
            + archive[record_start..length_offset]
                .windows(auth_tag.len())
                .position(|w| w == auth_tag.as_slice())
                .unwrap();

        let ciphertext_len = header::read_ciphertext_length(&mut reader).unwrap();
        let ciphertext_offset = position(total, &reader);
        reader.seek(ciphertext_len).unwrap();

        layouts.push(ChunkLayout {
            auth_tag_offset,
            auth_tag_len: auth_tag.len(),
            length_offset,
            ciphertext_offset,
            ciphertext_len,
        });
    }
    layouts
}

#[test]
fn flipping_any_tag_or_ciphertext_bit_fails_authentication() {
    let chunks: Vec<&[u8]> = vec![b"first chunk", b"second chunk", b"third chunk"];

    for algorithm in [CryptoAlgorithm::Aes256Gcm, CryptoAlgorithm::ChaCha20Poly1305] {
        let options = EncryptOptions {
            algorithm,
            ..EncryptOptions::default()
        };
        let archive = encrypt_chunks(&chunks, "pw", options);
        let layouts = chunk_layouts(&archive);
        assert_eq!(layouts.len(), 3);

        for (index, layout) in layouts.iter().enumerate() {
            let tag_end = layout.auth_tag_offset + layout.auth_tag_len - 1;
            let ciphertext_end = layout.ciphertext_offset + layout.ciphertext_len - 1;
            let positions = [
                (layout.auth_tag_offset, 0x01u8),
                (tag_end, 0x80),
                (layout.ciphertext_offset, 0x01),
                (ciphertext_end, 0x40),
            ];
            for (offset, mask) in positions {
                let mut tampered = archive.clone();
                tampered[offset] ^= mask;
                let err = archive_engine::decrypt(tampered, "pw").unwrap_err();
                assert!(
                    matches!(err, ArchiveError::Authentication),
                    "{algorithm} chunk {index} offset {offset}: {err}"
                );
            }
        }
    }
}

#[test]
fn huge_declared_ciphertext_length_is_truncated_not_allocated() {
    let archive = archive_engine::encrypt("abcd", "pw", &EncryptOptions::default()).expect("encrypt");
    let layout = &chunk_layouts(&archive)[0];

    let declared: u64 = 1 << 62;
    let old_len = varint::encoded_len(layout.ciphertext_len as u64);
    let mut forged = archive[..layout.length_offset].to_vec();
    forged.extend_from_slice(&varint::encode(declared));
    forged.extend_from_slice(&archive[layout.length_offset + old_len..]);

    let err = archive_engine::decrypt(forged, "pw").unwrap_err();
    match err {
        ArchiveError::Truncated {
            what: "ciphertext",
            required,
            got,
        } => {
            assert_eq!(required, declared);
            assert_eq!(got, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn truncated_archive_is_a_format_error() {
    let archive = archive_engine::encrypt("some cleartext", "pw", &EncryptOptions::default())
        .expect("encrypt");

    let err = archive_engine::decrypt(archive[..archive.len() - 3].to_vec(), "pw").unwrap_err();
    assert!(matches!(err, ArchiveError::Truncated { what: "ciphertext", .. }));
}

#[test]
fn rejects_foreign_content_identifier() {
    let err = archive_engine::decrypt(b"not an archive", "pw").unwrap_err();
    assert!(matches!(err, ArchiveError::CidMismatch { .. }));
    assert_eq!(err.class(), ErrorClass::Format);
}

#[test]
fn empty_cleartext_gives_empty_archive() {
    let archive = archive_engine::encrypt(b"", "pw", &EncryptOptions::default()).expect("encrypt");
    assert!(archive.is_empty());
    assert!(archive_engine::decrypt(archive, "pw").expect("decrypt").is_empty());

    // 压缩后的空明文仍会产生一个 chunk
    let options = EncryptOptions {
        compress: Some(CompressOptions::gzip()),
        ..EncryptOptions::default()
    };
    let archive = archive_engine::encrypt(b"", "pw", &options).expect("encrypt");
    assert!(!archive.is_empty());
    assert!(archive_engine::decrypt(archive, "pw").expect("decrypt").is_empty());
}

#[test]
fn encryption_pulls_source_lazily() {
    let pulled = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&pulled);
    let source = (0..10).map(move |i| {
        counter.set(counter.get() + 1);
        Ok(InputChunk::from(format!("chunk {i}")))
    });

    let mut archive = Encryptor::new(EncryptOptions::default())
        .encrypt_iter(source, "pw")
        .expect("start encryption");
    assert_eq!(pulled.get(), 0);

    archive.next().expect("first chunk").expect("encrypt first chunk");
    assert_eq!(pulled.get(), 1);
}

#[test]
fn decryption_pulls_source_lazily() {
    let chunks: Vec<&[u8]> = vec![&[1u8; 64], &[2u8; 64], &[3u8; 64], &[4u8; 64], &[5u8; 64]];
    let source = chunks_of(chunks.iter().map(|c| c.to_vec()));
    let archive: Vec<Bytes> = Encryptor::new(EncryptOptions::default())
        .encrypt_iter(source, "pw")
        .expect("start encryption")
        .collect::<archive_engine::Result<_>>()
        .expect("encrypt");
    assert_eq!(archive.len(), 5);

    let pulled = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&pulled);
    let source = archive.into_iter().map(move |chunk| {
        counter.set(counter.get() + 1);
        Ok(InputChunk::from(chunk))
    });

    let mut cleartext = Decryptor::new().decrypt_iter(source, "pw").expect("start decryption");
    let first = cleartext.next().expect("first chunk").expect("decrypt first chunk");
    assert_eq!(first.as_ref(), &[1u8; 64]);
    assert!(pulled.get() <= 2, "pulled {} chunks", pulled.get());
}

#[test]
fn source_errors_stop_encryption() {
    let source = vec![
        Ok(InputChunk::from("ok")),
        Err(ArchiveError::InvalidType("boom".to_string())),
        Ok(InputChunk::from("never")),
    ];
    let mut archive = Encryptor::new(EncryptOptions::default())
        .encrypt_iter(source.into_iter(), "pw")
        .expect("start encryption");

    assert!(archive.next().expect("first").is_ok());
    assert!(matches!(archive.next(), Some(Err(ArchiveError::InvalidType(_)))));
    assert!(archive.next().is_none());
}

fn incompressible_chunks(count: usize, size: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|_| {
            let mut chunk = vec![0u8; size];
            rng.fill_bytes(&mut chunk);
            chunk
        })
        .collect()
}

#[test]
fn compressed_encryption_pulls_a_bounded_prefix() {
    let chunks = incompressible_chunks(512, 4096);
    let total = chunks.len();

    let pulled = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&pulled);
    let source = chunks.into_iter().map(move |chunk| {
        counter.set(counter.get() + 1);
        Ok(InputChunk::from(chunk))
    });

    let options = EncryptOptions {
        compress: Some(CompressOptions::gzip()),
        ..EncryptOptions::default()
    };
    let mut archive = Encryptor::new(options)
        .encrypt_iter(source, "pw")
        .expect("start encryption");
    archive.next().expect("first chunk").expect("encrypt first chunk");

    assert!(pulled.get() > 0);
    assert!(pulled.get() <= total / 4, "pulled {} of {total} chunks", pulled.get());
}

#[test]
fn compressed_decryption_pulls_a_bounded_prefix() {
    let chunks = incompressible_chunks(512, 4096);
    let expected = chunks.concat();

    // 解压端的行为与 brotli 质量无关，这里用较低质量加快加密
    for compress in [
        CompressOptions::gzip(),
        CompressOptions::Brotli {
            quality: 5,
            lgwin: 22,
        },
    ] {
        let options = EncryptOptions {
            compress: Some(compress),
            ..EncryptOptions::default()
        };
        let archive = collect(
            Encryptor::new(options)
                .encrypt_iter(chunks_of(chunks.clone()), "pw")
                .expect("start encryption"),
        )
        .expect("encrypt");

        let pieces: Vec<Vec<u8>> = archive.chunks(4096).map(<[u8]>::to_vec).collect();
        let total = pieces.len();
        let pulled = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&pulled);
        let source = pieces.into_iter().map(move |piece| {
            counter.set(counter.get() + 1);
            Ok(InputChunk::from(piece))
        });

        let mut cleartext = Decryptor::new().decrypt_iter(source, "pw").expect("start decryption");
        let first = cleartext.next().expect("first chunk").expect("decrypt first chunk");
        assert_eq!(first.as_ref(), &expected[..first.len()]);
        assert!(
            pulled.get() <= total / 4,
            "{compress:?}: pulled {} of {total} pieces",
            pulled.get()
        );
    }
}

struct CountingBackend {
    calls: AtomicUsize,
}

impl Argon2Backend for CountingBackend {
    fn hash_into(
        &self,
        password: &[u8],
        salt: &[u8],
        options: &Argon2Options,
        output: &mut [u8],
    ) -> archive_engine::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        RustArgon2.hash_into(password, salt, options, output)
    }
}

#[test]
fn key_is_derived_once_per_archive_with_injected_backend() {
    let backend = Arc::new(CountingBackend {
        calls: AtomicUsize::new(0),
    });

    let source = chunks_of(["a", "b", "c"]);
    let archive = Encryptor::new(EncryptOptions::default())
        .with_argon2_backend(backend.clone())
        .encrypt_iter(source, "pw")
        .expect("start encryption");
    let archive = collect(archive).expect("encrypt");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

    let cleartext = Decryptor::new()
        .with_argon2_backend(backend.clone())
        .decrypt_iter(chunks_of([archive]), "pw")
        .expect("start decryption");
    assert_eq!(collect(cleartext).expect("decrypt"), b"abc");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn file_roundtrip() {
    let temp_dir = tempdir().expect("create temp dir");
    let input_path = temp_dir.path().join("input.txt");
    let encrypted_path = temp_dir.path().join("output.arc");
    let decrypted_path = temp_dir.path().join("decrypted.txt");

    let plaintext: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    {
        let mut input_file = fs::File::create(&input_path).expect("create input");
        input_file.write_all(&plaintext).expect("write plaintext");
    }

    archive_engine::encrypt_file(
        &input_path,
        &encrypted_path,
        "test-password",
        &EncryptOptions::default(),
    )
    .expect("encrypt file");
    archive_engine::decrypt_file(&encrypted_path, &decrypted_path, "test-password")
        .expect("decrypt file");

    let decrypted = fs::read(&decrypted_path).expect("read decrypted");
    assert_eq!(decrypted, plaintext);
}

#[test]
fn file_roundtrip_with_small_chunks_and_aes() {
    let temp_dir = tempdir().expect("create temp dir");
    let input_path = temp_dir.path().join("input.txt");
    let encrypted_path = temp_dir.path().join("output.arc");
    let decrypted_path = temp_dir.path().join("decrypted.txt");

    fs::write(&input_path, b"aes mode payload with brotli").expect("write plaintext");

    let encryptor = Encryptor::new(EncryptOptions {
        algorithm: CryptoAlgorithm::Aes256Gcm,
        compress: Some(CompressOptions::brotli()),
        ..EncryptOptions::default()
    });
    archive_engine::encrypt_file_with(&encryptor, &input_path, &encrypted_path, "pw", 5)
        .expect("encrypt file");
    archive_engine::decrypt_file_with(&Decryptor::new(), &encrypted_path, &decrypted_path, "pw", 3)
        .expect("decrypt file");

    assert_eq!(fs::read(&decrypted_path).expect("read"), b"aes mode payload with brotli");
}

#[test]
fn failed_file_decryption_leaves_no_output() {
    let temp_dir = tempdir().expect("create temp dir");
    let input_path = temp_dir.path().join("input.txt");
    let encrypted_path = temp_dir.path().join("output.arc");
    let decrypted_path = temp_dir.path().join("decrypted.txt");

    fs::write(&input_path, b"auth fail").expect("write plaintext");
    archive_engine::encrypt_file(
        &input_path,
        &encrypted_path,
        "correct-password",
        &EncryptOptions::default(),
    )
    .expect("encrypt file");

    let result = archive_engine::decrypt_file(&encrypted_path, &decrypted_path, "wrong-password");
    assert!(result.is_err(), "expected decrypt to fail");
    assert!(!decrypted_path.exists());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn arbitrary_chunking_roundtrips(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..8)) {
        let expected: Vec<u8> = chunks.concat();
        let archive = collect(
            Encryptor::new(EncryptOptions::default())
                .encrypt_iter(chunks_of(chunks), "pw")
                .unwrap(),
        )
        .unwrap();

        let decrypted = archive_engine::decrypt(archive, "pw").unwrap();
        prop_assert_eq!(decrypted, expected);
    }
}
