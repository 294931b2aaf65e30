//! End-to-end coverage of the scenarios enumerated in spec.md §8, driving
//! the upload and download engines together against [`MemoryStorage`] and
//! a real (temp-file) [`SqliteCatalog`].

use std::collections::HashMap;
use std::sync::Arc;

use raid_core::balancer::Balancer;
use raid_core::catalog::{Catalog, SqliteCatalog};
use raid_core::cipher::{AesGcmCipher, Cipher};
use raid_core::download::{DownloadContext, DownloadEngine, DownloadError};
use raid_core::model::{Key, StorageKind, StorageToken};
use raid_core::storage::{MemoryStorage, Storage, StorageHandle};
use raid_core::upload::{UploadEngine, UploadError};

struct TestContext {
    storages: HashMap<i64, Arc<dyn Storage>>,
    ciphers: HashMap<i64, Arc<dyn Cipher>>,
}

impl DownloadContext for TestContext {
    fn storage(&self, storage_id: i64) -> Option<Arc<dyn Storage>> {
        self.storages.get(&storage_id).cloned()
    }

    fn cipher(&self, key_id: i64) -> Option<Arc<dyn Cipher>> {
        self.ciphers.get(&key_id).cloned()
    }
}

async fn open_catalog() -> (Arc<dyn Catalog>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).await.unwrap();
    (Arc::new(catalog), dir)
}

async fn write_input(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.bin");
    tokio::fs::write(&path, bytes).await.unwrap();
    (dir, path)
}

/// Scenario 1: single storage, no encryption, small file.
#[tokio::test]
async fn single_storage_round_trip() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1_000_000));

    let plaintext = b"abcdefghijklmnopqrstuv".to_vec(); // 22 bytes
    let (_input_dir, path) = write_input(&plaintext).await;

    let upload_engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 16, 16);
    let mut balancer = Balancer::new(vec![StorageHandle {
        storage_id: storage.id,
        load_ratio: 0.0,
        storage: Arc::clone(&backend),
    }]);

    let file = upload_engine
        .upload(&path, "small.bin", 1, false, &mut balancer, &[], Some(16), None)
        .await
        .unwrap();
    assert_eq!(file.total_blocks, 2);
    assert_eq!(file.uploaded_blocks, 2);

    let ctx = TestContext {
        storages: HashMap::from([(storage.id, backend)]),
        ciphers: HashMap::new(),
    };

    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let dest = download_engine
        .download("small.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap();

    let roundtripped = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(roundtripped, plaintext);
}

/// Scenario 2: three storages, duplicate_count=2 — replicas of one block
/// never share a storage.
#[tokio::test]
async fn duplicate_replicas_land_on_distinct_storages() {
    let (catalog, _cat_dir) = open_catalog().await;
    let mut handles = Vec::new();
    let mut backends = HashMap::new();
    for _ in 0..3 {
        let storage = catalog
            .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
            .await
            .unwrap();
        let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1_000_000));
        handles.push(StorageHandle {
            storage_id: storage.id,
            load_ratio: 0.0,
            storage: Arc::clone(&backend),
        });
        backends.insert(storage.id, backend);
    }

    let plaintext = vec![9u8; 32]; // 2 blocks of 16 bytes
    let (_input_dir, path) = write_input(&plaintext).await;

    let upload_engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 16, 16);
    let mut balancer = Balancer::new(handles);

    let file = upload_engine
        .upload(&path, "dup.bin", 2, false, &mut balancer, &[], Some(16), None)
        .await
        .unwrap();
    assert_eq!(file.total_blocks, 2);

    let groups = catalog.get_blocks_grouped_by_number(file.id).await.unwrap();
    assert_eq!(groups.len(), 2);
    for group in groups {
        assert_eq!(group.len(), 2);
        let storages: std::collections::HashSet<_> = group.iter().map(|b| b.storage_id).collect();
        assert_eq!(storages.len(), 2, "replicas of one block must land on distinct storages");
    }
}

/// Scenario 3: interrupted upload resumes without re-sending completed
/// blocks, and produces the same final catalog state as one uninterrupted
/// run.
#[tokio::test]
async fn interrupted_upload_resumes_to_same_final_state() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 10_000_000)
        .await
        .unwrap();
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(10_000_000));

    let data = vec![3u8; 1024 * 1024];
    let (_input_dir, path) = write_input(&data).await;

    let file = catalog
        .create_file(
            "resume.bin".into(),
            data.len() as u64,
            4,
            raid_core::checksum::sha1_bytes(&data),
            256 * 1024,
            1,
            false,
        )
        .await
        .unwrap();
    catalog.add_block(file.id, 0, 0, "n0".into(), 256 * 1024, storage.id, None).await.unwrap();
    catalog.add_block(file.id, 1, 0, "n1".into(), 256 * 1024, storage.id, None).await.unwrap();
    backend.upload("n0", &data[0..256 * 1024]).await;
    backend.upload("n1", &data[256 * 1024..512 * 1024]).await;

    let upload_engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 1024, 1024 * 1024);
    let mut balancer = Balancer::new(vec![StorageHandle {
        storage_id: storage.id,
        load_ratio: 0.0,
        storage: Arc::clone(&backend),
    }]);

    let resumed = upload_engine
        .upload(&path, "resume.bin", 1, false, &mut balancer, &[], None, None)
        .await
        .unwrap();
    assert_eq!(resumed.uploaded_blocks, 4);

    let ctx = TestContext {
        storages: HashMap::from([(storage.id, Arc::clone(&backend))]),
        ciphers: HashMap::new(),
    };
    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let dest = download_engine
        .download("resume.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}

/// Scenario 4: the first replica of a block fails repeatedly; download
/// falls back to the next replica and still succeeds.
#[tokio::test]
async fn download_falls_back_to_next_replica() {
    let (catalog, _cat_dir) = open_catalog().await;
    let s1 = catalog
        .create_storage(StorageToken::new("a"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let s2 = catalog
        .create_storage(StorageToken::new("b"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let b1 = Arc::new(MemoryStorage::new(1_000_000));
    let b2 = Arc::new(MemoryStorage::new(1_000_000));

    let plaintext = vec![5u8; 16];
    b1.upload("r0", &plaintext).await;
    b2.upload("r1", &plaintext).await;
    b1.fail_next("r0", 3);

    let file = catalog
        .create_file(
            "fallback.bin".into(),
            16,
            1,
            raid_core::checksum::sha1_bytes(&plaintext),
            16,
            2,
            false,
        )
        .await
        .unwrap();
    catalog.add_block(file.id, 0, 0, "r0".into(), 16, s1.id, None).await.unwrap();
    catalog.add_block(file.id, 0, 1, "r1".into(), 16, s2.id, None).await.unwrap();

    let ctx = TestContext {
        storages: HashMap::from([
            (s1.id, b1 as Arc<dyn Storage>),
            (s2.id, b2 as Arc<dyn Storage>),
        ]),
        ciphers: HashMap::new(),
    };
    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let dest = download_engine
        .download("fallback.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), plaintext);
}

/// Scenario 5: a mutated remote object makes the reassembled file fail its
/// checksum; the partially-written destination is left on disk.
#[tokio::test]
async fn checksum_mismatch_is_detected() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let backend = Arc::new(MemoryStorage::new(1_000_000));

    let plaintext = vec![1u8; 16];
    backend.upload("only", &plaintext).await;

    let file = catalog
        .create_file(
            "mismatch.bin".into(),
            16,
            1,
            raid_core::checksum::sha1_bytes(&plaintext),
            16,
            1,
            false,
        )
        .await
        .unwrap();
    catalog.add_block(file.id, 0, 0, "only".into(), 16, storage.id, None).await.unwrap();

    // Corrupt the remote object after cataloging it.
    backend.delete("only").await;
    backend.upload("only", &vec![2u8; 16]).await;

    let ctx = TestContext {
        storages: HashMap::from([(storage.id, backend as Arc<dyn Storage>)]),
        ciphers: HashMap::new(),
    };
    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let err = download_engine
        .download("mismatch.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
    assert!(out_dir.path().join("mismatch.bin").exists());
}

/// Scenario 6: encryption round trip, and the remote never sees the
/// original filename or plaintext.
#[tokio::test]
async fn encrypted_round_trip_hides_plaintext_and_filename_from_remote() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1_000_000));

    let key_record = catalog.create_key("correct horse battery staple".into()).await.unwrap();
    let cipher: Arc<dyn Cipher> = Arc::new(AesGcmCipher::new(Key {
        id: key_record.id,
        material: key_record.material.clone(),
    }));

    let plaintext = b"the secret plans live here".to_vec();
    let (_input_dir, path) = write_input(&plaintext).await;

    let upload_engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 1024, 4096);
    let mut balancer = Balancer::new(vec![StorageHandle {
        storage_id: storage.id,
        load_ratio: 0.0,
        storage: Arc::clone(&backend),
    }]);

    upload_engine
        .upload(&path, "secret.bin", 1, true, &mut balancer, std::slice::from_ref(&cipher), None, None)
        .await
        .unwrap();

    let (_, listed) = backend.list().await;
    assert_eq!(listed.len(), 1);
    assert_ne!(listed[0].name, "secret.bin");
    let (_, stored_bytes) = backend.download(&listed[0].name).await;
    assert!(!contains_subslice(&stored_bytes, &plaintext));

    let ctx = TestContext {
        storages: HashMap::from([(storage.id, backend)]),
        ciphers: HashMap::from([(key_record.id, cipher)]),
    };
    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let dest = download_engine
        .download("secret.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), plaintext);
}

/// A single storage can't satisfy duplicate_count=2 — the balancer must
/// fail with `NO_STORAGE` rather than double-place a block.
#[tokio::test]
async fn one_storage_with_duplicate_count_two_fails_no_storage() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1_000_000));
    let (_input_dir, path) = write_input(b"short").await;

    let upload_engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 16, 16);
    let mut balancer = Balancer::new(vec![StorageHandle {
        storage_id: storage.id,
        load_ratio: 0.0,
        storage: backend,
    }]);

    let err = upload_engine
        .upload(&path, "needs-two.bin", 2, false, &mut balancer, &[], Some(16), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Balancer(_)));
}

/// A catalog missing every replica of one block (the state an
/// `UPLOAD_FAILED` run can leave behind) fails download with
/// `CATALOG_CORRUPT`, not a mis-ordered file or a checksum mismatch.
#[tokio::test]
async fn missing_block_replicas_fail_catalog_corrupt() {
    let (catalog, _cat_dir) = open_catalog().await;
    let storage = catalog
        .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
        .await
        .unwrap();
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1_000_000));

    let plaintext = vec![7u8; 48]; // 3 blocks of 16 bytes
    let file = catalog
        .create_file(
            "gap.bin".into(),
            plaintext.len() as u64,
            3,
            raid_core::checksum::sha1_bytes(&plaintext),
            16,
            1,
            false,
        )
        .await
        .unwrap();
    // Block 1 never got a replica: every duplicate attempt for it failed.
    catalog.add_block(file.id, 0, 0, "n0".into(), 16, storage.id, None).await.unwrap();
    catalog.add_block(file.id, 2, 0, "n2".into(), 16, storage.id, None).await.unwrap();
    backend.upload("n0", &plaintext[0..16]).await;
    backend.upload("n2", &plaintext[32..48]).await;

    let ctx = TestContext {
        storages: HashMap::from([(storage.id, backend)]),
        ciphers: HashMap::new(),
    };
    let download_engine = DownloadEngine::new(Arc::clone(&catalog), 4);
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let err = download_engine
        .download("gap.bin", out_dir.path(), temp_dir.path(), &ctx, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::CatalogCorrupt { block_number: 1 }));
    // Pre-flight: no destination file should appear at all.
    assert!(!out_dir.path().join("gap.bin").exists());
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
