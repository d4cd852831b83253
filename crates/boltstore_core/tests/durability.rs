//! Integration tests for on-disk behavior: reopen, options that change the
//! file, copies and corruption handling.

use boltstore_core::{
    open, AccessMode, CoreError, Db, FreelistType, MmapFlags, OpenFileFn, OpenOption, Options,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn fill(db: &Db, bucket: &[u8], count: u32) {
    db.update(|tx| {
        let mut b = tx.create_bucket_if_not_exists(bucket)?;
        for i in 0..count {
            b.put(format!("key-{i:06}").as_bytes(), format!("value-{i}").as_bytes())?;
        }
        Ok(())
    })
    .unwrap();
}

fn assert_filled(db: &Db, bucket: &[u8], count: u32) {
    db.view(|tx| {
        let b = tx.bucket(bucket)?.expect("bucket exists");
        for i in 0..count {
            assert_eq!(
                b.get(format!("key-{i:06}").as_bytes())?,
                Some(format!("value-{i}").into_bytes())
            );
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn committed_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = Db::open(&path, 0o600, Options::default()).unwrap();
        fill(&db, b"widgets", 1_000);
        db.update(|tx| {
            let mut b = tx.bucket_mut(b"widgets")?.expect("bucket exists");
            b.set_sequence(41)?;
            b.next_sequence()?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();
    }

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    assert_filled(&db, b"widgets", 1_000);
    let sequence = db
        .view(|tx| Ok(tx.bucket(b"widgets")?.expect("bucket exists").sequence()))
        .unwrap();
    assert_eq!(sequence, 42);
    assert!(db.check().unwrap().is_empty());
}

#[test]
fn uncommitted_changes_are_lost() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = Db::open(&path, 0o600, Options::default()).unwrap();
        fill(&db, b"kept", 10);
        let committed = std::fs::read(&path).unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.create_bucket(b"dropped").unwrap();
        tx.bucket_mut(b"kept")
            .unwrap()
            .unwrap()
            .put(b"key-000000", b"changed")
            .unwrap();
        tx.rollback();
        assert_eq!(std::fs::read(&path).unwrap(), committed);
    }

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    assert_filled(&db, b"kept", 10);
    db.view(|tx| {
        assert!(tx.bucket(b"dropped")?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn values_spanning_several_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");
    let large: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    {
        let db = Db::open(&path, 0o600, Options::default().page_size(4096)).unwrap();
        db.update(|tx| tx.put_path(b"blobs:big", &large)).unwrap();
    }

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    assert_eq!(db.view(|tx| tx.get_path(b"blobs:big")).unwrap(), Some(large));
    assert!(db.check().unwrap().is_empty());
}

#[test]
fn read_only_handle_rejects_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = Db::open(&path, 0o600, Options::default()).unwrap();
        fill(&db, b"b", 5);
    }

    let db = open(&path, 0o600, [OpenOption::ReadOnly]).unwrap();
    assert!(db.is_read_only());
    assert!(matches!(db.begin_write(), Err(CoreError::DatabaseReadOnly)));
    assert!(matches!(
        db.update(|tx| tx.put_path(b"b:x", b"y")),
        Err(CoreError::DatabaseReadOnly)
    ));
    assert_filled(&db, b"b", 5);
    assert!(db.check().unwrap().is_empty());
}

#[test]
fn read_only_open_of_missing_file_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.db");

    let result = open(&path, 0o600, [OpenOption::ReadOnly]);
    assert!(matches!(result, Err(CoreError::Io(_))));
    assert!(!path.exists());
}

#[test]
fn explicit_page_size_must_match_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = open(&path, 0o600, [OpenOption::PageSize(4096)]).unwrap();
        assert_eq!(db.page_size(), 4096);
    }

    let result = open(&path, 0o600, [OpenOption::PageSize(8192)]);
    assert!(matches!(
        result,
        Err(CoreError::PageSizeMismatch {
            requested: 8192,
            actual: 4096
        })
    ));

    // Zero means "whatever the file uses".
    let db = open(&path, 0o600, [OpenOption::PageSize(0)]).unwrap();
    assert_eq!(db.page_size(), 4096);
}

#[test]
fn page_size_is_read_from_a_file_with_a_torn_first_meta() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = open(&path, 0o600, [OpenOption::PageSize(8192)]).unwrap();
        fill(&db, b"b", 3);
        // txid 3 lands on meta slot 1, so slot 0 can be damaged safely.
        db.update(|tx| tx.put_path(b"b:extra", b"1")).unwrap();
    }

    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&[0u8; 4]).unwrap();
    }

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    assert_eq!(db.page_size(), 8192);
    assert_eq!(db.view(|tx| tx.get_path(b"b:extra")).unwrap(), Some(b"1".to_vec()));
}

#[test]
fn freelist_is_rebuilt_when_not_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = open(&path, 0o600, [OpenOption::NoFreelistSync]).unwrap();
        fill(&db, b"b", 500);
        db.update(|tx| {
            let mut b = tx.bucket_mut(b"b")?.expect("bucket exists");
            for i in 0..250u32 {
                b.delete(format!("key-{i:06}").as_bytes())?;
            }
            Ok(())
        })
        .unwrap();
        assert!(db.check().unwrap().is_empty());
    }

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    assert!(db.stats().free_pages > 0);
    assert!(db.check().unwrap().is_empty());

    db.view(|tx| {
        let b = tx.bucket(b"b")?.expect("bucket exists");
        assert_eq!(b.get(b"key-000100")?, None);
        assert_eq!(b.get(b"key-000400")?, Some(b"value-400".to_vec()));
        Ok(())
    })
    .unwrap();

    // Persisting again from here on.
    fill(&db, b"more", 10);
    assert!(db.check().unwrap().is_empty());
}

#[test]
fn read_only_without_persisted_freelist_skips_free_checks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = open(&path, 0o600, [OpenOption::NoFreelistSync]).unwrap();
        fill(&db, b"b", 50);
    }

    let db = open(&path, 0o600, [OpenOption::ReadOnly]).unwrap();
    assert!(db.check().unwrap().is_empty());
    assert_filled(&db, b"b", 50);
}

#[test]
fn hashmap_freelist_through_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    let db = open(
        &path,
        0o600,
        [
            OpenOption::PageSize(1024),
            OpenOption::FreelistType(FreelistType::HashMap),
        ],
    )
    .unwrap();
    assert_eq!(db.page_size(), 1024);
    assert_eq!(db.info().unwrap().freelist_type, FreelistType::HashMap);

    for round in 0..5u32 {
        fill(&db, format!("b{round}").as_bytes(), 200);
    }
    db.update(|tx| tx.delete_bucket(b"b2")).unwrap();
    fill(&db, b"b5", 200);
    assert!(db.check().unwrap().is_empty());
    assert_filled(&db, b"b4", 200);
    assert_filled(&db, b"b5", 200);
}

#[test]
fn initial_mmap_size_pregrows_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    let db = open(&path, 0o600, [OpenOption::InitialMmapSize(1 << 20)]).unwrap();
    assert!(db.info().unwrap().file_size >= 1 << 20);
    assert!(std::fs::metadata(&path).unwrap().len() >= 1 << 20);

    fill(&db, b"b", 100);
    assert_eq!(db.stats().remaps, 0);
}

#[test]
fn file_grows_as_pages_are_allocated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    let before = db.info().unwrap().file_size;
    fill(&db, b"b", 5_000);
    let info = db.info().unwrap();

    assert!(info.file_size > before);
    assert!(info.file_size >= info.high_water * info.page_size as u64);
    assert!(info.file_size.is_power_of_two());
    assert!(db.stats().remaps > 0);
}

#[test]
fn open_file_hook_is_used() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let hook: OpenFileFn = Arc::new(move |path: &Path, access: AccessMode, mode: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        boltstore_core::default_open_file(path, access, mode)
    });

    let db = open(&path, 0o600, [OpenOption::OpenFile(hook)]).unwrap();
    fill(&db, b"b", 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn snapshot_copy_opens_as_a_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");
    let copy = dir.path().join("copy.db");

    let db = Db::open(&path, 0o600, Options::default()).unwrap();
    fill(&db, b"b", 300);

    let reader = db.begin_read().unwrap();
    // Not part of the copy: committed after the reader began.
    db.update(|tx| tx.put_path(b"b:late", b"1")).unwrap();
    reader.copy_file(&copy, 0o600).unwrap();
    assert_eq!(
        std::fs::metadata(&copy).unwrap().len(),
        reader.size()
    );
    drop(reader);

    let copied = Db::open(&copy, 0o600, Options::default()).unwrap();
    assert_filled(&copied, b"b", 300);
    assert_eq!(copied.view(|tx| tx.get_path(b"b:late")).unwrap(), None);
    assert!(copied.check().unwrap().is_empty());
}

#[test]
fn write_to_streams_every_page() {
    let db = Db::open_in_memory(Options::default()).unwrap();
    fill(&db, b"b", 50);

    let mut out = Vec::new();
    let written = db.view(|tx| tx.write_to(&mut out)).unwrap();
    assert_eq!(written, out.len() as u64);
    assert_eq!(written % db.page_size() as u64, 0);
    assert_eq!(written, db.info().unwrap().high_water * db.page_size() as u64);
}

#[test]
fn garbage_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.db");
    std::fs::write(&path, b"this is certainly not a database file, just some text").unwrap();

    assert!(matches!(
        Db::open(&path, 0o600, Options::default()),
        Err(CoreError::InvalidFormat { .. })
    ));
}

/// Builds the option list for one combination: bit `i` of `mask` turns the
/// `i`-th option on.
fn option_combination(mask: u32) -> Vec<OpenOption> {
    let candidates = [
        OpenOption::NoGrowSync,
        OpenOption::NoFreelistSync,
        OpenOption::FreelistType(FreelistType::HashMap),
        OpenOption::MmapFlags(MmapFlags::POPULATE),
        OpenOption::InitialMmapSize(1 << 18),
        OpenOption::NoSync,
        OpenOption::Mlock,
    ];
    candidates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, option)| option)
        .collect()
}

#[test]
fn every_option_combination_survives_close_and_reopen() {
    let dir = tempdir().unwrap();

    for mask in 0..(1u32 << 7) {
        let path = dir.path().join(format!("combo-{mask:03}.db"));

        {
            let db = open(&path, 0o600, option_combination(mask)).unwrap();
            db.update(|tx| {
                for i in 0..300u32 {
                    tx.put_path(format!("b:{i:04}").as_bytes(), &i.to_be_bytes())?;
                }
                Ok(())
            })
            .unwrap();
            db.update(|tx| {
                for i in (0..300u32).step_by(2) {
                    tx.delete_path(format!("b:{i:04}").as_bytes())?;
                }
                Ok(())
            })
            .unwrap();
            db.close().unwrap();
        }

        let assert_contents = |db: &Db| {
            db.view(|tx| {
                for i in 0..300u32 {
                    let expected = (i % 2 == 1).then(|| i.to_be_bytes().to_vec());
                    assert_eq!(
                        tx.get_path(format!("b:{i:04}").as_bytes())?,
                        expected,
                        "mask {mask:07b}, key {i}"
                    );
                }
                Ok(())
            })
            .unwrap();
            let issues = db.check().unwrap();
            assert!(issues.is_empty(), "mask {mask:07b}: {issues:?}");
        };

        {
            let db = open(&path, 0o600, option_combination(mask)).unwrap();
            assert_contents(&db);
            db.update(|tx| tx.put_path(b"b:extra", b"1")).unwrap();
            db.close().unwrap();
        }

        let mut read_only = option_combination(mask);
        read_only.push(OpenOption::ReadOnly);
        let db = open(&path, 0o600, read_only).unwrap();
        assert!(db.is_read_only());
        assert_contents(&db);
        assert_eq!(
            db.view(|tx| tx.get_path(b"b:extra")).unwrap(),
            Some(b"1".to_vec())
        );
    }
}
