use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::config::StoreConfig;
use GeodeDB::store::BlobStore;

#[test]
fn smoke_create_alloc_reopen() -> Result<()> {
    let path = unique_path("smoke");

    // 1) create + первые аллокации
    {
        let mut store = BlobStore::create(&path, &StoreConfig::default())?;
        assert_eq!(store.total_pages(), 1, "fresh store is header-only");

        let mut tx = store.begin()?;
        let a = tx.alloc(100)?;
        let b = tx.alloc(5000)?;
        tx.commit()?;

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(store.total_pages(), 4);

        let ha = store.blob_header(a)?;
        assert!(!ha.word.is_free());
        assert_eq!(ha.word.payload_size(), 100);

        let hb = store.blob_header(b)?;
        assert!(!hb.word.is_free());
        assert_eq!(hb.word.payload_size(), 5000);

        // Сырой доступ и readahead
        let p = store.translate_page(a)?;
        assert!(!p.is_null());
        store.prefetch_blob(a)?;
        store.prefetch_blob(b)?;
    }

    // 2) reopen: заголовок валиден, блобы на месте
    {
        let store = BlobStore::open_ro(&path)?;
        store.verify_header()?;
        assert_eq!(store.total_pages(), 4);
        assert_eq!(store.page_size(), 4096);

        let rep = check_store(&store)?;
        assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
        assert_eq!(rep.used_blobs, 2);
        assert_eq!(rep.free_blobs, 0);
        assert_eq!(rep.used_pages, 3);
    }

    cleanup(&path);
    Ok(())
}

#[test]
fn smoke_free_and_reuse() -> Result<()> {
    let path = unique_path("reuse");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    // Два блоба + sentinel, чтобы освобождённое место не усекалось
    let mut tx = store.begin()?;
    let a = tx.alloc(100)?;
    let _b = tx.alloc(5000)?;
    let _sentinel = tx.alloc(100)?;
    tx.commit()?;
    let total_before = store.total_pages();

    // free + commit: место возвращается в таблицу
    let mut tx = store.begin()?;
    tx.free(a)?;
    tx.commit()?;
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 1);

    // Аллокация того же размера обслуживается из reclaimed-пространства
    let mut tx = store.begin()?;
    let a2 = tx.alloc(100)?;
    tx.commit()?;
    assert_eq!(a2, a, "same-size alloc must reuse the reclaimed run");
    assert_eq!(store.total_pages(), total_before, "no growth on reuse");

    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 0);

    cleanup(&path);
    Ok(())
}

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("geode-{}-{}-{}.store", prefix, pid, t))
}

fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let mut lock = path.as_os_str().to_os_string();
    lock.push(".lock");
    let _ = std::fs::remove_file(PathBuf::from(lock));
}
