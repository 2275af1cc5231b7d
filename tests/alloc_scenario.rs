//! Конкретный сценарий аллокации: page size 4096, header на странице 0.

use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::config::StoreConfig;
use GeodeDB::errors::StoreError;
use GeodeDB::store::BlobStore;

#[test]
fn documented_growth_scenario() -> Result<()> {
    let path = unique_path("scenario");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;
    assert_eq!(store.total_pages(), 1);

    // alloc(100): 108 байт с заголовком -> 1 страница, PageNum=1, total=2
    let mut tx = store.begin()?;
    let p1 = tx.alloc(100)?;
    tx.commit()?;
    assert_eq!(p1, 1);
    assert_eq!(store.total_pages(), 2);

    // alloc(5000): 5008 байт > 4096 -> 2 страницы, total=4.
    // Никаких страниц табличного оверхеда внутри сегмента 0 не появляется:
    // trunk живёт на странице 0, leaf-таблицы — на свободных блобах.
    let mut tx = store.begin()?;
    let p2 = tx.alloc(5000)?;
    tx.commit()?;
    assert_eq!(p2, 2);
    assert_eq!(store.total_pages(), 4);

    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);

    cleanup(&path);
    Ok(())
}

#[test]
fn invalid_size_mutates_nothing() -> Result<()> {
    let path = unique_path("invalid");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    let mut tx = store.begin()?;
    let keep = tx.alloc(100)?;
    tx.commit()?;
    let total_before = store.total_pages();

    let max = store.max_payload_size();
    assert_eq!(max, (1u64 << 30) - 4096 - 8);

    for bad in [0u32, (max + 1) as u32, u32::MAX] {
        let mut tx = store.begin()?;
        let err = tx.alloc(bad).unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::InvalidSize(n)) => assert_eq!(*n, bad as u64),
            other => panic!("expected InvalidSize for {}, got {:?}", bad, other),
        }
        tx.commit()?;
    }

    // Ни заголовок, ни таблица, ни данные не изменились
    assert_eq!(store.total_pages(), total_before);
    let h = store.blob_header(keep)?;
    assert_eq!(h.word.payload_size(), 100);
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 0);

    cleanup(&path);
    Ok(())
}

#[test]
fn max_payload_is_allocatable() -> Result<()> {
    let path = unique_path("maxpayload");
    let cfg = StoreConfig::default().with_commit_sync(false);
    let mut store = BlobStore::create(&path, &cfg)?;

    // Максимальный payload занимает ровно pages_per_segment - 1 страниц
    let max = store.max_payload_size() as u32;
    let pps = store.pages_per_segment();

    let mut tx = store.begin()?;
    let p = tx.alloc(max)?;
    tx.commit()?;
    assert_eq!(p, 1);
    assert_eq!(store.total_pages(), pps, "segment 0 is filled exactly");

    let h = store.blob_header(p)?;
    assert!(!h.word.is_free());
    assert_eq!(h.word.payload_size(), max);

    cleanup(&path);
    Ok(())
}

#[test]
fn freeing_tail_truncates_store() -> Result<()> {
    let path = unique_path("trunc");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    let mut tx = store.begin()?;
    let a = tx.alloc(100)?;
    let b = tx.alloc(5000)?;
    tx.commit()?;
    assert_eq!(store.total_pages(), 4);

    // Хвостовой блоб освобождён -> файл усечён, не free-таблица
    let mut tx = store.begin()?;
    tx.free(b)?;
    tx.commit()?;
    assert_eq!(store.total_pages(), 2);
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 0, "tail free run must be truncated away");

    // Освобождение последнего блоба возвращает стор к одной странице
    let mut tx = store.begin()?;
    tx.free(a)?;
    tx.commit()?;
    assert_eq!(store.total_pages(), 1);
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 0);
    assert_eq!(rep.used_blobs, 0);

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
