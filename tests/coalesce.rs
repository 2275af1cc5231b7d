//! Коалесценция свободных соседей при commit.

use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::config::StoreConfig;
use GeodeDB::store::BlobStore;

// 4088 байт payload + 8 байт заголовка = ровно одна страница 4096.
const ONE_PAGE: u32 = 4096 - 8;

#[test]
fn merge_left_and_right_neighbors() -> Result<()> {
    let path = unique_path("merge");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    // A,B,C по одной странице + sentinel, чтобы не сработало усечение
    let mut tx = store.begin()?;
    let a = tx.alloc(ONE_PAGE)?;
    let b = tx.alloc(ONE_PAGE)?;
    let c = tx.alloc(ONE_PAGE)?;
    let d = tx.alloc(ONE_PAGE)?;
    tx.commit()?;
    assert_eq!((a, b, c, d), (1, 2, 3, 4));

    // A и C освобождены: два отдельных рана по 1 странице
    let mut tx = store.begin()?;
    tx.free(a)?;
    tx.free(c)?;
    tx.commit()?;
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 2);
    // Маркеры обратного слияния у правых соседей
    assert_eq!(store.blob_header(b)?.preceding_free_pages, 1);
    assert_eq!(store.blob_header(d)?.preceding_free_pages, 1);

    // Освобождение B сливает все три рана в один
    let mut tx = store.begin()?;
    tx.free(b)?;
    tx.commit()?;
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 1, "A+B+C must collapse into one run");
    assert_eq!(rep.free_pages, 3);

    let h = store.blob_header(a)?;
    assert!(h.word.is_free());
    assert_eq!(h.word.free_pages(), 3);
    assert_eq!(store.blob_header(d)?.preceding_free_pages, 3);

    cleanup(&path);
    Ok(())
}

#[test]
fn adjacent_frees_in_one_transaction() -> Result<()> {
    let path = unique_path("batch");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    let mut tx = store.begin()?;
    let a = tx.alloc(ONE_PAGE)?;
    let b = tx.alloc(ONE_PAGE)?;
    let c = tx.alloc(ONE_PAGE)?;
    let d = tx.alloc(ONE_PAGE)?;
    tx.commit()?;

    // Смежные блобы в одной транзакции: склейка до оплаты стоимости таблиц
    let mut tx = store.begin()?;
    tx.free(a)?;
    tx.free(b)?;
    tx.free(c)?;
    assert_eq!(tx.staged_frees(), 3);
    tx.commit()?;

    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 1, "one table entry for the fused run");
    assert_eq!(rep.free_pages, 3);
    assert_eq!(store.blob_header(d)?.preceding_free_pages, 3);

    // Освобождение sentinel: слияние с раном и усечение до заголовка
    let mut tx = store.begin()?;
    tx.free(d)?;
    tx.commit()?;
    assert_eq!(store.total_pages(), 1);
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 0);

    cleanup(&path);
    Ok(())
}

#[test]
fn no_free_page_reachable_as_used() -> Result<()> {
    let path = unique_path("overlap");
    let mut store = BlobStore::create(&path, &StoreConfig::default())?;

    let mut tx = store.begin()?;
    let mut pages = Vec::new();
    for i in 0..8u32 {
        pages.push(tx.alloc(ONE_PAGE * (1 + i % 3))?);
    }
    tx.commit()?;

    let mut tx = store.begin()?;
    for &p in pages.iter().step_by(2) {
        tx.free(p)?;
    }
    tx.commit()?;

    // check_store сверяет обход блобов с достижимостью из таблицы в обе
    // стороны: свободная страница не может быть payload занятого блоба.
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    for &p in pages.iter().step_by(2) {
        if p < store.total_pages() {
            assert!(store.blob_header(p)?.word.is_free());
        }
    }
    for &p in pages.iter().skip(1).step_by(2) {
        assert!(!store.blob_header(p)?.word.is_free());
    }

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
