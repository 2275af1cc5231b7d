//! Границы сегментов: рост в новый сегмент, резерв страницы под
//! leaf-таблицу, барьер коалесценции, усечение обратно.
//!
//! Файл растёт до ~1 GiB, но остаётся разреженным: записываются только
//! заголовки блобов.

use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::config::StoreConfig;
use GeodeDB::store::BlobStore;

#[test]
fn growth_across_segment_boundary() -> Result<()> {
    let path = unique_path("segments");
    let cfg = StoreConfig::default().with_commit_sync(false);
    let mut store = BlobStore::create(&path, &cfg)?;

    let pps = store.pages_per_segment();
    assert_eq!(pps, 262_144, "4 KiB pages: 2^30 / 2^12");
    let max = store.max_payload_size() as u32;

    // Сегмент 0 заполняется целиком: страницы 1..pps
    let mut tx = store.begin()?;
    let giant = tx.alloc(max)?;
    tx.commit()?;
    assert_eq!(giant, 1);
    assert_eq!(store.total_pages(), pps);

    // Следующая аллокация открывает сегмент 1. Документированная раскладка:
    // первая страница нового сегмента (pps) резервируется однастраничным
    // свободным блобом-держателем leaf-таблицы, ран начинается сразу за ним.
    let mut tx = store.begin()?;
    let small = tx.alloc(4088)?;
    tx.commit()?;
    assert_eq!(small, pps + 1);
    assert_eq!(store.total_pages(), pps + 2);

    let holder = store.blob_header(pps)?;
    assert!(holder.word.is_free(), "reserved page must be a free blob");
    assert_eq!(holder.word.free_pages(), 1);
    // Держатель — первая страница сегмента: preceding всегда 0
    assert_eq!(holder.preceding_free_pages, 0);
    // Ран знает о свободном соседе слева (внутри сегмента 1)
    assert_eq!(store.blob_header(small)?.preceding_free_pages, 1);

    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.segments_with_free, 1);

    // Гигант на границе сегментов: его освобождение не сливается с
    // держателем сегмента 1 (барьер), ран уходит в таблицу целиком…
    let mut tx = store.begin()?;
    tx.free(giant)?;
    tx.commit()?;
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);
    assert_eq!(rep.free_blobs, 2, "giant run + segment-1 holder");
    assert_eq!(store.total_pages(), pps + 2, "not a tail run, no truncation");

    // …а освобождение хвостового блоба сегмента 1 усекает файл до границы,
    // вместе с опустевшим держателем ничего не остаётся и от сегмента 0.
    let mut tx = store.begin()?;
    tx.free(small)?;
    tx.commit()?;
    assert_eq!(store.total_pages(), 1, "cascading tail reclaim");
    let rep = check_store(&store)?;
    assert!(rep.is_clean(), "check errors: {:?}", rep.errors);

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
