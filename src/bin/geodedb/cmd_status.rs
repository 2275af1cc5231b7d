use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::metrics;
use GeodeDB::store::BlobStore;
use GeodeDB::util::human_bytes;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let store = BlobStore::open_ro(&path)?;
    // Быстрая статистика свободного места — из того же обхода, что и check
    let rep = check_store(&store)?;

    if json {
        let ms = metrics::snapshot();
        let obj = json!({
            "header": {
                "version": store.version(),
                "created": store.created(),
                "page_size": store.page_size(),
                "total_pages": store.total_pages(),
                "store_id": format!("{:016x}", store.store_id()),
            },
            "space": {
                "file_bytes": (store.total_pages() as u64) << store.page_shift(),
                "used_blobs": rep.used_blobs,
                "used_pages": rep.used_pages,
                "free_blobs": rep.free_blobs,
                "free_pages": rep.free_pages,
                "segments_with_free": rep.segments_with_free,
            },
            "metrics": ms,
        });
        println!("{}", serde_json::to_string_pretty(&obj)?);
        return Ok(());
    }

    println!("store:        {}", path.display());
    println!("version:      {}", store.version());
    println!("page size:    {}", store.page_size());
    println!(
        "total pages:  {} ({})",
        store.total_pages(),
        human_bytes((store.total_pages() as u64) << store.page_shift())
    );
    println!(
        "used:         {} blobs / {} pages",
        rep.used_blobs, rep.used_pages
    );
    println!(
        "free:         {} blobs / {} pages (in {} segment(s))",
        rep.free_blobs, rep.free_pages, rep.segments_with_free
    );
    println!("store id:     {:016x}", store.store_id());
    Ok(())
}
