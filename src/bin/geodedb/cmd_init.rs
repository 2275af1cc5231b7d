use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::config::StoreConfig;
use GeodeDB::store::BlobStore;

pub fn exec(path: PathBuf, page_size: u32) -> Result<()> {
    if path.exists() {
        let store = BlobStore::open_ro(&path)?;
        if store.page_size() != page_size {
            eprintln!(
                "warning: store already initialized with page_size={}, requested {} (keeping {})",
                store.page_size(),
                page_size,
                store.page_size()
            );
        }
        println!("Store already initialized at {}", path.display());
        return Ok(());
    }
    let cfg = StoreConfig::from_env().with_page_size(page_size);
    BlobStore::create(&path, &cfg)?;
    println!("Initialized store at {}", path.display());
    Ok(())
}
