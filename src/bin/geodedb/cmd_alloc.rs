use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::store::BlobStore;

pub fn exec(path: PathBuf, size: u32, count: u32) -> Result<()> {
    let mut store = BlobStore::open(&path)?;
    let mut tx = store.begin()?;
    let mut pages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        pages.push(tx.alloc(size)?);
    }
    tx.commit()?;
    for p in pages {
        println!("{}", p);
    }
    Ok(())
}
