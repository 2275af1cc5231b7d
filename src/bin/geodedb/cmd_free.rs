use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::store::BlobStore;

pub fn exec(path: PathBuf, pages: Vec<u32>) -> Result<()> {
    let mut store = BlobStore::open(&path)?;
    let mut tx = store.begin()?;
    for p in &pages {
        tx.free(*p)?;
    }
    tx.commit()?;
    println!("freed {} blob(s)", pages.len());
    Ok(())
}
