use anyhow::Result;
use std::path::PathBuf;

use GeodeDB::check::check_store;
use GeodeDB::store::BlobStore;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let store = BlobStore::open_ro(&path)?;
    let rep = check_store(&store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rep)?);
    } else {
        println!(
            "checked {} pages: {} used / {} free blobs",
            rep.total_pages, rep.used_blobs, rep.free_blobs
        );
        for e in &rep.errors {
            println!("ERROR: {}", e);
        }
        if rep.is_clean() {
            println!("OK");
        }
    }

    if !rep.is_clean() {
        std::process::exit(2);
    }
    Ok(())
}
