//! tx — транзакция стора: alloc/free со staged-освобождениями и commit.
//!
//! Модель single-writer: одна активная транзакция на стор (обеспечено
//! эксклюзивным локом при открытии на запись). alloc и сплиты пишут в
//! отображение сразу; free() лишь стейджит страницы в freed_blobs, слияние
//! соседей и обновление free-таблиц происходят при commit(). Брошенная без
//! commit() транзакция теряет только staged-освобождения — прямые записи
//! аллокаций уже лежат в отображении (журнала нет).

pub mod alloc;
pub mod free;
pub mod table;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::consts::PageNum;
use crate::store::BlobStore;

/// Транзакция над стором. Живёт не дольше займа стора.
pub struct Transaction<'a> {
    pub(crate) store: &'a mut BlobStore,
    /// Staged-освобождения: первая страница рана -> длина в страницах.
    /// BTreeMap даёт детерминированный (возрастающий) порядок слияния.
    pub(crate) freed_blobs: BTreeMap<PageNum, u32>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a mut BlobStore) -> Result<Self> {
        store.require_writable()?;
        Ok(Self {
            store,
            freed_blobs: BTreeMap::new(),
        })
    }

    /// Стор, над которым идёт транзакция (для инспекции).
    pub fn store(&self) -> &BlobStore {
        self.store
    }

    /// Число staged-освобождений.
    pub fn staged_frees(&self) -> usize {
        self.freed_blobs.len()
    }

    /// Завершить транзакцию: слить staged-освобождения в free-таблицу
    /// (коалесцируя соседей) и зафиксировать отображение на диск.
    pub fn commit(mut self) -> Result<()> {
        self.merge_freed()?;
        self.store.commit_flush()
    }
}

impl BlobStore {
    /// Начать транзакцию. Стор должен быть открыт на запись.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Transaction::new(self)
    }
}
