//! Лёгкие глобальные метрики стора.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - аллокация/освобождение (блобы и страницы)
//! - сплиты и слияния ранов
//! - переносы leaf-таблиц
//! - рост/усечение файла
//! - поиск по free-таблице

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static BLOBS_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static BLOBS_FREED: AtomicU64 = AtomicU64::new(0);
static PAGES_FREED: AtomicU64 = AtomicU64::new(0);

static BLOB_SPLITS: AtomicU64 = AtomicU64::new(0);
static BLOB_MERGES: AtomicU64 = AtomicU64::new(0);
static LEAF_RELOCATIONS: AtomicU64 = AtomicU64::new(0);

static STORE_GROWS: AtomicU64 = AtomicU64::new(0);
static STORE_TRUNCATIONS: AtomicU64 = AtomicU64::new(0);

static FT_LOOKUPS: AtomicU64 = AtomicU64::new(0);
static FT_LOOKUP_MISSES: AtomicU64 = AtomicU64::new(0);

pub fn record_alloc(pages: u64) {
    BLOBS_ALLOCATED.fetch_add(1, Ordering::Relaxed);
    PAGES_ALLOCATED.fetch_add(pages, Ordering::Relaxed);
}

pub fn record_free(pages: u64) {
    BLOBS_FREED.fetch_add(1, Ordering::Relaxed);
    PAGES_FREED.fetch_add(pages, Ordering::Relaxed);
}

pub fn record_split() {
    BLOB_SPLITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_merge() {
    BLOB_MERGES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_leaf_relocation() {
    LEAF_RELOCATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_grow() {
    STORE_GROWS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_truncation() {
    STORE_TRUNCATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_ft_lookup(hit: bool) {
    FT_LOOKUPS.fetch_add(1, Ordering::Relaxed);
    if !hit {
        FT_LOOKUP_MISSES.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub blobs_allocated: u64,
    pub pages_allocated: u64,
    pub blobs_freed: u64,
    pub pages_freed: u64,
    pub blob_splits: u64,
    pub blob_merges: u64,
    pub leaf_relocations: u64,
    pub store_grows: u64,
    pub store_truncations: u64,
    pub ft_lookups: u64,
    pub ft_lookup_misses: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        blobs_allocated: BLOBS_ALLOCATED.load(Ordering::Relaxed),
        pages_allocated: PAGES_ALLOCATED.load(Ordering::Relaxed),
        blobs_freed: BLOBS_FREED.load(Ordering::Relaxed),
        pages_freed: PAGES_FREED.load(Ordering::Relaxed),
        blob_splits: BLOB_SPLITS.load(Ordering::Relaxed),
        blob_merges: BLOB_MERGES.load(Ordering::Relaxed),
        leaf_relocations: LEAF_RELOCATIONS.load(Ordering::Relaxed),
        store_grows: STORE_GROWS.load(Ordering::Relaxed),
        store_truncations: STORE_TRUNCATIONS.load(Ordering::Relaxed),
        ft_lookups: FT_LOOKUPS.load(Ordering::Relaxed),
        ft_lookup_misses: FT_LOOKUP_MISSES.load(Ordering::Relaxed),
    }
}
