//! check — проверка согласованности стора (аналог «доктора»).
//!
//! Два прохода:
//! 1. Последовательный обход блобов от страницы 1: экстенты покрывают все
//!    страницы без дыр и перекрытий, раны не пересекают границы сегментов,
//!    маркеры preceding_free_pages соответствуют фактическим соседям,
//!    смежные свободные блобы отсутствуют (коалесценция отработала).
//! 2. Обход free-таблицы: каждый достижимый из trunk/leaf блоб свободен,
//!    принадлежит своему сегменту и классу, range-битмапы согласованы
//!    со слотами; достижимость совпадает с множеством свободных блобов
//!    из прохода 1 (в обе стороны).
//!
//! Ошибки не чинятся — только репортятся.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::consts::{FREE_TABLE_LEN, MAX_SEGMENTS, NO_PAGE, PageNum};
use crate::freetable::{size_class, span_bit};
use crate::store::BlobStore;

/// Итог проверки стора.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub total_pages: u32,
    pub used_blobs: u64,
    pub used_pages: u64,
    pub free_blobs: u64,
    pub free_pages: u64,
    pub segments_with_free: u32,
    pub errors: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Полная проверка согласованности. Работает и на read-only открытии.
pub fn check_store(store: &BlobStore) -> Result<CheckReport> {
    let mut rep = CheckReport {
        total_pages: store.total_pages(),
        ..Default::default()
    };

    // ---- Проход 1: последовательный обход блобов ----
    let total = store.total_pages();
    let mut walk_free: BTreeMap<PageNum, u32> = BTreeMap::new();
    let mut page: PageNum = 1;
    let mut prev_free_len: u32 = 0;
    let mut prev_was_free = false;

    while page < total {
        if store.is_first_page_of_segment(page) {
            // Граница сегмента — барьер коалесценции.
            prev_free_len = 0;
            prev_was_free = false;
        }
        let h = match store.blob_header(page) {
            Ok(h) => h,
            Err(e) => {
                rep.errors.push(format!("page {}: {}", page, e));
                break;
            }
        };
        if h.preceding_free_pages != prev_free_len {
            rep.errors.push(format!(
                "page {}: preceding_free_pages {} (actual preceding free run {})",
                page, h.preceding_free_pages, prev_free_len
            ));
        }
        let pages = if h.word.is_free() {
            h.word.free_pages()
        } else {
            store.pages_for_payload_size(h.word.payload_size())
        };
        if pages == 0 {
            rep.errors.push(format!("page {}: zero-length blob", page));
            break;
        }
        let end = page as u64 + pages as u64;
        if end > total as u64 {
            rep.errors.push(format!(
                "page {}: blob of {} pages runs past total {}",
                page, pages, total
            ));
            break;
        }
        if store.segment_of(page) != store.segment_of((end - 1) as PageNum) {
            rep.errors.push(format!(
                "page {}: blob of {} pages crosses a segment boundary",
                page, pages
            ));
        }
        if h.word.is_free() {
            if prev_was_free {
                rep.errors.push(format!(
                    "page {}: two adjacent free blobs (coalescing missed)",
                    page
                ));
            }
            walk_free.insert(page, pages);
            prev_free_len = pages;
            prev_was_free = true;
        } else {
            rep.used_blobs += 1;
            rep.used_pages += pages as u64;
            prev_free_len = 0;
            prev_was_free = false;
        }
        page = end as PageNum;
    }
    if page != total && rep.errors.is_empty() {
        rep.errors
            .push(format!("blob walk ended at page {} of {}", page, total));
    }
    rep.free_blobs = walk_free.len() as u64;
    rep.free_pages = walk_free.values().map(|&p| p as u64).sum();

    // ---- Проход 2: достижимость из free-таблицы ----
    let mut table_free: BTreeMap<PageNum, u32> = BTreeMap::new();
    let mut trunk_ranges_expect = 0u32;
    for seg in 0..MAX_SEGMENTS {
        let holder = store.trunk_slot(seg)?;
        if holder == NO_PAGE {
            continue;
        }
        trunk_ranges_expect |= span_bit(seg as usize);
        rep.segments_with_free += 1;
        if store.segment_of(holder) != seg {
            rep.errors.push(format!(
                "trunk[{}] holder page {} lies in segment {}",
                seg,
                holder,
                store.segment_of(holder)
            ));
            continue;
        }
        match store.blob_header(holder) {
            Ok(h) if h.word.is_free() => {}
            _ => {
                rep.errors
                    .push(format!("trunk[{}] holder page {} is not free", seg, holder));
                continue;
            }
        }
        check_leaf(store, seg, holder, &mut table_free, &mut rep)?;
    }
    if store.trunk_ranges() != trunk_ranges_expect {
        rep.errors.push(format!(
            "trunk ranges 0x{:08x} != recomputed 0x{:08x}",
            store.trunk_ranges(),
            trunk_ranges_expect
        ));
    }

    // ---- Сверка множеств ----
    for (&p, &n) in &walk_free {
        match table_free.get(&p) {
            Some(&m) if m == n => {}
            Some(&m) => rep.errors.push(format!(
                "free blob at page {}: walk says {} pages, table says {}",
                p, n, m
            )),
            None => rep
                .errors
                .push(format!("free blob at page {} unreachable from free table", p)),
        }
    }
    for &p in table_free.keys() {
        if !walk_free.contains_key(&p) {
            rep.errors.push(format!(
                "free table references page {} which is not a free blob",
                p
            ));
        }
    }

    Ok(rep)
}

/// Проверка leaf-таблицы одного сегмента: классы, списки, range-битмапа.
fn check_leaf(
    store: &BlobStore,
    seg: u32,
    holder: PageNum,
    table_free: &mut BTreeMap<PageNum, u32>,
    rep: &mut CheckReport,
) -> Result<()> {
    use crate::consts::{BLOB_OFF_NEXT_FREE, BLOB_OFF_PREV_FREE};

    let mut ranges_expect = 0u32;
    let guard = store.pages_per_segment();
    for bucket in 0..FREE_TABLE_LEN {
        let head = store.leaf_slot(holder, bucket)?;
        if head == NO_PAGE {
            continue;
        }
        ranges_expect |= span_bit(bucket);
        let mut cur = head;
        let mut prev = NO_PAGE;
        let mut steps = 0u32;
        while cur != NO_PAGE {
            let h = match store.blob_header(cur) {
                Ok(h) => h,
                Err(e) => {
                    rep.errors
                        .push(format!("segment {} bucket {}: {}", seg, bucket, e));
                    break;
                }
            };
            if !h.word.is_free() {
                rep.errors.push(format!(
                    "segment {} bucket {}: list entry at page {} is not free",
                    seg, bucket, cur
                ));
                break;
            }
            let pages = h.word.free_pages();
            if size_class(pages) != bucket {
                rep.errors.push(format!(
                    "segment {} bucket {}: page {} holds a {}-page run",
                    seg, bucket, cur, pages
                ));
            }
            if store.segment_of(cur) != seg {
                rep.errors.push(format!(
                    "segment {} bucket {}: page {} lies in segment {}",
                    seg,
                    bucket,
                    cur,
                    store.segment_of(cur)
                ));
            }
            if store.blob_word(cur, BLOB_OFF_PREV_FREE)? != prev {
                rep.errors.push(format!(
                    "segment {} bucket {}: broken prev link at page {}",
                    seg, bucket, cur
                ));
            }
            if table_free.insert(cur, pages).is_some() {
                rep.errors.push(format!(
                    "page {} reachable from the free table twice",
                    cur
                ));
                break;
            }
            prev = cur;
            cur = store.blob_word(cur, BLOB_OFF_NEXT_FREE)?;
            steps += 1;
            if steps > guard {
                rep.errors.push(format!(
                    "segment {} bucket {}: list does not terminate",
                    seg, bucket
                ));
                break;
            }
        }
    }
    let ranges = store.leaf_ranges(holder)?;
    if ranges != ranges_expect {
        rep.errors.push(format!(
            "segment {} leaf ranges 0x{:08x} != recomputed 0x{:08x}",
            seg, ranges, ranges_expect
        ));
    }
    Ok(())
}
