//! tx/free — стейджинг освобождений и коалесценция при commit.
//!
//! free() только стейджит ран в freed_blobs (на диске блоб остаётся
//! занятым). При commit() staged-раны сортированы по возрастанию страниц:
//! смежные staged-раны склеиваются заранее, затем каждый склеенный ран
//! сливается с зафиксированными свободными соседями (слева — через
//! preceding_free_pages, справа — по флагу «свободен»), один раз платя
//! стоимость обновления таблиц. Границы сегментов слияние не пересекает.
//!
//! Ран, упирающийся в конец файла, не попадает в таблицу — файл усекается
//! (стор никогда не кончается свободным блобом).

use anyhow::{anyhow, Result};

use crate::consts::{BLOB_OFF_PRECEDING, NO_PAGE, PageNum};
use crate::errors::StoreError;
use crate::metrics;

use super::Transaction;

impl<'a> Transaction<'a> {
    /// Стейджить освобождение блоба, начинающегося на first_page.
    /// Слияние и обновление free-таблиц откладываются до commit().
    pub fn free(&mut self, first_page: PageNum) -> Result<()> {
        if first_page == NO_PAGE {
            return Err(anyhow!("header page is not freeable"));
        }
        if first_page >= self.store.total_pages() {
            return Err(anyhow!(
                "free of page {} out of range (total {})",
                first_page,
                self.store.total_pages()
            ));
        }
        let h = self.store.blob_header(first_page)?;
        if h.word.is_free() {
            return Err(anyhow!("blob at page {} is already free", first_page));
        }
        let pages = self.store.pages_for_payload_size(h.word.payload_size());

        // Защита от повторного/вложенного стейджинга того же пространства.
        if let Some((&s, &p)) = self.freed_blobs.range(..=first_page).next_back() {
            if s + p > first_page {
                return Err(anyhow!(
                    "page {} already staged for free (run {}+{})",
                    first_page,
                    s,
                    p
                ));
            }
        }

        self.freed_blobs.insert(first_page, pages);
        metrics::record_free(pages as u64);
        log::trace!("free staged: page {} ({} pages)", first_page, pages);
        Ok(())
    }

    /// Слить все staged-освобождения в free-таблицу (вызывается из commit).
    pub(crate) fn merge_freed(&mut self) -> Result<()> {
        if self.freed_blobs.is_empty() {
            return Ok(());
        }

        // Склейка смежных staged-ранов (в пределах сегмента): платим за
        // обновление таблиц один раз на объединённый ран.
        let mut runs: Vec<(PageNum, u32)> = Vec::with_capacity(self.freed_blobs.len());
        for (&page, &pages) in self.freed_blobs.iter() {
            if let Some(last) = runs.last_mut() {
                if last.0 + last.1 == page && !self.store.is_first_page_of_segment(page) {
                    last.1 += pages;
                    continue;
                }
            }
            runs.push((page, pages));
        }

        for (start, pages) in runs {
            self.merge_one(start, pages)?;
        }
        self.freed_blobs.clear();
        Ok(())
    }

    /// Слить один освобождаемый ран со свободными соседями и вернуть
    /// результат в таблицу (или усечь файл, если ран хвостовой).
    fn merge_one(&mut self, start: PageNum, pages: u32) -> Result<()> {
        let mut mstart = start;
        let mut mpages = pages;

        // Сосед слева: O(1) через маркер preceding_free_pages.
        if !self.store.is_first_page_of_segment(start) {
            let p = self.store.blob_word(start, BLOB_OFF_PRECEDING)?;
            if p > 0 {
                let left = start.checked_sub(p).ok_or_else(|| {
                    StoreError::InconsistentFreeList(format!(
                        "preceding run length {} underflows page {}",
                        p, start
                    ))
                })?;
                let lh = self.store.blob_header(left)?;
                if !lh.word.is_free() || lh.word.free_pages() != p {
                    return Err(StoreError::InconsistentFreeList(format!(
                        "page {} marks preceding free run {}+{}, header disagrees",
                        start, left, p
                    ))
                    .into());
                }
                self.remove_free_blob(left)?;
                // Держатель не переезжает: таблица остаётся на left == mstart.
                mstart = left;
                mpages += p;
                metrics::record_merge();
            }
        }

        // Сосед справа: по флагу «свободен» следующего блоба.
        let next = start + pages;
        if next < self.store.total_pages() && !self.store.is_first_page_of_segment(next) {
            let nh = self.store.blob_header(next)?;
            if nh.word.is_free() {
                let rp = nh.word.free_pages();
                let seg = self.store.segment_of(next);
                let right_was_holder = self.store.trunk_slot(seg)? == next;
                self.remove_free_blob(next)?;
                if right_was_holder {
                    // Таблица переезжает на начало объединённого рана до
                    // вставки: add_free_blob будет писать уже в новую копию.
                    self.store.copy_leaf_table(next, mstart)?;
                    self.store.set_trunk_slot(seg, mstart)?;
                    metrics::record_leaf_relocation();
                }
                mpages += rp;
                metrics::record_merge();
            }
        }

        // Хвостовой ран: усечение вместо возврата в таблицу.
        if mstart + mpages == self.store.total_pages() {
            return self.truncate_tail(mstart);
        }

        self.add_free_blob(mstart, mpages, 0)?;
        Ok(())
    }

    /// Усечь файл по начало хвостового рана. Слияние не пересекает границы
    /// сегментов, поэтому после среза хвостом может оказаться свободный ран,
    /// заканчивающийся ровно на границе, — каскадно забираем и его.
    fn truncate_tail(&mut self, mut cut: PageNum) -> Result<()> {
        loop {
            // Срезаемый ран мог держать leaf-таблицу своего сегмента.
            let seg = self.store.segment_of(cut);
            if self.store.trunk_slot(seg)? == cut {
                self.relocate_leaf_table(seg, cut)?;
            }
            if !self.store.is_first_page_of_segment(cut) {
                // Внутри сегмента сосед слева занят (иначе слился бы).
                break;
            }
            let prev_seg = self.store.segment_of(cut - 1);
            match self.find_free_run_ending_at(prev_seg, cut)? {
                Some(start) => {
                    self.remove_free_blob(start)?;
                    cut = start;
                }
                None => break,
            }
        }
        self.store.truncate_to(cut)
    }
}
