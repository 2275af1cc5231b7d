//! tx/alloc — аллокация блобов: поиск по free-таблице, сплит, рост стора.

use anyhow::Result;

use crate::blob::SizeWord;
use crate::consts::{BLOB_OFF_PRECEDING, BLOB_OFF_SIZE_WORD, MAX_SEGMENTS, PageNum};
use crate::errors::StoreError;
use crate::metrics;

use super::Transaction;

impl<'a> Transaction<'a> {
    /// Выделить блоб под payload_size байт. Возвращает первую страницу.
    ///
    /// Порядок:
    /// 1. Проверка размера (ноль или сверх максимума -> InvalidSize,
    ///    без каких-либо мутаций).
    /// 2. Поиск наименьшего подходящего свободного рана по trunk/leaf.
    /// 3. Точное совпадение — снять с таблицы; больше — сплит, хвост
    ///    возвращается в таблицу.
    /// 4. Нет подходящего — рост файла (с учётом границ сегментов).
    ///
    /// Записи ложатся в отображение сразу; барьер долговечности — commit().
    pub fn alloc(&mut self, payload_size: u32) -> Result<PageNum> {
        if payload_size == 0 || payload_size as u64 > self.store.max_payload_size() {
            return Err(StoreError::InvalidSize(payload_size as u64).into());
        }
        let needed = self.store.pages_for_payload_size(payload_size);

        let found = self.find_free_run(needed)?;
        metrics::record_ft_lookup(found.is_some());

        let first = match found {
            Some((page, pages)) => {
                self.consume_free_run(page, pages, needed)?;
                page
            }
            None => self.grow_for(needed)?,
        };

        self.store
            .set_blob_word(first, BLOB_OFF_SIZE_WORD, SizeWord::used(payload_size)?.raw())?;
        metrics::record_alloc(needed as u64);
        log::trace!(
            "alloc {} bytes -> page {} ({} pages)",
            payload_size,
            first,
            needed
        );
        Ok(first)
    }

    /// Изъять свободный ран из таблицы под аллокацию `needed` страниц.
    /// Хвост сплита возвращается в таблицу; leaf-таблица держателя при
    /// необходимости переезжает до завершения аллокации.
    fn consume_free_run(&mut self, first: PageNum, pages: u32, needed: u32) -> Result<()> {
        debug_assert!(pages >= needed);
        let seg = self.store.segment_of(first);
        let was_holder = self.store.trunk_slot(seg)? == first;

        let removed = self.remove_free_blob(first)?;
        if removed != pages {
            return Err(StoreError::InconsistentFreeList(format!(
                "free run at page {} decodes {} pages, free table said {}",
                first, removed, pages
            ))
            .into());
        }

        let remainder = pages - needed;
        if remainder > 0 {
            // Хвост становится новым свободным блобом; его preceding — занятый
            // блоб, который мы сейчас выделяем. Маркер следующего блоба
            // обновит add_free_blob.
            self.add_free_blob(first + needed, remainder, 0)?;
            metrics::record_split();
        } else {
            // Ран ушёл целиком: у следующего блоба больше нет свободного
            // соседа слева.
            let next = first + pages;
            if next < self.store.total_pages() && !self.store.is_first_page_of_segment(next) {
                self.store.set_blob_word(next, BLOB_OFF_PRECEDING, 0)?;
            }
        }

        if was_holder {
            // Держатель leaf-таблицы уходит под аллокацию: таблица обязана
            // переехать (возможно, на хвост сплита) до завершения alloc.
            self.relocate_leaf_table(seg, first)?;
        }
        Ok(())
    }

    /// Рост стора под ран из `needed` страниц. Ран не пересекает границу
    /// сегмента; первая страница нового сегмента резервируется под
    /// блоб-держатель leaf-таблицы.
    fn grow_for(&mut self, needed: u32) -> Result<PageNum> {
        let total = self.store.total_pages();
        let pps = self.store.pages_per_segment() as u64;

        let mut start = total as u64;
        let mut gap: Option<(PageNum, u32)> = None;
        if !self.store.is_first_page_of_segment(start as PageNum) {
            let seg_end = (start / pps + 1) * pps;
            if start + needed as u64 > seg_end {
                // Хвост старого сегмента становится свободным блобом.
                gap = Some((start as PageNum, (seg_end - start) as u32));
                start = seg_end;
            }
        }

        let mut reserve: Option<PageNum> = None;
        if start % pps == 0 {
            // Начало нового сегмента: первая страница — будущий держатель
            // leaf-таблицы сегмента.
            let seg = start / pps;
            if seg >= MAX_SEGMENTS as u64 {
                return Err(StoreError::OutOfSpace(format!(
                    "segment {} exceeds trunk table ({} segments max)",
                    seg, MAX_SEGMENTS
                ))
                .into());
            }
            reserve = Some(start as PageNum);
            start += 1;
        }

        let new_total = start + needed as u64;
        if new_total > u32::MAX as u64 {
            return Err(StoreError::OutOfSpace(format!(
                "page count {} exceeds 32-bit page numbers",
                new_total
            ))
            .into());
        }

        self.store.grow_to(new_total as u32)?;

        if let Some((gpage, gpages)) = gap {
            self.add_free_blob(gpage, gpages, 0)?;
        }
        if let Some(hpage) = reserve {
            // Однастраничный держатель; его маркер выставит word0 рана в 1.
            self.add_free_blob(hpage, 1, 0)?;
        }
        // Без reserve word0 новых страниц уже 0 (set_len обнуляет), и по
        // инварианту стор не кончается свободным блобом — сосед слева занят.
        Ok(start as PageNum)
    }
}
