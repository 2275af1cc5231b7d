//! tx/table — операции над двухуровневой free-таблицей:
//! поиск подходящего рана, вставка/изъятие свободного блоба,
//! перенос leaf-таблицы держателя.

use anyhow::Result;

use crate::blob::SizeWord;
use crate::consts::{
    BLOB_OFF_NEXT_FREE, BLOB_OFF_PRECEDING, BLOB_OFF_PREV_FREE, BLOB_OFF_SIZE_WORD,
    FREE_TABLE_LEN, FT_SPAN, NO_PAGE, PageNum,
};
use crate::errors::StoreError;
use crate::freetable::{is_exact_bucket, size_class, span_of, spans_from, BitScan};
use crate::metrics;

use super::Transaction;

impl<'a> Transaction<'a> {
    /// Найти наименьший подходящий свободный ран (>= needed страниц).
    ///
    /// Trunk-битмапа ведёт по сегментам (по возрастанию номера); внутри
    /// сегмента leaf-битмапа сканируется от диапазона запрошенного класса,
    /// в первом непустом диапазоне бакеты перебираются по возрастанию.
    pub(crate) fn find_free_run(&self, needed: u32) -> Result<Option<(PageNum, u32)>> {
        let from_class = size_class(needed);
        for span in BitScan::new(self.store.trunk_ranges()) {
            for seg in span * FT_SPAN..(span + 1) * FT_SPAN {
                let holder = self.store.trunk_slot(seg as u32)?;
                if holder == NO_PAGE {
                    continue;
                }
                if let Some(hit) = self.find_in_leaf(holder, needed, from_class)? {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    /// Поиск внутри одного сегмента по leaf-таблице держателя.
    fn find_in_leaf(
        &self,
        holder: PageNum,
        needed: u32,
        from_class: usize,
    ) -> Result<Option<(PageNum, u32)>> {
        let ranges = self.store.leaf_ranges(holder)? & spans_from(span_of(from_class));
        for span in BitScan::new(ranges) {
            let lo = (span * FT_SPAN).max(from_class);
            for bucket in lo..(span + 1) * FT_SPAN {
                let head = self.store.leaf_slot(holder, bucket)?;
                if head == NO_PAGE {
                    continue;
                }
                if is_exact_bucket(bucket) {
                    // Точный класс: любой элемент списка имеет bucket+1 страниц.
                    let pages = bucket as u32 + 1;
                    let h = self.store.blob_header(head)?;
                    if !h.word.is_free() || h.word.free_pages() != pages {
                        return Err(StoreError::InconsistentFreeList(format!(
                            "bucket {} head at page {} is not a free run of {} pages",
                            bucket, head, pages
                        ))
                        .into());
                    }
                    return Ok(Some((head, pages)));
                }
                // Переполнение: линейный поиск наименьшего подходящего.
                if let Some(hit) = self.scan_overflow(head, needed)? {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    /// Линейный проход по списку переполнения (раны >= 512 страниц),
    /// выбирает наименьший подходящий.
    fn scan_overflow(&self, head: PageNum, needed: u32) -> Result<Option<(PageNum, u32)>> {
        let mut best: Option<(PageNum, u32)> = None;
        let mut cur = head;
        let mut steps = 0u32;
        let guard = self.store.pages_per_segment();
        while cur != NO_PAGE {
            let h = self.store.blob_header(cur)?;
            if !h.word.is_free() {
                return Err(StoreError::InconsistentFreeList(format!(
                    "overflow list entry at page {} is not free",
                    cur
                ))
                .into());
            }
            let pages = h.word.free_pages();
            if pages >= needed && best.map_or(true, |(_, bp)| pages < bp) {
                best = Some((cur, pages));
            }
            cur = self.store.blob_word(cur, BLOB_OFF_NEXT_FREE)?;
            steps += 1;
            if steps > guard {
                return Err(StoreError::InconsistentFreeList(
                    "overflow list does not terminate".into(),
                )
                .into());
            }
        }
        Ok(best)
    }

    /// Найти в таблице сегмента свободный ран, заканчивающийся ровно на
    /// странице `end` (нужно каскадному усечению через границу сегмента).
    pub(crate) fn find_free_run_ending_at(
        &self,
        seg: u32,
        end: PageNum,
    ) -> Result<Option<PageNum>> {
        let holder = self.store.trunk_slot(seg)?;
        if holder == NO_PAGE {
            return Ok(None);
        }
        let guard = self.store.pages_per_segment();
        for bucket in BitScan::new(self.store.leaf_ranges(holder)?)
            .flat_map(|span| span * FT_SPAN..(span + 1) * FT_SPAN)
        {
            let mut cur = self.store.leaf_slot(holder, bucket)?;
            let mut steps = 0u32;
            while cur != NO_PAGE {
                let h = self.store.blob_header(cur)?;
                if !h.word.is_free() {
                    return Err(StoreError::InconsistentFreeList(format!(
                        "free list entry at page {} is not free",
                        cur
                    ))
                    .into());
                }
                if cur + h.word.free_pages() == end {
                    return Ok(Some(cur));
                }
                cur = self.store.blob_word(cur, BLOB_OFF_NEXT_FREE)?;
                steps += 1;
                if steps > guard {
                    return Err(StoreError::InconsistentFreeList(format!(
                        "bucket {} list does not terminate",
                        bucket
                    ))
                    .into());
                }
            }
        }
        Ok(None)
    }

    /// Вставить свободный ран в таблицу сегмента (в голову списка класса),
    /// проставить маркер коалесценции следующему блобу.
    pub(crate) fn add_free_blob(
        &mut self,
        first_page: PageNum,
        pages: u32,
        preceding_free_pages: u32,
    ) -> Result<()> {
        let seg = self.store.segment_of(first_page);
        let mut holder = self.store.trunk_slot(seg)?;
        if holder == NO_PAGE {
            // Первый свободный блоб сегмента становится держателем
            // leaf-таблицы.
            self.store.init_leaf_table(first_page)?;
            self.store.set_trunk_slot(seg, first_page)?;
            self.store.set_trunk_range_bit(seg)?;
            holder = first_page;
        }

        let bucket = size_class(pages);
        let head = self.store.leaf_slot(holder, bucket)?;

        self.store
            .set_blob_word(first_page, BLOB_OFF_PRECEDING, preceding_free_pages)?;
        self.store
            .set_blob_word(first_page, BLOB_OFF_SIZE_WORD, SizeWord::free(pages).raw())?;
        self.store
            .set_blob_word(first_page, BLOB_OFF_PREV_FREE, NO_PAGE)?;
        self.store
            .set_blob_word(first_page, BLOB_OFF_NEXT_FREE, head)?;
        if head != NO_PAGE {
            self.store.set_blob_word(head, BLOB_OFF_PREV_FREE, first_page)?;
        }
        self.store.set_leaf_slot(holder, bucket, first_page)?;
        self.store.set_leaf_range_bit(holder, bucket)?;

        // Маркер обратного слияния: следующий блоб знает длину свободного
        // соседа слева. Через границу сегмента маркер не ставится.
        let next = first_page + pages;
        if next < self.store.total_pages() && !self.store.is_first_page_of_segment(next) {
            self.store.set_blob_word(next, BLOB_OFF_PRECEDING, pages)?;
        }
        Ok(())
    }

    /// Изъять свободный блоб из списка его класса. Возвращает длину рана.
    /// Бит диапазона снимается, только если опустел весь диапазон бакетов.
    pub(crate) fn remove_free_blob(&mut self, page: PageNum) -> Result<u32> {
        let h = self.store.blob_header(page)?;
        if !h.word.is_free() {
            return Err(StoreError::InconsistentFreeList(format!(
                "remove of non-free blob at page {}",
                page
            ))
            .into());
        }
        let pages = h.word.free_pages();
        let bucket = size_class(pages);
        let seg = self.store.segment_of(page);

        let prev = self.store.blob_word(page, BLOB_OFF_PREV_FREE)?;
        let next = self.store.blob_word(page, BLOB_OFF_NEXT_FREE)?;

        if prev != NO_PAGE {
            let ph = self.store.blob_header(prev)?;
            if !ph.word.is_free() {
                return Err(StoreError::InconsistentFreeList(format!(
                    "prev link of page {} points at used page {}",
                    page, prev
                ))
                .into());
            }
            self.store.set_blob_word(prev, BLOB_OFF_NEXT_FREE, next)?;
        } else {
            // Голова списка: правим слот leaf-таблицы держателя.
            let holder = self.store.trunk_slot(seg)?;
            if holder == NO_PAGE {
                return Err(StoreError::InconsistentFreeList(format!(
                    "segment {} has free blob at page {} but no leaf table",
                    seg, page
                ))
                .into());
            }
            if self.store.leaf_slot(holder, bucket)? != page {
                return Err(StoreError::InconsistentFreeList(format!(
                    "page {} is not the head of bucket {} in segment {}",
                    page, bucket, seg
                ))
                .into());
            }
            self.store.set_leaf_slot(holder, bucket, next)?;
            if next == NO_PAGE {
                self.store.clear_leaf_range_bit_if_empty(holder, bucket)?;
            }
        }

        if next != NO_PAGE {
            self.store.set_blob_word(next, BLOB_OFF_PREV_FREE, prev)?;
        }
        Ok(pages)
    }

    /// Перенести leaf-таблицу сегмента с from_page на другой свободный блоб
    /// сегмента; если свободных блобов не осталось — снять держателя.
    ///
    /// Предусловие: trunk[seg] == from_page, from_page уже изъят из таблицы.
    /// Постусловие: trunk[seg] указывает на свободный блоб либо NO_PAGE.
    pub(crate) fn relocate_leaf_table(
        &mut self,
        seg: u32,
        from_page: PageNum,
    ) -> Result<Option<PageNum>> {
        if self.store.trunk_slot(seg)? != from_page {
            return Err(StoreError::InconsistentFreeList(format!(
                "relocation precondition: trunk[{}] != page {}",
                seg, from_page
            ))
            .into());
        }

        let ranges = self.store.leaf_ranges(from_page)?;
        let mut target = NO_PAGE;
        'outer: for span in BitScan::new(ranges) {
            for bucket in span * FT_SPAN..(span + 1) * FT_SPAN {
                let head = self.store.leaf_slot(from_page, bucket)?;
                if head != NO_PAGE {
                    target = head;
                    break 'outer;
                }
            }
        }

        if target == NO_PAGE {
            // Таблица обязана быть пустой целиком (не только по битмапе).
            for bucket in 0..FREE_TABLE_LEN {
                if self.store.leaf_slot(from_page, bucket)? != NO_PAGE {
                    return Err(StoreError::InconsistentFreeList(format!(
                        "segment {} leaf ranges empty but bucket {} is not",
                        seg, bucket
                    ))
                    .into());
                }
            }
            self.store.set_trunk_slot(seg, NO_PAGE)?;
            self.store.clear_trunk_range_bit_if_empty(seg)?;
            log::trace!("segment {} leaf table retired (no free blobs left)", seg);
            return Ok(None);
        }

        let th = self.store.blob_header(target)?;
        if !th.word.is_free() {
            return Err(StoreError::InconsistentFreeList(format!(
                "relocation target at page {} is not free",
                target
            ))
            .into());
        }
        self.store.copy_leaf_table(from_page, target)?;
        self.store.set_trunk_slot(seg, target)?;
        metrics::record_leaf_relocation();
        log::trace!("segment {} leaf table moved {} -> {}", seg, from_page, target);
        Ok(Some(target))
    }
}
