//! store/core — ядро BlobStore: создание, открытие, проверка заголовка,
//! сегментная математика и аксессоры trunk/leaf-таблиц.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::blob::{read_header, BlobHeader};
use crate::config::{validate_page_size, StoreConfig};
use crate::consts::{
    BLOB_HEADER_SIZE, BLOB_OFF_LEAF_RANGES, FT_SPAN, HDR_OFF_CREATED, HDR_OFF_MAGIC,
    HDR_OFF_PAGE_SHIFT, HDR_OFF_TOTAL_PAGES, HDR_OFF_TRUNK_RANGES, HDR_OFF_VERSION, HDR_SIZE,
    LEAF_TABLE_OFS, MAGIC, MAX_SEGMENTS, NO_PAGE, PageNum, SEGMENT_SHIFT, VERSION,
};
use crate::errors::StoreError;
use crate::freetable::{leaf_slot_ofs, span_bit, span_of, trunk_slot_ofs};
use crate::lock::{self, LockGuard};
use crate::util::now_secs;

use super::io::MapView;

/// Персистентный page-гранулярный стор блобов.
///
/// Страница 0 — заголовок с trunk free-таблицей; остальные страницы
/// принадлежат ровно одному блобу (занятому или свободному).
#[derive(Debug)]
pub struct BlobStore {
    pub path: PathBuf,
    pub(crate) file: std::fs::File,
    pub(crate) map: MapView,
    pub(crate) page_shift: u32,
    pub(crate) commit_sync: bool,
    store_id: u64,
    _lock: LockGuard,
}

impl BlobStore {
    /// Создать новый стор: один файл, заголовок на странице 0, total=1.
    /// Ошибка, если файл уже существует.
    pub fn create(path: &Path, cfg: &StoreConfig) -> Result<Self> {
        let shift = validate_page_size(cfg.page_size)?;
        let page_size = cfg.page_size as usize;

        let mut f = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("create store {}", path.display()))?;

        let mut page0 = vec![0u8; page_size];
        LittleEndian::write_u32(&mut page0[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4], MAGIC);
        LittleEndian::write_u32(&mut page0[HDR_OFF_VERSION..HDR_OFF_VERSION + 4], VERSION);
        LittleEndian::write_u64(&mut page0[HDR_OFF_CREATED..HDR_OFF_CREATED + 8], now_secs());
        LittleEndian::write_u32(&mut page0[HDR_OFF_TOTAL_PAGES..HDR_OFF_TOTAL_PAGES + 4], 1);
        page0[HDR_OFF_PAGE_SHIFT] = shift as u8;
        // trunk_ranges и trunk-таблица обнулены — свободных блобов нет
        f.write_all(&page0)?;
        f.sync_all()?;
        drop(f);

        log::info!(
            "created store {} (page_size={})",
            path.display(),
            cfg.page_size
        );
        Self::open_with(path, cfg)
    }

    /// Открыть стор на запись с конфигурацией из окружения.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &StoreConfig::from_env())
    }

    /// Открыть стор на запись. Эксклюзивный лок: второй писатель получает
    /// ошибку сразу, без ожидания.
    pub fn open_with(path: &Path, cfg: &StoreConfig) -> Result<Self> {
        let guard = lock::try_acquire_exclusive_lock(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open store {}", path.display()))?;
        let map = MapView::map_rw(&file)?;
        Self::finish_open(path, file, map, cfg.commit_sync, guard)
    }

    /// Открыть стор только на чтение (status/check и другие инспекции).
    pub fn open_ro(path: &Path) -> Result<Self> {
        let guard = lock::try_acquire_shared_lock(path)?;
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("open store {}", path.display()))?;
        let map = MapView::map_ro(&file)?;
        Self::finish_open(path, file, map, false, guard)
    }

    fn finish_open(
        path: &Path,
        file: std::fs::File,
        map: MapView,
        commit_sync: bool,
        guard: LockGuard,
    ) -> Result<Self> {
        // verify + initialize: page_shift выводится из заголовка
        let page_shift = verify_header_bytes(map.bytes())?;
        let store = Self {
            path: path.to_path_buf(),
            file,
            map,
            page_shift,
            commit_sync,
            store_id: compute_store_id(path),
            _lock: guard,
        };
        Ok(store)
    }

    /// Перепроверить заголовок текущего отображения.
    pub fn verify_header(&self) -> Result<()> {
        verify_header_bytes(self.map.bytes())?;
        Ok(())
    }

    /// Стабильный идентификатор стора (канонический путь + dev/ino на Unix).
    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    // ---------------- геометрия ----------------

    #[inline]
    pub fn page_size(&self) -> u32 {
        1u32 << self.page_shift
    }

    #[inline]
    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// Число страниц в сегменте (2^30 байт адресного пространства).
    #[inline]
    pub fn pages_per_segment(&self) -> u32 {
        1u32 << (SEGMENT_SHIFT - self.page_shift)
    }

    /// Номер сегмента страницы.
    #[inline]
    pub fn segment_of(&self, page: PageNum) -> u32 {
        page >> (SEGMENT_SHIFT - self.page_shift)
    }

    /// Первая страница сегмента? (30-битная внутрисегментная маска)
    #[inline]
    pub fn is_first_page_of_segment(&self, page: PageNum) -> bool {
        (page & (0x3fff_ffffu32 >> self.page_shift)) == 0
    }

    /// Сколько страниц занимает блоб с данным payload.
    #[inline]
    pub fn pages_for_payload_size(&self, payload_size: u32) -> u32 {
        let ps = self.page_size() as u64;
        (((payload_size as u64) + BLOB_HEADER_SIZE as u64 + ps - 1) >> self.page_shift) as u32
    }

    /// Максимальный payload: ран не длиннее pages_per_segment - 1
    /// (первая страница каждого сегмента занята заголовком стора либо
    /// блобом-держателем leaf-таблицы).
    #[inline]
    pub fn max_payload_size(&self) -> u64 {
        (((self.pages_per_segment() - 1) as u64) << self.page_shift) - BLOB_HEADER_SIZE as u64
    }

    // ---------------- заголовок ----------------

    /// Общее число страниц (свободные + занятые, включая страницу 0).
    #[inline]
    pub fn total_pages(&self) -> u32 {
        LittleEndian::read_u32(&self.map.bytes()[HDR_OFF_TOTAL_PAGES..HDR_OFF_TOTAL_PAGES + 4])
    }

    pub(crate) fn set_total_pages(&mut self, total: u32) -> Result<()> {
        self.set_word_at(HDR_OFF_TOTAL_PAGES as u64, total)
    }

    /// Unix-время создания стора.
    pub fn created(&self) -> u64 {
        LittleEndian::read_u64(&self.map.bytes()[HDR_OFF_CREATED..HDR_OFF_CREATED + 8])
    }

    /// Версия формата из заголовка.
    pub fn version(&self) -> u32 {
        LittleEndian::read_u32(&self.map.bytes()[HDR_OFF_VERSION..HDR_OFF_VERSION + 4])
    }

    // ---------------- trunk-таблица ----------------

    #[inline]
    pub(crate) fn trunk_ranges(&self) -> u32 {
        LittleEndian::read_u32(&self.map.bytes()[HDR_OFF_TRUNK_RANGES..HDR_OFF_TRUNK_RANGES + 4])
    }

    pub(crate) fn trunk_slot(&self, segment: u32) -> Result<PageNum> {
        if segment >= MAX_SEGMENTS {
            return Err(StoreError::InconsistentFreeList(format!(
                "segment {} out of trunk table",
                segment
            ))
            .into());
        }
        self.word_at(trunk_slot_ofs(segment as usize) as u64)
    }

    pub(crate) fn set_trunk_slot(&mut self, segment: u32, page: PageNum) -> Result<()> {
        if segment >= MAX_SEGMENTS {
            return Err(StoreError::InconsistentFreeList(format!(
                "segment {} out of trunk table",
                segment
            ))
            .into());
        }
        self.set_word_at(trunk_slot_ofs(segment as usize) as u64, page)
    }

    pub(crate) fn set_trunk_range_bit(&mut self, segment: u32) -> Result<()> {
        let r = self.trunk_ranges() | span_bit(segment as usize);
        self.set_word_at(HDR_OFF_TRUNK_RANGES as u64, r)
    }

    /// Снять бит диапазона trunk-таблицы, если все 16 слотов диапазона пусты.
    pub(crate) fn clear_trunk_range_bit_if_empty(&mut self, segment: u32) -> Result<()> {
        let span = span_of(segment as usize);
        for s in span * FT_SPAN..(span + 1) * FT_SPAN {
            if s as u32 >= MAX_SEGMENTS {
                break;
            }
            if self.trunk_slot(s as u32)? != NO_PAGE {
                return Ok(());
            }
        }
        let r = self.trunk_ranges() & !span_bit(segment as usize);
        self.set_word_at(HDR_OFF_TRUNK_RANGES as u64, r)
    }

    // ---------------- блобы ----------------

    /// Байтовое смещение начала страницы.
    #[inline]
    pub(crate) fn blob_ofs(&self, page: PageNum) -> u64 {
        (page as u64) << self.page_shift
    }

    /// Слово заголовка блоба по смещению внутри блоба.
    pub(crate) fn blob_word(&self, page: PageNum, off: usize) -> Result<u32> {
        self.check_blob_page(page)?;
        self.word_at(self.blob_ofs(page) + off as u64)
    }

    pub(crate) fn set_blob_word(&mut self, page: PageNum, off: usize, v: u32) -> Result<()> {
        self.check_blob_page(page)?;
        self.set_word_at(self.blob_ofs(page) + off as u64, v)
    }

    /// Заголовок блоба (первые два слова).
    pub fn blob_header(&self, page: PageNum) -> Result<BlobHeader> {
        self.check_blob_page(page)?;
        let ofs = self.blob_ofs(page) as usize;
        Ok(read_header(&self.map.bytes()[ofs..ofs + 8]))
    }

    #[inline]
    fn check_blob_page(&self, page: PageNum) -> Result<()> {
        if page == NO_PAGE || page >= self.total_pages() {
            return Err(StoreError::InconsistentFreeList(format!(
                "page {} outside blob range (total {})",
                page,
                self.total_pages()
            ))
            .into());
        }
        Ok(())
    }

    // ---------------- leaf-таблица (на блобе-держателе) ----------------

    pub(crate) fn leaf_ranges(&self, holder: PageNum) -> Result<u32> {
        self.blob_word(holder, BLOB_OFF_LEAF_RANGES)
    }

    pub(crate) fn leaf_slot(&self, holder: PageNum, bucket: usize) -> Result<PageNum> {
        self.blob_word(holder, leaf_slot_ofs(bucket))
    }

    pub(crate) fn set_leaf_slot(&mut self, holder: PageNum, bucket: usize, page: PageNum) -> Result<()> {
        self.set_blob_word(holder, leaf_slot_ofs(bucket), page)
    }

    pub(crate) fn set_leaf_range_bit(&mut self, holder: PageNum, bucket: usize) -> Result<()> {
        let r = self.leaf_ranges(holder)? | span_bit(bucket);
        self.set_blob_word(holder, BLOB_OFF_LEAF_RANGES, r)
    }

    /// Снять бит диапазона leaf-таблицы, если все 16 бакетов диапазона пусты.
    pub(crate) fn clear_leaf_range_bit_if_empty(&mut self, holder: PageNum, bucket: usize) -> Result<()> {
        let span = span_of(bucket);
        for b in span * FT_SPAN..(span + 1) * FT_SPAN {
            if self.leaf_slot(holder, b)? != NO_PAGE {
                return Ok(());
            }
        }
        let r = self.leaf_ranges(holder)? & !span_bit(bucket);
        self.set_blob_word(holder, BLOB_OFF_LEAF_RANGES, r)
    }

    /// Инициализировать пустую leaf-таблицу на новом держателе.
    pub(crate) fn init_leaf_table(&mut self, page: PageNum) -> Result<()> {
        self.check_blob_page(page)?;
        let base = self.blob_ofs(page) as usize;
        let bytes = self.map.bytes_mut()?;
        bytes[base + BLOB_OFF_LEAF_RANGES..base + BLOB_OFF_LEAF_RANGES + 4].fill(0);
        bytes[base + LEAF_TABLE_OFS..base + LEAF_TABLE_END].fill(0);
        Ok(())
    }

    /// Перенести leaf-таблицу (ranges + слоты) с одного блоба на другой.
    pub(crate) fn copy_leaf_table(&mut self, from: PageNum, to: PageNum) -> Result<()> {
        self.check_blob_page(from)?;
        self.check_blob_page(to)?;
        let src = self.blob_ofs(from) as usize;
        let dst = self.blob_ofs(to) as usize;
        let ranges = {
            let b = self.map.bytes();
            let mut tmp = vec![0u8; LEAF_TABLE_END - LEAF_TABLE_OFS];
            tmp.copy_from_slice(&b[src + LEAF_TABLE_OFS..src + LEAF_TABLE_END]);
            let r = LittleEndian::read_u32(
                &b[src + BLOB_OFF_LEAF_RANGES..src + BLOB_OFF_LEAF_RANGES + 4],
            );
            (r, tmp)
        };
        let bytes = self.map.bytes_mut()?;
        LittleEndian::write_u32(
            &mut bytes[dst + BLOB_OFF_LEAF_RANGES..dst + BLOB_OFF_LEAF_RANGES + 4],
            ranges.0,
        );
        bytes[dst + LEAF_TABLE_OFS..dst + LEAF_TABLE_END].copy_from_slice(&ranges.1);
        Ok(())
    }
}

/// Конец области leaf-таблицы внутри страницы держателя.
const LEAF_TABLE_END: usize = LEAF_TABLE_OFS + crate::consts::FREE_TABLE_LEN * 4;

/// Стабильный идентификатор стора (канонический путь + dev/ino на Unix).
fn compute_store_id(path: &Path) -> u64 {
    use std::hash::Hasher;
    let mut h = twox_hash::XxHash64::with_seed(0x7ADA_0BB1_5EED_1D01);
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    h.write(canon.to_string_lossy().as_bytes());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(md) = std::fs::metadata(&canon) {
            h.write_u64(md.dev());
            h.write_u64(md.ino());
        }
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_page(magic: u32, version: u32, shift: u8, total: u32) -> Vec<u8> {
        let mut buf = vec![0u8; (total as usize) << shift];
        LittleEndian::write_u32(&mut buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4], magic);
        LittleEndian::write_u32(&mut buf[HDR_OFF_VERSION..HDR_OFF_VERSION + 4], version);
        LittleEndian::write_u32(&mut buf[HDR_OFF_TOTAL_PAGES..HDR_OFF_TOTAL_PAGES + 4], total);
        buf[HDR_OFF_PAGE_SHIFT] = shift;
        buf
    }

    #[test]
    fn header_accepts_valid() {
        let buf = header_page(MAGIC, VERSION, 12, 1);
        assert_eq!(verify_header_bytes(&buf).unwrap(), 12);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let buf = header_page(0x1234_5678, VERSION, 12, 1);
        let err = verify_header_bytes(&buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptStore(_))
        ));
    }

    #[test]
    fn header_rejects_major_version_mismatch() {
        let buf = header_page(MAGIC, 2_000_000, 12, 1);
        let err = verify_header_bytes(&buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::UnsupportedVersion(2_000_000))
        ));
        // Минорные ревизии того же мажора совместимы
        let buf = header_page(MAGIC, VERSION + 17, 12, 1);
        assert!(verify_header_bytes(&buf).is_ok());
    }

    #[test]
    fn header_rejects_length_mismatch() {
        let mut buf = header_page(MAGIC, VERSION, 12, 2);
        buf.truncate(4096);
        let err = verify_header_bytes(&buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptStore(_))
        ));
    }

    #[test]
    fn header_rejects_bad_shift() {
        let buf = header_page(MAGIC, VERSION, 9, 8);
        assert!(verify_header_bytes(&buf).is_err());
    }
}
/// Проверка заголовка: magic, версия, геометрия, длина файла.
/// Возвращает page_shift.
fn verify_header_bytes(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < HDR_SIZE {
        return Err(StoreError::CorruptStore(format!(
            "file too small for header ({} bytes)",
            bytes.len()
        ))
        .into());
    }
    let magic = LittleEndian::read_u32(&bytes[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4]);
    if magic != MAGIC {
        return Err(StoreError::CorruptStore(format!(
            "bad magic 0x{:08x} (expected 0x{:08x})",
            magic, MAGIC
        ))
        .into());
    }
    let version = LittleEndian::read_u32(&bytes[HDR_OFF_VERSION..HDR_OFF_VERSION + 4]);
    if version / 1_000_000 != VERSION / 1_000_000 {
        return Err(StoreError::UnsupportedVersion(version).into());
    }
    let shift = bytes[HDR_OFF_PAGE_SHIFT] as u32;
    if !(crate::consts::MIN_PAGE_SHIFT..=crate::consts::MAX_PAGE_SHIFT).contains(&shift) {
        return Err(StoreError::CorruptStore(format!("bad page shift {}", shift)).into());
    }
    let total =
        LittleEndian::read_u32(&bytes[HDR_OFF_TOTAL_PAGES..HDR_OFF_TOTAL_PAGES + 4]) as u64;
    if total == 0 || bytes.len() as u64 != total << shift {
        return Err(StoreError::CorruptStore(format!(
            "page count {} does not match file length {}",
            total,
            bytes.len()
        ))
        .into());
    }
    Ok(shift)
}

