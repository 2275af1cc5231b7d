//! store/io — отображение файла в память, рост/усечение в страницах,
//! перевод страниц в указатели, readahead и flush.
//!
//! Стратегия MMAP: мапим ВЕСЬ файл с offset=0. Рост и усечение меняют
//! длину файла (set_len) и перестраивают отображение; сырые указатели,
//! выданные translate_page()/data_ptr(), действительны только до
//! следующего remap (т.е. до роста/усечения стора).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::consts::{BLOB_HEADER_SIZE, BLOB_OFF_SIZE_WORD, PageNum};
use crate::blob::SizeWord;
use crate::errors::StoreError;
use crate::metrics;

use super::core::BlobStore;

/// Отображение файла: RO для инспекции, RW для писателя.
#[derive(Debug)]
pub(crate) enum MapView {
    Ro(Mmap),
    Rw(MmapMut),
}

impl MapView {
    pub(crate) fn map_ro(file: &std::fs::File) -> Result<Self> {
        let m = unsafe {
            MmapOptions::new()
                .map(file)
                .map_err(|e| anyhow!("mmap (ro): {}", e))?
        };
        Ok(MapView::Ro(m))
    }

    pub(crate) fn map_rw(file: &std::fs::File) -> Result<Self> {
        let m = unsafe {
            MmapOptions::new()
                .map_mut(file)
                .map_err(|e| anyhow!("mmap (rw): {}", e))?
        };
        Ok(MapView::Rw(m))
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            MapView::Ro(m) => &m[..],
            MapView::Rw(m) => &m[..],
        }
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match self {
            MapView::Ro(_) => Err(anyhow!("store is open read-only")),
            MapView::Rw(m) => Ok(&mut m[..]),
        }
    }

    pub(crate) fn flush(&self) -> Result<()> {
        match self {
            MapView::Ro(_) => Ok(()),
            MapView::Rw(m) => m.flush().context("msync store mapping"),
        }
    }

    #[cfg(unix)]
    pub(crate) fn advise_range(&self, ofs: usize, len: usize) -> Result<()> {
        use memmap2::Advice;
        match self {
            MapView::Ro(m) => m
                .advise_range(Advice::WillNeed, ofs, len)
                .context("madvise(WILLNEED)"),
            MapView::Rw(m) => m
                .advise_range(Advice::WillNeed, ofs, len)
                .context("madvise(WILLNEED)"),
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn advise_range(&self, _ofs: usize, _len: usize) -> Result<()> {
        Ok(())
    }
}

impl BlobStore {
    // ---------------- слова отображения ----------------

    pub(crate) fn word_at(&self, ofs: u64) -> Result<u32> {
        let bytes = self.map.bytes();
        let end = ofs
            .checked_add(4)
            .ok_or_else(|| StoreError::CorruptStore(format!("offset {} overflows", ofs)))?;
        if end > bytes.len() as u64 {
            return Err(StoreError::CorruptStore(format!(
                "read at {} past end of mapping ({})",
                ofs,
                bytes.len()
            ))
            .into());
        }
        Ok(LittleEndian::read_u32(&bytes[ofs as usize..ofs as usize + 4]))
    }

    pub(crate) fn set_word_at(&mut self, ofs: u64, v: u32) -> Result<()> {
        let bytes = self.map.bytes_mut()?;
        let end = ofs
            .checked_add(4)
            .ok_or_else(|| StoreError::CorruptStore(format!("offset {} overflows", ofs)))?;
        if end > bytes.len() as u64 {
            return Err(StoreError::CorruptStore(format!(
                "write at {} past end of mapping ({})",
                ofs,
                bytes.len()
            ))
            .into());
        }
        LittleEndian::write_u32(&mut bytes[ofs as usize..ofs as usize + 4], v);
        Ok(())
    }

    // ---------------- рост и усечение ----------------

    pub(crate) fn require_writable(&self) -> Result<()> {
        match self.map {
            MapView::Rw(_) => Ok(()),
            MapView::Ro(_) => Err(anyhow!("store is open read-only")),
        }
    }

    fn remap(&mut self) -> Result<()> {
        let ro = matches!(self.map, MapView::Ro(_));
        self.map = if ro {
            MapView::map_ro(&self.file)?
        } else {
            MapView::map_rw(&self.file)?
        };
        Ok(())
    }

    /// Дорастить файл до new_total страниц и обновить заголовок.
    /// Новые страницы приходят обнулёнными (set_len).
    pub(crate) fn grow_to(&mut self, new_total: u32) -> Result<()> {
        self.require_writable()?;
        debug_assert!(new_total > self.total_pages());
        let new_len = (new_total as u64) << self.page_shift;
        self.file
            .set_len(new_len)
            .with_context(|| format!("grow store to {} pages", new_total))?;
        self.remap()?;
        self.set_total_pages(new_total)?;
        metrics::record_grow();
        log::debug!("store grown to {} pages", new_total);
        Ok(())
    }

    /// Усечь файл до new_total страниц и обновить заголовок.
    pub(crate) fn truncate_to(&mut self, new_total: u32) -> Result<()> {
        self.require_writable()?;
        debug_assert!(new_total >= 1 && new_total < self.total_pages());
        // total обновляем до set_len: заголовок живёт на странице 0
        self.set_total_pages(new_total)?;
        let new_len = (new_total as u64) << self.page_shift;
        self.map.flush()?;
        self.file
            .set_len(new_len)
            .with_context(|| format!("truncate store to {} pages", new_total))?;
        self.remap()?;
        metrics::record_truncation();
        log::debug!("store truncated to {} pages", new_total);
        Ok(())
    }

    /// Барьер долговечности commit(): msync отображения и, по конфигурации,
    /// fsync файла.
    pub(crate) fn commit_flush(&mut self) -> Result<()> {
        self.map.flush()?;
        if self.commit_sync {
            self.file.sync_all().context("fsync store file")?;
        }
        Ok(())
    }

    // ---------------- указатели и срезы ----------------

    /// Сырой указатель на начало страницы. Действителен до следующего
    /// роста/усечения стора.
    pub fn translate_page(&self, page: PageNum) -> Result<*const u8> {
        let s = self.page_slice(page)?;
        Ok(s.as_ptr())
    }

    /// Сырой указатель на произвольное байтовое смещение.
    pub fn data_ptr(&self, ofs: u64) -> Result<*const u8> {
        let bytes = self.map.bytes();
        if ofs >= bytes.len() as u64 {
            return Err(anyhow!(
                "offset {} past end of store ({} bytes)",
                ofs,
                bytes.len()
            ));
        }
        Ok(bytes[ofs as usize..].as_ptr())
    }

    /// Срез страницы целиком.
    pub fn page_slice(&self, page: PageNum) -> Result<&[u8]> {
        if page >= self.total_pages() {
            return Err(anyhow!(
                "page {} out of range (total {})",
                page,
                self.total_pages()
            ));
        }
        let ofs = self.blob_ofs(page) as usize;
        let ps = self.page_size() as usize;
        Ok(&self.map.bytes()[ofs..ofs + ps])
    }

    /// Readahead-хинт на точный экстент блоба: payload-размер декодируется
    /// с маскированием флага «свободен».
    pub fn prefetch_blob(&self, page: PageNum) -> Result<()> {
        let word = SizeWord::from_raw(self.blob_word(page, BLOB_OFF_SIZE_WORD)?);
        let ofs = self.blob_ofs(page);
        let len = if word.is_free() {
            (word.free_pages() as u64) << self.page_shift
        } else {
            BLOB_HEADER_SIZE as u64 + word.payload_size() as u64
        };
        let cap = self.map.bytes().len() as u64;
        let len = len.min(cap.saturating_sub(ofs));
        self.map.advise_range(ofs as usize, len as usize)
    }
}
