//! Кодек заголовка блоба.
//!
//! Первые два слова любого блоба (LE):
//! - word0: preceding_free_pages — длина (в страницах) свободного рана
//!   непосредственно слева; 0, если сосед занят или блоб стоит на первой
//!   странице сегмента.
//! - word1: size-слово — биты 0..29 payload, бит 30 не используется,
//!   бит 31 — флаг «свободен».
//!
//! Для занятого блоба payload-биты — размер полезной нагрузки в байтах.
//! Для свободного — длина рана в СТРАНИЦАХ: байтовая длина полного
//! сегментного рана (2^30) не помещается в 30 бит.

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{BLOB_OFF_PRECEDING, BLOB_OFF_SIZE_WORD, FREE_BLOB_FLAG, PAYLOAD_SIZE_MASK};
use crate::errors::StoreError;

/// Упакованное size-слово блоба. Явный кодек вместо ручного маскирования:
/// конструктор занятого блоба не даёт payload перелиться во флаговые биты.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeWord(u32);

impl SizeWord {
    /// Слово занятого блоба. payload — размер полезной нагрузки в байтах.
    pub fn used(payload_size: u32) -> Result<Self> {
        if payload_size == 0 || payload_size > PAYLOAD_SIZE_MASK {
            return Err(StoreError::InvalidSize(payload_size as u64).into());
        }
        Ok(Self(payload_size))
    }

    /// Слово свободного блоба. pages — длина рана в страницах.
    pub fn free(pages: u32) -> Self {
        debug_assert!(pages >= 1 && pages <= PAYLOAD_SIZE_MASK);
        Self(FREE_BLOB_FLAG | (pages & PAYLOAD_SIZE_MASK))
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self.0 & FREE_BLOB_FLAG != 0
    }

    /// Payload-биты без флагов (для занятого блоба — байты).
    #[inline]
    pub fn payload_size(self) -> u32 {
        self.0 & PAYLOAD_SIZE_MASK
    }

    /// Длина свободного рана в страницах. Значимо только при is_free().
    #[inline]
    pub fn free_pages(self) -> u32 {
        self.0 & PAYLOAD_SIZE_MASK
    }
}

/// Заголовок блоба (первые два слова).
#[derive(Debug, Clone, Copy)]
pub struct BlobHeader {
    pub preceding_free_pages: u32,
    pub word: SizeWord,
}

/// Прочитать заголовок блоба из префикса страницы.
pub fn read_header(buf: &[u8]) -> BlobHeader {
    BlobHeader {
        preceding_free_pages: LittleEndian::read_u32(
            &buf[BLOB_OFF_PRECEDING..BLOB_OFF_PRECEDING + 4],
        ),
        word: SizeWord::from_raw(LittleEndian::read_u32(
            &buf[BLOB_OFF_SIZE_WORD..BLOB_OFF_SIZE_WORD + 4],
        )),
    }
}
