//! Общие константы формата стора (header-страница, blob-заголовки, free-таблицы).
//!
//! Формат файла (LE):
//! - Страница 0 — заголовок стора:
//!   [magic u32=0x7ADA0BB1][version u32][created u64]
//!   [total_pages u32][page_shift u8]
//!   [trunk_ranges u32 @52]
//!   [trunk_free_table u32[512] @128]   // смещение кратно 64
//! - Любая другая страница — начало блоба:
//!   [preceding_free_pages u32][size_word u32]
//!   и для свободного блоба дополнительно:
//!   [prev_free u32 @8][next_free u32 @12][leaf_ranges u32 @16]
//!   [leaf_free_table u32[512] @64]     // значимо только на держателе сегмента

/// Номер страницы (страница 0 — заголовок стора).
pub type PageNum = u32;

/// Нулевая ссылка в free-списках. Страница 0 занята заголовком,
/// поэтому 0 никогда не указывает на блоб.
pub const NO_PAGE: PageNum = 0;

// -------- Заголовок стора (страница 0) --------

pub const MAGIC: u32 = 0x7ADA_0BB1;
/// Версия формата: major * 1_000_000 + minor * 1_000 + patch.
pub const VERSION: u32 = 1_000_000;

pub const HDR_OFF_MAGIC: usize = 0;
pub const HDR_OFF_VERSION: usize = 4;
pub const HDR_OFF_CREATED: usize = 8;
pub const HDR_OFF_TOTAL_PAGES: usize = 16;
pub const HDR_OFF_PAGE_SHIFT: usize = 20;
pub const HDR_OFF_TRUNK_RANGES: usize = 52;
/// Смещение trunk free-таблицы (должно быть кратно 64).
pub const TRUNK_TABLE_OFS: usize = 128;

/// Полный размер области заголовка: 128 + 512 * 4 = 2176 байт.
/// Обязан помещаться в минимальную страницу (4 KiB).
pub const HDR_SIZE: usize = TRUNK_TABLE_OFS + FREE_TABLE_LEN * 4;

// -------- Заголовок блоба --------

/// Размер заголовка занятого блоба: preceding + size_word.
pub const BLOB_HEADER_SIZE: u32 = 8;

pub const BLOB_OFF_PRECEDING: usize = 0;
pub const BLOB_OFF_SIZE_WORD: usize = 4;
pub const BLOB_OFF_PREV_FREE: usize = 8;
pub const BLOB_OFF_NEXT_FREE: usize = 12;
pub const BLOB_OFF_LEAF_RANGES: usize = 16;
/// Смещение leaf free-таблицы внутри блоба-держателя (кратно 64).
pub const LEAF_TABLE_OFS: usize = 64;

/// Маска payload-битов size-слова (биты 0..29).
pub const PAYLOAD_SIZE_MASK: u32 = 0x3fff_ffff;
/// Флаг «блоб свободен» (бит 31 size-слова).
pub const FREE_BLOB_FLAG: u32 = 0x8000_0000;

// -------- Free-таблицы --------

/// Число слотов в trunk- и leaf-таблицах.
pub const FREE_TABLE_LEN: usize = 512;
/// Ширина диапазона range-битмапы: один бит на 16 слотов.
pub const FT_SPAN: usize = 16;
/// Число бит в range-битмапе (512 / 16 = 32).
pub const FT_RANGE_BITS: usize = FREE_TABLE_LEN / FT_SPAN;
/// Последний size-класс — переполнение (раны >= 512 страниц).
pub const OVERFLOW_BUCKET: usize = FREE_TABLE_LEN - 1;

// -------- Сегменты и страницы --------

/// Размер сегмента адресного пространства: 2^30 байт.
pub const SEGMENT_SIZE: u64 = 1 << 30;
pub const SEGMENT_SHIFT: u32 = 30;
/// Trunk-таблица адресует не более 512 сегментов (до 512 GiB файла).
pub const MAX_SEGMENTS: u32 = FREE_TABLE_LEN as u32;

/// page_size = 1 << page_shift; допустимо 4 KiB ..= 1 MiB.
pub const MIN_PAGE_SHIFT: u32 = 12;
pub const MAX_PAGE_SHIFT: u32 = 20;
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
