//! Централизованная конфигурация стора.
//!
//! Цели:
//! - Одно место для тюнингов вместо разбросанных env-чтений.
//! - StoreConfig::from_env() читает те же переменные, что и CLI.
//!
//! Переменные окружения:
//! - GEODE_PAGE_SIZE      (байты, степень двойки 4096..=1048576; default 4096)
//! - GEODE_COMMIT_SYNC    ("1|true|on|yes" => true; default true)

use anyhow::{anyhow, Result};

use crate::consts::{DEFAULT_PAGE_SIZE, MAX_PAGE_SHIFT, MIN_PAGE_SHIFT};

/// Конфигурация открытия/создания стора.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Размер страницы в байтах (используется только при create).
    /// Env: GEODE_PAGE_SIZE (default 4096)
    pub page_size: u32,

    /// fsync файла стора при commit() (msync выполняется всегда).
    /// Env: GEODE_COMMIT_SYNC (default true)
    pub commit_sync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            commit_sync: true,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(s) = std::env::var("GEODE_PAGE_SIZE") {
            if let Ok(v) = s.trim().parse::<u32>() {
                cfg.page_size = v;
            }
        }
        if let Ok(s) = std::env::var("GEODE_COMMIT_SYNC") {
            cfg.commit_sync = parse_bool(&s, cfg.commit_sync);
        }
        cfg
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_commit_sync(mut self, on: bool) -> Self {
        self.commit_sync = on;
        self
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => default,
    }
}

/// Проверка размера страницы (степень двойки, 4 KiB ..= 1 MiB).
/// Возвращает page_shift.
pub fn validate_page_size(page_size: u32) -> Result<u32> {
    if page_size == 0 || (page_size & (page_size - 1)) != 0 {
        return Err(anyhow!(
            "page_size must be a power of two, got {}",
            page_size
        ));
    }
    let shift = page_size.trailing_zeros();
    if !(MIN_PAGE_SHIFT..=MAX_PAGE_SHIFT).contains(&shift) {
        return Err(anyhow!(
            "page_size must be in [{} .. {}], got {}",
            1u32 << MIN_PAGE_SHIFT,
            1u32 << MAX_PAGE_SHIFT,
            page_size
        ));
    }
    Ok(shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_validation() {
        assert_eq!(validate_page_size(4096).unwrap(), 12);
        assert_eq!(validate_page_size(1 << 20).unwrap(), 20);
        assert!(validate_page_size(0).is_err());
        assert!(validate_page_size(1000).is_err());
        assert!(validate_page_size(2048).is_err());
        assert!(validate_page_size(1 << 21).is_err());
    }

    #[test]
    fn bool_parse() {
        assert!(parse_bool("on", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("weird", true));
    }
}
