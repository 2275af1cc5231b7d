//! Типизированная таксономия ошибок стора.
//!
//! Ошибки переносятся внутри anyhow::Error (downcast доступен вызывающему);
//! сбои ввода-вывода остаются std::io::Error с контекстом anyhow.

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// Заголовок стора не прошёл проверку (magic, геометрия, длина файла).
    CorruptStore(String),
    /// Несовместимая мажорная версия формата.
    UnsupportedVersion(u32),
    /// Нулевой или превышающий максимум размер payload.
    InvalidSize(u64),
    /// Рост стора вышел за пределы адресного пространства.
    OutOfSpace(String),
    /// Free-таблица ссылается на занятый блоб или наоборот.
    InconsistentFreeList(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::CorruptStore(msg) => write!(f, "corrupt store: {}", msg),
            StoreError::UnsupportedVersion(v) => {
                write!(f, "unsupported store version {}", v)
            }
            StoreError::InvalidSize(n) => write!(f, "invalid payload size {}", n),
            StoreError::OutOfSpace(msg) => write!(f, "out of space: {}", msg),
            StoreError::InconsistentFreeList(msg) => {
                write!(f, "inconsistent free list: {}", msg)
            }
        }
    }
}

impl std::error::Error for StoreError {}
