//! store — жизненный цикл BlobStore поверх отображённого в память файла.
//!
//! Раскладка: core (структура, create/open/verify, сегментная математика,
//! аксессоры заголовка и free-таблиц) и io (mmap, рост/усечение, указатели,
//! prefetch, flush).

pub mod core;
pub mod io;

pub use self::core::BlobStore;
