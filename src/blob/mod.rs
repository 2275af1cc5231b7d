//! blob — бинарная раскладка блоба (ран смежных страниц) и кодек заголовка.

pub mod header;

pub use header::{read_header, BlobHeader, SizeWord};
