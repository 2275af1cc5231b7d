//! Файловая блокировка single-writer модели.
//!
//! Advisory-локи (fs2), кросс-платформенно:
//! - Exclusive: единственный писатель (открытие стора на запись).
//! - Shared: read-only открытия (инспекция, status/check).
//!
//! Lock-файл: "<store>.lock" рядом с файлом стора.
//! Лок снимается в Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Ошибки unlock при Drop игнорируются сознательно.
        let _ = self.file.unlock();
    }
}

fn lock_file_path(store_path: &Path) -> PathBuf {
    let mut os = store_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn open_lock_file(store_path: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = lock_file_path(store_path);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok((f, path))
}

/// Взять лок без ожидания. Ошибка, если уже занят несовместимым режимом.
pub fn try_acquire_lock(store_path: &Path, mode: LockMode) -> Result<LockGuard> {
    let (file, path) = open_lock_file(store_path)?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard { file, path, mode })
}

pub fn try_acquire_exclusive_lock(store_path: &Path) -> Result<LockGuard> {
    try_acquire_lock(store_path, LockMode::Exclusive)
}

pub fn try_acquire_shared_lock(store_path: &Path) -> Result<LockGuard> {
    try_acquire_lock(store_path, LockMode::Shared)
}
