// ===============================
// src/registry.rs
// ===============================
//
// State bersama antara poller dan command scheduler:
// - daftar identifier yang dipantau (urutan insert dipertahankan)
// - cache nickname
//
// Urutan mutasi: copy -> modifikasi -> persist -> commit ke memori.
// Kalau persist gagal, memori tidak berubah.
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::TRACKED_IDENTIFIERS;
use crate::store::{IdentifierStore, StoreError};

/// Panjang minimum encryptedUid Binance.
pub const MIN_IDENTIFIER_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid identifier `{0}`")]
    Invalid(String),
    #[error("identifier `{0}` is already tracked")]
    Duplicate(String),
    #[error("index {index} out of range (tracked: {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("failed to persist identifiers: {0}")]
    Persist(#[from] StoreError),
}

pub fn is_valid_identifier(id: &str) -> bool {
    id.len() >= MIN_IDENTIFIER_LEN && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Generasi naik di setiap add, jadi identifier yang dihapus lalu ditambah
/// lagi dikenali sebagai entri baru oleh poller.
#[derive(Debug, Clone)]
struct Entry {
    id: String,
    generation: u64,
}

pub struct Registry {
    ids: RwLock<Vec<Entry>>,
    next_generation: AtomicU64,
    nicknames: RwLock<HashMap<String, String>>,
    // serialisasi writer selama persist + commit; reader tidak ikut menunggu I/O disk
    write_guard: Mutex<()>,
    store: Arc<dyn IdentifierStore>,
}

impl Registry {
    /// Bangun registry dari isi store saat startup.
    pub fn load(store: Arc<dyn IdentifierStore>) -> Self {
        let mut ids: Vec<String> = Vec::new();
        for id in store.load() {
            if ids.contains(&id) {
                warn!(%id, "duplicate identifier in store, skipped");
                continue;
            }
            ids.push(id);
        }
        TRACKED_IDENTIFIERS.set(ids.len() as i64);
        let ids: Vec<Entry> = ids
            .into_iter()
            .zip(0u64..)
            .map(|(id, generation)| Entry { id, generation })
            .collect();
        Self {
            next_generation: AtomicU64::new(ids.len() as u64),
            ids: RwLock::new(ids),
            nicknames: RwLock::new(HashMap::new()),
            write_guard: Mutex::new(()),
            store,
        }
    }

    pub fn list(&self) -> Vec<String> { self.ids.read().iter().map(|e| e.id.clone()).collect() }

    /// (identifier, generation) sesuai urutan registry.
    pub fn tracked(&self) -> Vec<(String, u64)> {
        self.ids.read().iter().map(|e| (e.id.clone(), e.generation)).collect()
    }

    pub fn len(&self) -> usize { self.ids.read().len() }

    #[cfg(test)]
    pub fn add(&self, id: &str) -> bool { self.try_add(id).is_ok() }

    pub fn try_add(&self, id: &str) -> Result<(), RegistryError> {
        let _w = self.write_guard.lock();
        let mut next = self.ids.read().clone();

        if next.iter().any(|e| e.id == id) {
            warn!(%id, "identifier already tracked");
            return Err(RegistryError::Duplicate(id.to_string()));
        }
        if !is_valid_identifier(id) {
            warn!(%id, "identifier rejected by validation");
            return Err(RegistryError::Invalid(id.to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        next.push(Entry { id: id.to_string(), generation });
        self.commit(next)?;
        info!(%id, "identifier added");
        Ok(())
    }

    #[cfg(test)]
    pub fn remove_by_index(&self, index: usize) -> bool { self.try_remove_by_index(index).is_ok() }

    /// Hapus berdasarkan posisi saat ini; mengembalikan identifier yang dihapus.
    pub fn try_remove_by_index(&self, index: usize) -> Result<String, RegistryError> {
        let _w = self.write_guard.lock();
        let mut next = self.ids.read().clone();

        if index >= next.len() {
            warn!(index, len = next.len(), "remove index out of range");
            return Err(RegistryError::OutOfRange { index, len: next.len() });
        }

        let removed = next.remove(index).id;
        self.commit(next)?;
        info!(id = %removed, index, "identifier removed");
        Ok(removed)
    }

    // Dipanggil dengan write_guard terpegang.
    fn commit(&self, next: Vec<Entry>) -> Result<(), RegistryError> {
        let ids: Vec<String> = next.iter().map(|e| e.id.clone()).collect();
        if let Err(e) = self.store.save(&ids) {
            tracing::error!(error = %e, "persist identifiers failed, in-memory list unchanged");
            return Err(RegistryError::Persist(e));
        }
        TRACKED_IDENTIFIERS.set(next.len() as i64);
        *self.ids.write() = next;
        Ok(())
    }

    /// Nickname dari cache, fallback ke identifier mentah.
    pub fn nickname(&self, id: &str) -> String {
        self.nicknames.read().get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn has_nickname(&self, id: &str) -> bool { self.nicknames.read().contains_key(id) }

    pub fn set_nickname(&self, id: &str, name: String) {
        self.nicknames.write().insert(id.to_string(), name);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;

    pub(crate) fn uid(c: char) -> String { std::iter::repeat(c).take(32).collect() }

    fn registry_with(ids: Vec<String>) -> (Registry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_ids(ids));
        (Registry::load(store.clone()), store)
    }

    #[test]
    fn add_twice_fails_second_time() {
        let (reg, store) = registry_with(vec![]);
        assert!(reg.add(&uid('A')));
        assert!(!reg.add(&uid('A')));
        assert!(matches!(reg.try_add(&uid('A')), Err(RegistryError::Duplicate(_))));
        assert_eq!(reg.list(), vec![uid('A')]);
        assert_eq!(store.snapshot(), vec![uid('A')]);
    }

    #[test]
    fn successful_add_grows_list_by_one_and_keeps_order() {
        let (reg, _) = registry_with(vec![uid('B')]);
        let before = reg.len();
        assert!(reg.add(&uid('A')));
        assert_eq!(reg.len(), before + 1);
        assert_eq!(reg.list(), vec![uid('B'), uid('A')]);
    }

    #[test]
    fn validation_rejects_short_empty_and_non_alnum() {
        let (reg, _) = registry_with(vec![]);
        assert!(!reg.add(""));
        assert!(!reg.add("ABC123"));
        let mut with_dash = uid('C');
        with_dash.push('-');
        assert!(!reg.add(&with_dash));
        assert!(matches!(reg.try_add("short"), Err(RegistryError::Invalid(_))));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn remove_out_of_range_leaves_list_unchanged() {
        let (reg, _) = registry_with(vec![uid('A'), uid('B')]);
        assert!(!reg.remove_by_index(2));
        assert!(!reg.remove_by_index(usize::MAX));
        assert_eq!(reg.list(), vec![uid('A'), uid('B')]);
    }

    #[test]
    fn remove_returns_removed_identifier() {
        let (reg, store) = registry_with(vec![uid('A'), uid('B'), uid('C')]);
        assert_eq!(reg.try_remove_by_index(1).unwrap(), uid('B'));
        assert_eq!(reg.list(), vec![uid('A'), uid('C')]);
        assert_eq!(store.snapshot(), vec![uid('A'), uid('C')]);
    }

    #[test]
    fn persist_failure_does_not_advance_memory() {
        let (reg, store) = registry_with(vec![uid('A')]);
        store.set_fail_writes(true);
        assert!(!reg.add(&uid('B')));
        assert!(!reg.remove_by_index(0));
        assert_eq!(reg.list(), vec![uid('A')]);

        store.set_fail_writes(false);
        assert!(reg.add(&uid('B')));
        assert_eq!(reg.list(), vec![uid('A'), uid('B')]);
    }

    #[test]
    fn load_skips_duplicates_from_store() {
        let (reg, _) = registry_with(vec![uid('A'), uid('A'), uid('B')]);
        assert_eq!(reg.list(), vec![uid('A'), uid('B')]);
    }

    #[test]
    fn readd_gets_a_fresh_generation() {
        let (reg, _) = registry_with(vec![uid('A')]);
        let (_, first) = reg.tracked()[0].clone();
        assert_eq!(reg.try_remove_by_index(0).unwrap(), uid('A'));
        assert!(reg.add(&uid('A')));
        let (id, second) = reg.tracked()[0].clone();
        assert_eq!(id, uid('A'));
        assert_ne!(first, second);
    }

    #[test]
    fn nickname_falls_back_to_identifier() {
        let (reg, _) = registry_with(vec![uid('A')]);
        assert_eq!(reg.nickname(&uid('A')), uid('A'));
        assert!(!reg.has_nickname(&uid('A')));
        reg.set_nickname(&uid('A'), "whale".into());
        assert_eq!(reg.nickname(&uid('A')), "whale");
    }

    #[test]
    fn concurrent_adds_are_serialized() {
        let (reg, store) = registry_with(vec![]);
        let reg = Arc::new(reg);
        let handles: Vec<_> = ['A', 'B', 'C', 'D', 'E', 'F']
            .into_iter()
            .map(|c| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.add(&uid(c)))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(reg.len(), 6);
        assert_eq!(store.snapshot().len(), 6);
    }
}
