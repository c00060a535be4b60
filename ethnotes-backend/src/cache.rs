//! Local note cache: in-memory mirror of the caller's notes.
//!
//! Two writers: executor reconciliation and the bulk loader. All writes go
//! through this type under one lock. A bulk reload fetches outside the lock, so
//! reconciliations that land while a reload is in flight are journaled and
//! replayed on top of the reload result; otherwise the reload would overwrite
//! them with data fetched before they settled.

use crate::contract::NoteId;
use ethnotes_types::NoteView;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
}

impl Note {
    pub fn view(&self) -> NoteView {
        NoteView {
            id: self.id.to_string(),
            title: self.title.clone(),
            content: self.content.clone(),
        }
    }
}

/// A reconciliation applied after a settled transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePatch {
    Insert(Note),
    SetContent { id: NoteId, content: String },
    SetTitleAndContent { id: NoteId, title: String, content: String },
    Remove(NoteId),
}

impl CachePatch {
    fn apply(&self, notes: &mut BTreeMap<NoteId, Note>) {
        match self {
            CachePatch::Insert(note) => {
                notes.insert(note.id, note.clone());
            }
            CachePatch::SetContent { id, content } => {
                if let Some(note) = notes.get_mut(id) {
                    note.content = content.clone();
                }
            }
            CachePatch::SetTitleAndContent { id, title, content } => {
                if let Some(note) = notes.get_mut(id) {
                    note.title = title.clone();
                    note.content = content.clone();
                }
            }
            CachePatch::Remove(id) => {
                notes.remove(id);
            }
        }
    }
}

/// Handle for a reload in progress. Dropping it without `finish` abandons the
/// reload and stops its journal.
#[must_use]
pub struct ReloadTicket<'a> {
    cache: &'a NoteCache,
    id: u64,
    epoch: u64,
}

impl ReloadTicket<'_> {
    /// Bulk loader write path. Returns false if the cache was cleared meanwhile
    /// and the loaded notes were discarded.
    pub fn finish(self, loaded: Vec<Note>) -> bool {
        self.cache.finish_reload(self.id, self.epoch, loaded)
    }
}

impl Drop for ReloadTicket<'_> {
    fn drop(&mut self) {
        self.cache.forget_reload(self.id);
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    notes: BTreeMap<NoteId, Note>,
    /// Bumped on clear(); reloads started in an older epoch are discarded
    epoch: u64,
    next_reload: u64,
    /// Reloads in flight, with the patches applied since each began
    reloads: Vec<(u64, Vec<CachePatch>)>,
}

#[derive(Debug, Default)]
pub struct NoteCache {
    inner: Mutex<CacheInner>,
}

impl NoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, id: NoteId) -> Option<Note> {
        self.inner.lock().notes.get(&id).cloned()
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.inner.lock().notes.contains_key(&id)
    }

    /// Notes ordered by id
    pub fn list(&self) -> Vec<Note> {
        self.inner.lock().notes.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().notes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executor write path.
    pub fn apply(&self, patch: CachePatch) {
        let mut inner = self.inner.lock();
        patch.apply(&mut inner.notes);
        for (_, journal) in inner.reloads.iter_mut() {
            journal.push(patch.clone());
        }
        log::debug!("[CACHE] Applied {:?}", patch);
    }

    pub fn begin_reload(&self) -> ReloadTicket<'_> {
        let mut inner = self.inner.lock();
        inner.next_reload += 1;
        let id = inner.next_reload;
        inner.reloads.push((id, Vec::new()));
        ReloadTicket {
            cache: self,
            id,
            epoch: inner.epoch,
        }
    }

    fn finish_reload(&self, reload: u64, epoch: u64, loaded: Vec<Note>) -> bool {
        let mut inner = self.inner.lock();
        let journal = match inner.reloads.iter().position(|(id, _)| *id == reload) {
            Some(idx) => inner.reloads.remove(idx).1,
            None => Vec::new(),
        };

        if epoch != inner.epoch {
            log::debug!("[CACHE] Discarding reload {} from a previous session", reload);
            return false;
        }

        let mut notes: BTreeMap<NoteId, Note> =
            loaded.into_iter().map(|n| (n.id, n)).collect();
        for patch in &journal {
            patch.apply(&mut notes);
        }
        inner.notes = notes;
        true
    }

    fn forget_reload(&self, reload: u64) {
        self.inner.lock().reloads.retain(|(id, _)| *id != reload);
    }

    #[cfg(test)]
    fn open_reloads(&self) -> usize {
        self.inner.lock().reloads.len()
    }

    /// Drop everything, e.g. when the session ends.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.notes.clear();
        inner.epoch += 1;
    }
}
