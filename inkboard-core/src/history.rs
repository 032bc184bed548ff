//! Per-session edit history with id-addressed undo/redo.
//!
//! Undo and redo are not stack pops: a remote peer may undo an edit that is
//! not our latest, so both operations take an optional edit id and search
//! from the most recent occurrence backward.

use serde::{Deserialize, Serialize};

use crate::apply::{apply, cancel};
use crate::edit::{Edit, EditId};
use crate::error::CoreError;
use crate::scene::SceneStore;

/// Which of the two history lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryList {
    Current,
    Undone,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    current: Vec<Edit>,
    undone: Vec<Edit>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &[Edit] {
        &self.current
    }

    pub fn undone(&self) -> &[Edit] {
        &self.undone
    }

    pub fn list(&self, which: HistoryList) -> &[Edit] {
        match which {
            HistoryList::Current => &self.current,
            HistoryList::Undone => &self.undone,
        }
    }

    fn list_mut(&mut self, which: HistoryList) -> &mut Vec<Edit> {
        match which {
            HistoryList::Current => &mut self.current,
            HistoryList::Undone => &mut self.undone,
        }
    }

    /// Edit ids of one list, in order.
    pub fn ids(&self, which: HistoryList) -> Vec<EditId> {
        self.list(which).iter().map(|e| e.id().clone()).collect()
    }

    pub fn contains(&self, which: HistoryList, id: &EditId) -> bool {
        self.list(which).iter().any(|e| e.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.undone.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.current.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    /// Record a committed edit. Returns `false` if its id is already in
    /// `current`.
    pub fn push(&mut self, edit: Edit) -> bool {
        self.append(HistoryList::Current, edit)
    }

    /// Append to either list, ignoring ids already present there.
    pub fn append(&mut self, which: HistoryList, edit: Edit) -> bool {
        if self.contains(which, edit.id()) {
            log::debug!("{which:?} already holds edit {}, skipping", edit.id());
            return false;
        }
        self.list_mut(which).push(edit);
        true
    }

    /// Remove the last occurrence of `id` from a list.
    pub fn remove_last(&mut self, which: HistoryList, id: &EditId) -> Option<Edit> {
        let list = self.list_mut(which);
        let pos = list.iter().rposition(|e| e.id() == id)?;
        Some(list.remove(pos))
    }

    /// Undo `id` (or the latest edit), cancelling it on the scene.
    ///
    /// An unknown id is a stale reference: it is logged and nothing changes.
    pub fn undo<S: SceneStore + ?Sized>(&mut self, scene: &mut S, id: Option<&EditId>) -> Option<Edit> {
        let edit = self.take(HistoryList::Current, id)?;
        cancel(scene, &edit);
        self.append(HistoryList::Undone, edit.clone());
        Some(edit)
    }

    /// Redo `id` (or the latest undone edit), re-applying it on the scene.
    pub fn redo<S: SceneStore + ?Sized>(&mut self, scene: &mut S, id: Option<&EditId>) -> Option<Edit> {
        let edit = self.take(HistoryList::Undone, id)?;
        apply(scene, &edit);
        self.append(HistoryList::Current, edit.clone());
        Some(edit)
    }

    fn take(&mut self, which: HistoryList, id: Option<&EditId>) -> Option<Edit> {
        let taken = match id {
            Some(id) => self.remove_last(which, id),
            None => self.list_mut(which).pop(),
        };
        if taken.is_none() {
            match id {
                Some(id) => log::warn!("{}", CoreError::StaleReference(id.clone())),
                None => log::warn!("nothing to take from {which:?}"),
            }
        }
        taken
    }

    /// Drop the redo branch. Called when a fresh edit is committed after
    /// some undos.
    pub fn rebase(&mut self) {
        self.undone.clear();
    }

    /// Empty one list without touching the scene.
    pub fn clear(&mut self, which: HistoryList) {
        self.list_mut(which).clear();
    }

    /// Empty both lists ("new file" or full resync).
    pub fn reset(&mut self) {
        self.current.clear();
        self.undone.clear();
    }

    /// Check that no edit id appears in both lists.
    pub fn validate(&self) -> Result<(), CoreError> {
        for edit in &self.current {
            if self.contains(HistoryList::Undone, edit.id()) {
                return Err(CoreError::DuplicateAcrossLists(edit.id().clone()));
            }
        }
        Ok(())
    }
}
