//! Reconciliation against the relay's authoritative history.
//!
//! The client sends the id manifests of both lists; the relay answers with a
//! per-list diff. Applying the diff is idempotent, so a duplicated or late
//! response is harmless.

use std::collections::HashSet;

use inkboard_core::{apply, cancel, Edit, EditId, History, HistoryList, SceneStore};

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ListDiff, PullData};

/// Id manifests of a client's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequest {
    pub current: Vec<EditId>,
    pub undone: Vec<EditId>,
}

impl PullRequest {
    pub fn from_history(history: &History) -> Self {
        Self {
            current: history.ids(HistoryList::Current),
            undone: history.ids(HistoryList::Undone),
        }
    }

    pub fn into_message(self) -> ClientMessage {
        ClientMessage::Pull {
            current: self.current,
            undone: self.undone,
        }
    }
}

/// What a pull response changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    pub created: usize,
    pub deleted: usize,
    /// Creates already present or deletes already gone.
    pub skipped: usize,
}

impl PullReport {
    pub fn changed(&self) -> bool {
        self.created + self.deleted > 0
    }
}

/// Patch `history` and `scene` with a pull response.
///
/// Deletions run before creations so an edit moving between lists never
/// sits in both. Only the `current` list touches the scene.
pub fn apply_pull<S: SceneStore + ?Sized>(
    history: &mut History,
    scene: &mut S,
    data: &PullData,
) -> Result<PullReport, SessionError> {
    if let Err(e) = history.validate() {
        log::error!("refusing pull response: {e}");
        return Err(e.into());
    }

    let lists = [
        (HistoryList::Current, &data.current),
        (HistoryList::Undone, &data.undone),
    ];
    let mut report = PullReport::default();

    for (which, diff) in lists {
        for id in &diff.to_delete {
            match history.remove_last(which, id) {
                Some(edit) => {
                    if which == HistoryList::Current {
                        cancel(scene, &edit);
                    }
                    report.deleted += 1;
                }
                None => report.skipped += 1,
            }
        }
    }

    for (which, diff) in lists {
        for edit in &diff.to_create {
            if history.append(which, edit.clone()) {
                if which == HistoryList::Current {
                    apply(scene, edit);
                }
                report.created += 1;
            } else {
                report.skipped += 1;
            }
        }
    }

    if let Err(e) = history.validate() {
        log::error!("pull response left history inconsistent: {e}");
        return Err(e.into());
    }
    log::debug!(
        "pull applied: {} created, {} deleted, {} skipped",
        report.created,
        report.deleted,
        report.skipped
    );
    Ok(report)
}

/// Server side: diff the canonical list against a client's manifest.
///
/// `to_create` keeps server order; `to_delete` keeps client order.
pub fn diff_list(server: &[Edit], client_ids: &[EditId]) -> ListDiff {
    let known: HashSet<&EditId> = client_ids.iter().collect();
    let canonical: HashSet<&EditId> = server.iter().map(Edit::id).collect();

    ListDiff {
        to_create: server
            .iter()
            .filter(|e| !known.contains(e.id()))
            .cloned()
            .collect(),
        to_delete: client_ids
            .iter()
            .filter(|id| !canonical.contains(id))
            .cloned()
            .collect(),
    }
}
