//! # Undo history
//!
//! A bounded pair of undo/redo lists of [`UndoEntry`]s, each holding one or more [`Transaction`]s.
//!
//! Access is guarded by a non-reentrant lock that is only ever *tried*: a commit attempted while another
//! commit is running (from a transaction's own redo, or from another thread) fails with
//! [`UndoError::ConcurrentChange`] instead of deadlocking or interleaving.
//!
//! Rapid-fire commits are folded together according to [`UndoSettings`], and
//! [`UndoStack::combining_actions`] explicitly groups every commit made during a closure.

mod entry;

pub use entry::UndoEntry;

use crate::commands::{CommandConsumer, CommandError, DoUndo};
use crate::notify::{ChangeBus, Coalesce, Subscription};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_HISTORY: usize = 50;
/// Commits closer together than this undo as one by default.
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_millis(50);

/// One reversible change to a `T`.
pub trait Transaction<T>: Send {
    fn redo(&mut self, target: &mut T) -> Result<(), CommandError>;
    fn undo(&mut self, target: &mut T) -> Result<(), CommandError>;
}

/// A transaction built from a pair of closures.
/// `undo` must exactly reverse `redo`, for any number of alternating calls.
pub struct FnTransaction<T> {
    redo: Box<dyn FnMut(&mut T) + Send>,
    undo: Box<dyn FnMut(&mut T) + Send>,
}
impl<T> FnTransaction<T> {
    pub fn new(
        redo: impl FnMut(&mut T) + Send + 'static,
        undo: impl FnMut(&mut T) + Send + 'static,
    ) -> Self {
        Self {
            redo: Box::new(redo),
            undo: Box::new(undo),
        }
    }
}
impl<T> Transaction<T> for FnTransaction<T> {
    fn redo(&mut self, target: &mut T) -> Result<(), CommandError> {
        (self.redo)(target);
        Ok(())
    }
    fn undo(&mut self, target: &mut T) -> Result<(), CommandError> {
        (self.undo)(target);
        Ok(())
    }
}

/// A command, replayed through the target's [`CommandConsumer`] impl.
pub struct Recorded<C>(pub C);
impl<T, C> Transaction<T> for Recorded<C>
where
    T: CommandConsumer<C>,
    C: Send,
{
    fn redo(&mut self, target: &mut T) -> Result<(), CommandError> {
        target.apply(DoUndo::Do(&self.0))
    }
    fn undo(&mut self, target: &mut T) -> Result<(), CommandError> {
        target.apply(DoUndo::Undo(&self.0))
    }
}

/// Which neighbouring entries a commit may fold into.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::AsRefStr,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Only fold into an entry that already contains this type of action.
    SameType,
    /// Fold any commit that lands within the interval, regardless of type.
    #[default]
    AnyType,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UndoSettings {
    /// Entries kept in each list, older ones are silently dropped.
    pub max_history: usize,
    /// Commits closer together than this are folded into one entry. Zero disables folding.
    pub merge_interval: Duration,
    pub merge_policy: MergePolicy,
}
impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            merge_interval: DEFAULT_MERGE_INTERVAL,
            merge_policy: MergePolicy::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UndoError {
    #[error("concurrent undo history change: attempted {attempted:?} while {in_progress:?} is in progress")]
    ConcurrentChange {
        attempted: String,
        in_progress: String,
    },
    #[error("can't open {attempted:?} group while {open:?} group is still open")]
    GroupAlreadyOpen { attempted: String, open: String },
    #[error("transaction {tag:?} failed: {source}")]
    Transaction {
        tag: String,
        #[source]
        source: CommandError,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HistoryEvent {
    UndoCount(usize),
    RedoCount(usize),
}
impl Coalesce for HistoryEvent {
    fn supersedes(&self, earlier: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(earlier)
    }
}

/// Everything needed to record one action.
pub struct Commit<T> {
    transaction: Box<dyn Transaction<T>>,
    type_tag: String,
    merge_data: Option<Box<dyn std::any::Any + Send>>,
    skip_initial_call: bool,
}
impl<T: 'static> Commit<T> {
    pub fn new(type_tag: impl Into<String>, transaction: impl Transaction<T> + 'static) -> Self {
        Self {
            transaction: Box::new(transaction),
            type_tag: type_tag.into(),
            merge_data: None,
            skip_initial_call: false,
        }
    }
    /// Build from a `redo`/`undo` closure pair.
    pub fn from_fns(
        type_tag: impl Into<String>,
        redo: impl FnMut(&mut T) + Send + 'static,
        undo: impl FnMut(&mut T) + Send + 'static,
    ) -> Self {
        Self::new(type_tag, FnTransaction::new(redo, undo))
    }
    /// Attach arbitrary data, readable later through [`UndoStack::last_action`].
    #[must_use]
    pub fn with_merge_data(mut self, data: impl std::any::Any + Send) -> Self {
        self.merge_data = Some(Box::new(data));
        self
    }
    /// The change was already made by the caller, only record it.
    #[must_use]
    pub fn skip_initial_call(mut self) -> Self {
        self.skip_initial_call = true;
        self
    }
}

struct Inner<T> {
    undo: VecDeque<UndoEntry<T>>,
    redo: VecDeque<UndoEntry<T>>,
    /// Group opened by `combining_actions`, new commits land here instead of the list.
    open_group: Option<UndoEntry<T>>,
    settings: UndoSettings,
}

pub struct UndoStack<T> {
    inner: parking_lot::Mutex<Inner<T>>,
    /// Tag of the change currently holding `inner`, for diagnostics.
    in_progress: parking_lot::Mutex<String>,
    events: ChangeBus<HistoryEvent>,
}
impl<T: 'static> Default for UndoStack<T> {
    fn default() -> Self {
        Self::new(UndoSettings::default())
    }
}
impl<T> std::fmt::Debug for UndoStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (undo, redo) = self
            .inner
            .try_lock()
            .map_or((None, None), |inner| (Some(inner.undo.len()), Some(inner.redo.len())));
        f.debug_struct("UndoStack")
            .field("undo", &undo)
            .field("redo", &redo)
            .finish_non_exhaustive()
    }
}

/// Lock held for one change. Clears the in-progress marker on drop.
struct Held<'a, T> {
    inner: parking_lot::MutexGuard<'a, Inner<T>>,
    in_progress: &'a parking_lot::Mutex<String>,
}
impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        self.in_progress.lock().clear();
    }
}

impl<T: 'static> UndoStack<T> {
    #[must_use]
    pub fn new(settings: UndoSettings) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner {
                undo: VecDeque::new(),
                redo: VecDeque::new(),
                open_group: None,
                settings,
            }),
            in_progress: parking_lot::Mutex::default(),
            events: ChangeBus::new(),
        }
    }
    fn try_hold(&self, attempted: &str) -> Result<Held<'_, T>, UndoError> {
        let Some(inner) = self.inner.try_lock() else {
            let in_progress = self.in_progress.lock().clone();
            log::error!("Concurrent undo history change: {attempted} during {in_progress}");
            return Err(UndoError::ConcurrentChange {
                attempted: attempted.to_owned(),
                in_progress,
            });
        };
        *self.in_progress.lock() = attempted.to_owned();
        Ok(Held {
            inner,
            in_progress: &self.in_progress,
        })
    }
    /// Subscribe to undo/redo count changes.
    pub fn subscribe(&self) -> Subscription<HistoryEvent> {
        self.events.subscribe()
    }
    #[must_use]
    pub fn settings(&self) -> UndoSettings {
        self.inner.lock().settings
    }
    /// Replace the settings. Shrinking `max_history` drops the oldest entries right away.
    pub fn set_settings(&self, settings: UndoSettings) {
        let mut inner = self.inner.lock();
        inner.settings = settings;
        let max = settings.max_history;
        if inner.undo.len() > max {
            let excess = inner.undo.len() - max;
            inner.undo.drain(..excess);
            self.events.emit(HistoryEvent::UndoCount(inner.undo.len()));
        }
        if inner.redo.len() > max {
            let excess = inner.redo.len() - max;
            inner.redo.drain(..excess);
            self.events.emit(HistoryEvent::RedoCount(inner.redo.len()));
        }
    }
    #[must_use]
    pub fn undo_count(&self) -> usize {
        self.inner.lock().undo.len()
    }
    #[must_use]
    pub fn redo_count(&self) -> usize {
        self.inner.lock().redo.len()
    }

    /// Perform (unless skipped) and record an action.
    ///
    /// If the action itself fails, nothing is recorded and the error is returned. Otherwise the entry is
    /// added to the open group, folded into the previous entry per the merge policy, or pushed on its own,
    /// and the redo list is cleared.
    pub fn commit_action(&self, target: &mut T, commit: Commit<T>) -> Result<(), UndoError> {
        let Commit {
            mut transaction,
            type_tag,
            merge_data,
            skip_initial_call,
        } = commit;
        let mut held = self.try_hold(&type_tag)?;
        let inner = &mut *held.inner;
        log::trace!(
            "ADD ACTION: {type_tag}, UNDO_COUNT={}, REDO_COUNT={}",
            inner.undo.len(),
            inner.redo.len()
        );
        if !skip_initial_call {
            transaction
                .redo(target)
                .map_err(|source| UndoError::Transaction {
                    tag: type_tag.clone(),
                    source,
                })?;
        }
        let now = Instant::now();
        if let Some(group) = inner.open_group.as_mut() {
            group.push(transaction, &type_tag, now);
        } else {
            let settings = inner.settings;
            let fold_into_top = inner.undo.back().is_some_and(|top| {
                now.saturating_duration_since(top.timestamp()) < settings.merge_interval
                    && match settings.merge_policy {
                        MergePolicy::AnyType => true,
                        MergePolicy::SameType => top.has_type(&type_tag),
                    }
            });
            if fold_into_top {
                // Unwrap ok - checked by `fold_into_top`.
                let top = inner.undo.back_mut().unwrap();
                top.push(transaction, &type_tag, now);
            } else {
                let entry = UndoEntry::single(transaction, type_tag, merge_data, now);
                Self::push_bounded(&self.events, &mut inner.undo, entry, settings.max_history, true);
            }
        }
        if !inner.redo.is_empty() {
            inner.redo.clear();
            self.events.emit(HistoryEvent::RedoCount(0));
        }
        Ok(())
    }

    fn push_bounded(
        events: &ChangeBus<HistoryEvent>,
        list: &mut VecDeque<UndoEntry<T>>,
        entry: UndoEntry<T>,
        max: usize,
        is_undo: bool,
    ) {
        list.push_back(entry);
        while list.len() > max {
            let dropped = list.pop_front();
            if let Some(dropped) = dropped {
                log::trace!("History full, dropping {}", dropped.type_tag());
            }
        }
        events.emit(if is_undo {
            HistoryEvent::UndoCount(list.len())
        } else {
            HistoryEvent::RedoCount(list.len())
        });
    }

    /// Revert the most recent entry. Returns `Ok(false)` if there was nothing to undo.
    ///
    /// If reverting fails the entry is dropped from history, as it no longer describes the state.
    pub fn undo(&self, target: &mut T) -> Result<bool, UndoError> {
        self.step(target, true)
    }
    /// Re-apply the most recently undone entry. Returns `Ok(false)` if there was nothing to redo.
    pub fn redo(&self, target: &mut T) -> Result<bool, UndoError> {
        self.step(target, false)
    }
    fn step(&self, target: &mut T, undo: bool) -> Result<bool, UndoError> {
        let verb = if undo { "undo" } else { "redo" };
        let mut held = self.try_hold(verb)?;
        let inner = &mut *held.inner;
        if let Some(open) = inner.open_group.as_ref() {
            return Err(UndoError::GroupAlreadyOpen {
                attempted: verb.to_owned(),
                open: open.type_tag().to_owned(),
            });
        }
        let max = inner.settings.max_history;
        let (from, to) = if undo {
            (&mut inner.undo, &mut inner.redo)
        } else {
            (&mut inner.redo, &mut inner.undo)
        };
        let Some(mut entry) = from.pop_back() else {
            return Ok(false);
        };
        log::info!(
            "{} ACTION: {}, REMAINING={}",
            verb.to_uppercase(),
            entry.type_tag(),
            from.len()
        );
        self.events.emit(if undo {
            HistoryEvent::UndoCount(from.len())
        } else {
            HistoryEvent::RedoCount(from.len())
        });
        let result = if undo {
            entry.undo(target)
        } else {
            entry.redo(target)
        };
        match result {
            Ok(()) => {
                Self::push_bounded(&self.events, to, entry, max, !undo);
                Ok(true)
            }
            Err(source) => {
                log::error!("Failed to {verb} {}, dropping it: {source}", entry.type_tag());
                Err(UndoError::Transaction {
                    tag: entry.type_tag().to_owned(),
                    source,
                })
            }
        }
    }

    /// Drop all history. Fails if a group is open.
    pub fn clear(&self) -> Result<(), UndoError> {
        let mut held = self.try_hold("clear")?;
        let inner = &mut *held.inner;
        if let Some(open) = inner.open_group.as_ref() {
            return Err(UndoError::GroupAlreadyOpen {
                attempted: "clear".to_owned(),
                open: open.type_tag().to_owned(),
            });
        }
        if !inner.undo.is_empty() {
            inner.undo.clear();
            self.events.emit(HistoryEvent::UndoCount(0));
        }
        if !inner.redo.is_empty() {
            inner.redo.clear();
            self.events.emit(HistoryEvent::RedoCount(0));
        }
        Ok(())
    }

    /// Scoped access to the most recent entry, to amend it instead of committing a new one.
    ///
    /// `f` receives the target and the top entry, if any. Extending the entry (see [`UndoEntry::extend`])
    /// counts as a new change and clears the redo list.
    pub fn last_action<R>(
        &self,
        target: &mut T,
        type_tag: &str,
        f: impl FnOnce(&mut T, Option<&mut UndoEntry<T>>) -> R,
    ) -> Result<R, UndoError> {
        let mut held = self.try_hold(type_tag)?;
        let inner = &mut *held.inner;
        let revision = inner.undo.back().map(UndoEntry::revision);
        let result = f(target, inner.undo.back_mut());
        let changed = inner.undo.back().map(UndoEntry::revision) != revision;
        if changed && !inner.redo.is_empty() {
            inner.redo.clear();
            self.events.emit(HistoryEvent::RedoCount(0));
        }
        Ok(result)
    }

    /// Open a group that collects every commit until the returned guard is dropped.
    /// See [`Self::combining_actions`] for the scoped form.
    pub fn begin_group(&self, type_tag: &str) -> Result<GroupGuard<'_, T>, UndoError> {
        let mut held = self.try_hold(type_tag)?;
        if let Some(open) = held.inner.open_group.as_ref() {
            return Err(UndoError::GroupAlreadyOpen {
                attempted: type_tag.to_owned(),
                open: open.type_tag().to_owned(),
            });
        }
        held.inner.open_group = Some(UndoEntry::empty_group(type_tag, Instant::now()));
        Ok(GroupGuard {
            stack: self,
            type_tag: type_tag.to_owned(),
        })
    }
    /// Run `f`, grouping every commit it makes into a single entry.
    ///
    /// An empty group is discarded. The group is closed on every exit path; if `f` panics, whatever was
    /// committed so far is still recorded so history stays in step with the target.
    pub fn combining_actions<R>(&self, type_tag: &str, f: impl FnOnce() -> R) -> Result<R, UndoError> {
        let guard = self.begin_group(type_tag)?;
        let result = f();
        drop(guard);
        Ok(result)
    }
    fn close_group(&self, type_tag: &str) {
        // Blocking, commits only hold the lock for their own duration.
        let mut inner = self.inner.lock();
        let Some(group) = inner.open_group.take() else {
            log::error!("Closing {type_tag} group, but no group is open");
            return;
        };
        if group.is_empty() {
            log::trace!("Discarding empty {type_tag} group");
            return;
        }
        if std::thread::panicking() {
            log::warn!("Recording {type_tag} group closed by a panic");
        }
        let max = inner.settings.max_history;
        Self::push_bounded(&self.events, &mut inner.undo, group, max, true);
        if !inner.redo.is_empty() {
            inner.redo.clear();
            self.events.emit(HistoryEvent::RedoCount(0));
        }
    }
}

/// An open group. Dropping closes it.
pub struct GroupGuard<'a, T: 'static> {
    stack: &'a UndoStack<T>,
    type_tag: String,
}
impl<T: 'static> Drop for GroupGuard<'_, T> {
    fn drop(&mut self) {
        self.stack.close_group(&self.type_tag);
    }
}
