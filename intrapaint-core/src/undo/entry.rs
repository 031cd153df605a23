use super::Transaction;
use crate::commands::CommandError;
use std::any::Any;
use std::time::Instant;

/// One step of history: one or more transactions, undone and redone as a unit.
pub struct UndoEntry<T> {
    /// Comma-separated, in first-seen order.
    type_tag: String,
    timestamp: Instant,
    transactions: Vec<Box<dyn Transaction<T>>>,
    merge_data: Option<Box<dyn Any + Send>>,
    /// Bumped on every amendment.
    revision: u64,
}
impl<T> std::fmt::Debug for UndoEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoEntry")
            .field("type_tag", &self.type_tag)
            .field("transactions", &self.transactions.len())
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl<T> UndoEntry<T> {
    pub(super) fn single(
        transaction: Box<dyn Transaction<T>>,
        type_tag: String,
        merge_data: Option<Box<dyn Any + Send>>,
        timestamp: Instant,
    ) -> Self {
        Self {
            type_tag,
            timestamp,
            transactions: vec![transaction],
            merge_data,
            revision: 0,
        }
    }
    pub(super) fn empty_group(type_tag: &str, timestamp: Instant) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            timestamp,
            transactions: Vec::new(),
            merge_data: None,
            revision: 0,
        }
    }
    /// Append an already-applied transaction.
    pub(super) fn push(&mut self, transaction: Box<dyn Transaction<T>>, type_tag: &str, now: Instant) {
        if !self.has_type(type_tag) {
            if !self.type_tag.is_empty() {
                self.type_tag.push(',');
            }
            self.type_tag.push_str(type_tag);
        }
        self.transactions.push(transaction);
        self.timestamp = now;
        self.revision += 1;
    }
    pub(super) fn revision(&self) -> u64 {
        self.revision
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
    pub(super) fn timestamp(&self) -> Instant {
        self.timestamp
    }
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
    /// Whether any transaction in this entry was committed with `type_tag`.
    #[must_use]
    pub fn has_type(&self, type_tag: &str) -> bool {
        self.type_tag.split(',').any(|tag| tag == type_tag)
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }
    #[must_use]
    pub fn merge_data<D: Any>(&self) -> Option<&D> {
        self.merge_data.as_deref()?.downcast_ref()
    }
    pub fn merge_data_mut<D: Any>(&mut self) -> Option<&mut D> {
        self.merge_data.as_deref_mut()?.downcast_mut()
    }
    /// Apply `transaction` to `target` and fold it into this entry, so that undoing the entry reverts it too.
    /// On failure the entry is unchanged.
    pub fn extend(
        &mut self,
        target: &mut T,
        mut transaction: impl Transaction<T> + 'static,
    ) -> Result<(), CommandError> {
        transaction.redo(target)?;
        self.transactions.push(Box::new(transaction));
        self.timestamp = Instant::now();
        self.revision += 1;
        Ok(())
    }

    /// Undo every transaction, newest first. On failure, the ones already undone are re-applied.
    pub(super) fn undo(&mut self, target: &mut T) -> Result<(), CommandError> {
        let count = self.transactions.len();
        for idx in (0..count).rev() {
            if let Err(err) = self.transactions[idx].undo(target) {
                for done in &mut self.transactions[idx + 1..] {
                    if let Err(rollback) = done.redo(target) {
                        log::error!("Failed to roll back partial undo of {}: {rollback}", self.type_tag);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
    /// Redo every transaction, oldest first. On failure, the ones already redone are reverted.
    pub(super) fn redo(&mut self, target: &mut T) -> Result<(), CommandError> {
        for idx in 0..self.transactions.len() {
            if let Err(err) = self.transactions[idx].redo(target) {
                for done in self.transactions[..idx].iter_mut().rev() {
                    if let Err(rollback) = done.undo(target) {
                        log::error!("Failed to roll back partial redo of {}: {rollback}", self.type_tag);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
