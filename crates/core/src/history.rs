//! Bounded undo/redo ledger of committed transactions.

use std::collections::VecDeque;

use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct History {
    past: VecDeque<Transaction>,
    future: Vec<Transaction>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            limit,
        }
    }

    /// Record a freshly committed transaction. Evicts the oldest entry on
    /// overflow and invalidates the redo stack.
    pub fn record(&mut self, tx: Transaction) {
        self.future.clear();
        self.push_past(tx);
    }

    pub(crate) fn push_past(&mut self, tx: Transaction) {
        if self.limit == 0 {
            return;
        }
        self.past.push_back(tx);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Transaction> {
        self.past.pop_back()
    }

    pub(crate) fn push_redo(&mut self, tx: Transaction) {
        self.future.push(tx);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Transaction> {
        self.future.pop()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.past.len()
    }

    pub fn redo_len(&self) -> usize {
        self.future.len()
    }

    /// Most recent committed transaction.
    pub fn last(&self) -> Option<&Transaction> {
        self.past.back()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u64) -> Transaction {
        Transaction::new(id, "test", "")
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = History::new(2);
        history.record(tx(1));
        history.record(tx(2));
        history.record(tx(3));
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.pop_undo().map(|t| t.id), Some(3));
        assert_eq!(history.pop_undo().map(|t| t.id), Some(2));
        assert!(history.pop_undo().is_none());
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::new(10);
        history.record(tx(1));
        let undone = history.pop_undo().unwrap();
        history.push_redo(undone);
        assert!(history.can_redo());
        history.record(tx(2));
        assert!(!history.can_redo());
    }
}
