//! Core type definitions for boltstore.

use std::fmt;

/// Identifier of a page within the database file.
///
/// A page id multiplied by the page size is the page's byte offset.
pub type PageId = u64;

/// Unique identifier for a transaction.
///
/// Every committed write transaction advances the id by one. Read
/// transactions carry the id of the snapshot they observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let a = TransactionId::new(3);
        let b = a.next();
        assert!(a < b);
        assert_eq!(b.as_u64(), 4);
    }

    #[test]
    fn transaction_id_display() {
        assert_eq!(TransactionId::new(42).to_string(), "txn:42");
    }
}
