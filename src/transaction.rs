/// A transaction identifier: a positive integer allocated monotonically from
/// a per-`Rvm` counter starting at 1. `INVALID` (`-1`) is the sentinel
/// `begin_trans` returns on failure, kept at the API boundary so the id stays
/// representable as a signed integer the way the historical contract requires.
/// Internally, "no transaction on this segment" is `Option<TransactionId>`,
/// not this sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(i64);

impl TransactionId {
    pub const INVALID: TransactionId = TransactionId(-1);

    pub fn as_raw(self) -> i64 {
        self.0
    }
}

/// Monotonic allocator for transaction ids, starting at 1. Owned by `Rvm`;
/// never reset, never reused within a process lifetime.
#[derive(Default)]
pub struct TransactionCounter(i64);

impl TransactionCounter {
    pub fn next(&mut self) -> TransactionId {
        self.0 += 1;
        TransactionId(self.0)
    }
}
