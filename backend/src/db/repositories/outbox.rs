//! Commit-ordered reading of a change outbox.
//!
//! Outbox sequence numbers are handed out when a row is written, not when its
//! transaction commits, so a reader that only remembers the highest sequence
//! it has seen can step over a row that commits late. Each outbox row also
//! records the id of the transaction that wrote it. A reader only consumes
//! rows from transactions older than the snapshot horizon (`xmin`), where
//! every such transaction has already finished, and orders by
//! `(txid, change_seq)`.

/// Position in a transaction-ordered outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutboxCursor {
    pub txid: i64,
    pub change_seq: i64,
}

impl OutboxCursor {
    /// Cursor that treats every transaction older than `xmin` as consumed.
    pub fn at_horizon(xmin: i64) -> Self {
        Self {
            txid: xmin.saturating_sub(1),
            change_seq: i64::MAX,
        }
    }

    /// True when the row at `(txid, change_seq)` has not been consumed yet.
    pub fn is_before(&self, txid: i64, change_seq: i64) -> bool {
        (txid, change_seq) > (self.txid, self.change_seq)
    }

    /// Consume `rows`, which must be ordered by `(txid, change_seq)`, up to
    /// the first one written by a transaction at or past `xmin`.
    ///
    /// Rows at or behind the cursor are skipped. Returns the rows that are
    /// safe to deliver and moves the cursor past the last of them.
    pub fn take_settled<T, F>(&mut self, rows: Vec<T>, xmin: i64, key: F) -> Vec<T>
    where
        F: Fn(&T) -> (i64, i64),
    {
        let mut settled = Vec::with_capacity(rows.len());
        for row in rows {
            let (txid, change_seq) = key(&row);
            if txid >= xmin {
                break;
            }
            if !self.is_before(txid, change_seq) {
                continue;
            }
            self.txid = txid;
            self.change_seq = change_seq;
            settled.push(row);
        }
        settled
    }
}
