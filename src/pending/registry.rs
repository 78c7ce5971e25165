use dashmap::DashMap;
use tracing::debug;

use super::PendingOperation;
use crate::types::PendingKey;

/// Optimistic records of submitted operations, keyed by [`PendingKey`].
///
/// A record is stored when the transaction is sent and taken back out once
/// an on-chain event with the same semantic fields arrives.
#[derive(Debug)]
pub struct PendingTxns<T> {
    records: DashMap<PendingKey, T>,
}

impl<T> Default for PendingTxns<T> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<T> PendingTxns<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload under the operation key, replacing and returning
    /// a previous payload stored for the same key.
    pub fn set_pending(&self, operation: &PendingOperation, payload: T) -> Option<T> {
        let key = operation.key();
        debug!(%key, kind = ?operation.kind(), "pending operation stored");
        self.records.insert(key, payload)
    }

    /// Removes and returns the payload matching the observed operation.
    pub fn take_matching(&self, observed: &PendingOperation) -> Option<T> {
        let key = observed.key();
        let taken = self.records.remove(&key).map(|(_, payload)| payload);
        debug!(%key, matched = taken.is_some(), "pending operation lookup");
        taken
    }

    pub fn contains(&self, operation: &PendingOperation) -> bool {
        self.records.contains_key(&operation.key())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{U256, address};

    use super::*;
    use crate::pending::PendingShiftData;

    fn shift(amount: u64) -> PendingOperation {
        PendingOperation::Shift(PendingShiftData {
            account: address!("0x1111111111111111111111111111111111111111"),
            from_market: address!("0x2222222222222222222222222222222222222222"),
            market_token_amount: U256::from(amount),
            to_market: address!("0x3333333333333333333333333333333333333333"),
            min_market_tokens: U256::from(1),
        })
    }

    #[test]
    fn test_take_matching_consumes_record() {
        let txns = PendingTxns::new();
        assert!(txns.set_pending(&shift(10), "0xabc").is_none());
        assert!(txns.contains(&shift(10)));
        assert!(!txns.contains(&shift(11)));

        assert_eq!(txns.take_matching(&shift(10)), Some("0xabc"));
        assert!(txns.take_matching(&shift(10)).is_none());
        assert!(txns.is_empty());
    }

    #[test]
    fn test_set_pending_replaces_same_key() {
        let txns = PendingTxns::new();
        txns.set_pending(&shift(10), 1);
        assert_eq!(txns.set_pending(&shift(10), 2), Some(1));
        assert_eq!(txns.len(), 1);
    }
}
