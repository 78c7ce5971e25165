//! Identity of in-flight protocol operations.
//!
//! Orders, deposits, withdrawals and shifts are shown optimistically as soon
//! as the transaction is sent. The authoritative on-chain event arrives later
//! and carries the same semantic fields, so both sides derive the same
//! [`PendingKey`] and [`PendingTxns`] can pair them up.
//!
//! Key derivation does not validate its input. Addresses render in their
//! checksummed form and amounts in decimal, so equal values always produce
//! byte-identical keys.

mod keys;
mod registry;

pub use keys::*;
pub use registry::PendingTxns;

use crate::types::PendingKey;

/// Kind of the operation, with GLV deposits told apart from market deposits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PendingOperationKind {
    Order,
    Deposit,
    GlvDeposit,
    Withdrawal,
    Shift,
}

/// Any operation that can be tracked while pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingOperation {
    Order(PendingOrderData),
    Deposit(PendingDepositData),
    Withdrawal(PendingWithdrawalData),
    Shift(PendingShiftData),
}

impl PendingOperation {
    pub fn key(&self) -> PendingKey {
        match self {
            PendingOperation::Order(data) => order_key(data),
            PendingOperation::Deposit(data) => deposit_key(data),
            PendingOperation::Withdrawal(data) => withdrawal_key(data),
            PendingOperation::Shift(data) => shift_key(data),
        }
    }

    pub fn kind(&self) -> PendingOperationKind {
        match self {
            PendingOperation::Order(_) => PendingOperationKind::Order,
            PendingOperation::Deposit(data) if data.is_glv_deposit => {
                PendingOperationKind::GlvDeposit
            }
            PendingOperation::Deposit(_) => PendingOperationKind::Deposit,
            PendingOperation::Withdrawal(_) => PendingOperationKind::Withdrawal,
            PendingOperation::Shift(_) => PendingOperationKind::Shift,
        }
    }
}

impl From<PendingOrderData> for PendingOperation {
    fn from(value: PendingOrderData) -> Self {
        Self::Order(value)
    }
}

impl From<PendingDepositData> for PendingOperation {
    fn from(value: PendingDepositData) -> Self {
        Self::Deposit(value)
    }
}

impl From<PendingWithdrawalData> for PendingOperation {
    fn from(value: PendingWithdrawalData) -> Self {
        Self::Withdrawal(value)
    }
}

impl From<PendingShiftData> for PendingOperation {
    fn from(value: PendingShiftData) -> Self {
        Self::Shift(value)
    }
}
