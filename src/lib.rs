//! DEX client core.
//!
//! # Overview
//!
//! Two independent building blocks of a trading front-end:
//!
//! * [`pending`] derives a deterministic [`types::PendingKey`] for every
//!   in-flight operation (order, deposit, GLV deposit, withdrawal, shift), so
//!   that an optimistic record created when the transaction is sent can be
//!   matched against the on-chain event that arrives later. [`pending::PendingTxns`]
//!   keeps such records until they are matched.
//!
//! * [`metrics`] buffers client telemetry (events, counters, timings, errors)
//!   and ships it to a remote collector in batches from a background loop,
//!   retrying transient failures. It also persists short-lived records and
//!   timers so that a measurement can span a reload.
//!
//! # Limitations/follow-ups
//!
//! * Key derivation does not validate descriptors; an absent optional field
//!   renders as `undefined` in the key.
//!
//! * A hung delivery request delays the next flush cycle, the pipeline relies
//!   on the transport's own timeout.
//!
//! * Delivery is at-least-once, a batch whose answer got lost is sent again.
//!
//! # Testing
//!
//! [`testing`] provides a scripted transport and a manual clock for driving
//! the pipeline deterministically.

pub mod error;
pub mod metrics;
pub mod pending;
pub mod testing;
pub mod types;
