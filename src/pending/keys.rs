//! Key derivation for in-flight operations.

use std::fmt::Display;

use alloy::primitives::{Address, U256, U512};
use itertools::Itertools;

use crate::types::{self, OrderType, PendingKey};

/// Order submitted by the account and not yet observed on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOrderData {
    pub account: Address,
    pub market_address: Address,
    pub initial_collateral_token_address: Address,
    pub swap_path: Vec<Address>,
    pub should_unwrap_native_token: bool,
    pub is_long: bool,
    pub order_type: OrderType,
    pub size_delta_usd: U256,
    pub initial_collateral_delta_amount: U256,
}

/// Deposit into a market, or into a GLV vault when `is_glv_deposit` is set.
///
/// `market_address` identifies the market of a plain deposit and
/// `glv_address` the vault of a GLV deposit; the other one is usually absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDepositData {
    pub account: Address,
    pub market_address: Option<Address>,
    pub glv_address: Option<Address>,
    pub initial_long_token_address: Address,
    pub initial_short_token_address: Address,
    pub long_token_swap_path: Vec<Address>,
    pub short_token_swap_path: Vec<Address>,
    pub initial_long_token_amount: U256,
    pub initial_short_token_amount: U256,
    /// Market tokens deposited directly into a GLV vault.
    pub initial_market_token_amount: Option<U256>,
    pub should_unwrap_native_token: bool,
    pub is_glv_deposit: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWithdrawalData {
    pub account: Address,
    pub market_address: Address,
    pub min_long_token_amount: U256,
    pub market_token_amount: U256,
    pub should_unwrap_native_token: bool,
}

/// Shift of market tokens from one market into another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingShiftData {
    pub account: Address,
    pub from_market: Address,
    pub market_token_amount: U256,
    pub to_market: Address,
    pub min_market_tokens: U256,
}

/// Order key: account, market, collateral token, swap path, unwrap flag,
/// direction, order type tag, size delta and collateral delta.
pub fn order_key(data: &PendingOrderData) -> PendingKey {
    join_fields([
        data.account.to_string(),
        data.market_address.to_string(),
        data.initial_collateral_token_address.to_string(),
        swap_path(&data.swap_path),
        data.should_unwrap_native_token.to_string(),
        data.is_long.to_string(),
        data.order_type.tag().to_string(),
        data.size_delta_usd.to_string(),
        data.initial_collateral_delta_amount.to_string(),
    ])
}

/// Deposit key, in one of three shapes:
///
/// * GLV deposit: vault, both tokens, both swap paths, unwrap flag, both
///   amounts and the market token amount (`0` when absent).
/// * Same long and short token: market, the token, the long swap path,
///   unwrap flag and the *sum* of both amounts. The protocol pools a
///   same-token deposit into a single amount, so the event only carries the sum.
/// * Distinct tokens: market, both tokens, both swap paths, unwrap flag
///   and both amounts.
pub fn deposit_key(data: &PendingDepositData) -> PendingKey {
    if data.is_glv_deposit {
        return join_fields([
            data.account.to_string(),
            optional(data.glv_address.as_ref()),
            data.initial_long_token_address.to_string(),
            data.initial_short_token_address.to_string(),
            swap_path(&data.long_token_swap_path),
            swap_path(&data.short_token_swap_path),
            data.should_unwrap_native_token.to_string(),
            data.initial_long_token_amount.to_string(),
            data.initial_short_token_amount.to_string(),
            data.initial_market_token_amount.unwrap_or(U256::ZERO).to_string(),
        ]);
    }

    if data.initial_short_token_address == data.initial_long_token_address {
        let total = U512::from(data.initial_long_token_amount)
            + U512::from(data.initial_short_token_amount);
        return join_fields([
            data.account.to_string(),
            optional(data.market_address.as_ref()),
            data.initial_long_token_address.to_string(),
            swap_path(&data.long_token_swap_path),
            data.should_unwrap_native_token.to_string(),
            total.to_string(),
        ]);
    }

    join_fields([
        data.account.to_string(),
        optional(data.market_address.as_ref()),
        data.initial_long_token_address.to_string(),
        data.initial_short_token_address.to_string(),
        swap_path(&data.long_token_swap_path),
        swap_path(&data.short_token_swap_path),
        data.should_unwrap_native_token.to_string(),
        data.initial_long_token_amount.to_string(),
        data.initial_short_token_amount.to_string(),
    ])
}

pub fn withdrawal_key(data: &PendingWithdrawalData) -> PendingKey {
    join_fields([
        data.account.to_string(),
        data.market_address.to_string(),
        data.min_long_token_amount.to_string(),
        data.market_token_amount.to_string(),
        data.should_unwrap_native_token.to_string(),
    ])
}

pub fn shift_key(data: &PendingShiftData) -> PendingKey {
    join_fields([
        data.account.to_string(),
        data.from_market.to_string(),
        data.market_token_amount.to_string(),
        data.to_market.to_string(),
        data.min_market_tokens.to_string(),
    ])
}

fn join_fields<const N: usize>(fields: [String; N]) -> PendingKey {
    PendingKey::new(fields.iter().join(types::KEY_SEPARATOR))
}

fn swap_path(path: &[Address]) -> String {
    path.iter().join(types::SWAP_PATH_SEPARATOR)
}

fn optional<T: Display>(value: Option<&T>) -> String {
    value.map_or_else(|| types::UNDEFINED_FIELD.to_string(), T::to_string)
}
