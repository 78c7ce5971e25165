/// Type of the order as encoded by the protocol.
///
/// Swap Order Types:
/// * [`OrderType::MarketSwap`] swaps the initial collateral token along the swap path at market price.
/// * [`OrderType::LimitSwap`] executes the swap once the minimum output amount can be fulfilled.
///
/// Increase Order Types:
/// * [`OrderType::MarketIncrease`] opens or increases a position at market price.
/// * [`OrderType::LimitIncrease`] increases a position once the trigger price is reached.
/// * [`OrderType::StopIncrease`] increases a position once the price moves past the trigger
///   in the direction of the position.
///
/// Decrease Order Types:
/// * [`OrderType::MarketDecrease`] reduces or closes a position at market price.
/// * [`OrderType::LimitDecrease`] is a take-profit order.
/// * [`OrderType::StopLossDecrease`] is a stop-loss order.
/// * [`OrderType::Liquidation`] is created by the keeper only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OrderType {
    MarketSwap,
    LimitSwap,
    MarketIncrease,
    LimitIncrease,
    MarketDecrease,
    LimitDecrease,
    StopLossDecrease,
    Liquidation,
    StopIncrease,
}

impl OrderType {
    /// Numeric tag of the order type as stored on-chain.
    pub fn tag(&self) -> u8 {
        match self {
            OrderType::MarketSwap => 0,
            OrderType::LimitSwap => 1,
            OrderType::MarketIncrease => 2,
            OrderType::LimitIncrease => 3,
            OrderType::MarketDecrease => 4,
            OrderType::LimitDecrease => 5,
            OrderType::StopLossDecrease => 6,
            OrderType::Liquidation => 7,
            OrderType::StopIncrease => 8,
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self, OrderType::MarketSwap | OrderType::LimitSwap)
    }

    pub fn is_increase(&self) -> bool {
        matches!(
            self,
            OrderType::MarketIncrease | OrderType::LimitIncrease | OrderType::StopIncrease
        )
    }

    pub fn is_decrease(&self) -> bool {
        matches!(
            self,
            OrderType::MarketDecrease
                | OrderType::LimitDecrease
                | OrderType::StopLossDecrease
                | OrderType::Liquidation
        )
    }

    /// Whether the order waits for a trigger price instead of executing at market.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            OrderType::LimitSwap
                | OrderType::LimitIncrease
                | OrderType::StopIncrease
                | OrderType::LimitDecrease
                | OrderType::StopLossDecrease
        )
    }
}

impl TryFrom<u8> for OrderType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => OrderType::MarketSwap,
            1 => OrderType::LimitSwap,
            2 => OrderType::MarketIncrease,
            3 => OrderType::LimitIncrease,
            4 => OrderType::MarketDecrease,
            5 => OrderType::LimitDecrease,
            6 => OrderType::StopLossDecrease,
            7 => OrderType::Liquidation,
            8 => OrderType::StopIncrease,
            other => return Err(other),
        })
    }
}
