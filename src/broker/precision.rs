use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{BrokerClient, BrokerError};

/// Rounds `price` to the decimal precision configured for `epic`.
/// `roundForEpic(roundForEpic(p, e), e) == roundForEpic(p, e)`.
pub fn round_for_epic(price: Decimal, decimal_places: u32) -> Decimal {
    price.round_dp(decimal_places)
}

/// Per-epic decimal precision, discovered once from market info and cached
/// for the life of the process.
#[derive(Default)]
pub struct PrecisionCache {
    places: RwLock<HashMap<String, u32>>,
}

impl PrecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(
        &self,
        broker: &Arc<dyn BrokerClient>,
        epic: &str,
    ) -> Result<u32, BrokerError> {
        if let Some(places) = self.places.read().await.get(epic).copied() {
            return Ok(places);
        }
        let places = broker.decimal_places(epic).await?;
        self.places.write().await.insert(epic.to_string(), places);
        Ok(places)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_for_epic_is_idempotent() {
        let p = dec!(1.234567);
        let once = round_for_epic(p, 4);
        let twice = round_for_epic(once, 4);
        assert_eq!(once, twice);
    }
}
