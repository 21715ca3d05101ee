//! Oracle price feed.
//!
//! A [`PriceSource`] supplies raw prices; the [`OracleFeed`] keeps the
//! latest accepted observation and only accepts observations whose
//! timestamps strictly increase. The node polls the source on a fixed
//! interval; observations never drive contract transitions by themselves.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::params::Price;

/// Supplies the current price of the underlying asset.
pub trait PriceSource: Send + Sync {
    fn current_price(&self) -> Result<Price>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub price: Price,
    pub observed_at: DateTime<Utc>,
}

/// Latest oracle observation, shared with any number of watchers.
pub struct OracleFeed {
    tx: watch::Sender<Option<PriceObservation>>,
}

impl Default for OracleFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl OracleFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Accept `observation` if it is newer than the current one.
    pub fn record(&self, observation: PriceObservation) -> bool {
        self.tx.send_if_modified(|current| match current {
            Some(prev) if observation.observed_at <= prev.observed_at => false,
            _ => {
                *current = Some(observation);
                true
            }
        })
    }

    pub fn latest(&self) -> Option<PriceObservation> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PriceObservation>> {
        self.tx.subscribe()
    }

    /// Read `source` once and record the result at `now`. Returns the
    /// observation if the feed accepted it.
    pub fn poll(
        &self,
        source: &dyn PriceSource,
        now: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        let price = source.current_price()?;
        let observation = PriceObservation {
            price,
            observed_at: now,
        };
        Ok(self.record(observation).then_some(observation))
    }
}

/// Simulated feed: each read moves the price by a uniform step of at most
/// `max_step` in either direction.
pub struct RandomWalkSource {
    state: Mutex<(Price, StdRng)>,
    max_step: u64,
}

impl RandomWalkSource {
    /// Steps of up to $100, matching a 200-dollar swing per tick.
    pub const DEFAULT_MAX_STEP: u64 = 10_000;

    pub fn new(start: Price) -> Self {
        Self::with_rng(start, Self::DEFAULT_MAX_STEP, StdRng::from_entropy())
    }

    pub fn seeded(start: Price, max_step: u64, seed: u64) -> Self {
        Self::with_rng(start, max_step, StdRng::seed_from_u64(seed))
    }

    fn with_rng(start: Price, max_step: u64, rng: StdRng) -> Self {
        Self {
            state: Mutex::new((start, rng)),
            max_step,
        }
    }
}

impl PriceSource for RandomWalkSource {
    fn current_price(&self) -> Result<Price> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::PriceFeed("random walk state poisoned".into()))?;
        let (price, rng) = &mut *state;
        let step = self.max_step as i64;
        let delta = rng.gen_range(-step..=step);
        *price = price.offset(delta);
        Ok(*price)
    }
}
