// =============================================================================
// TaFeed — on-demand candle fetch with a per-(symbol, granularity) cache
// =============================================================================
//
// The multi-timeframe alignment analysis needs candles for arbitrary
// operator-configured granularities that the engine's warm-up set may not
// cover. Fetches go through the broker session's request-reply correlation
// and are cached for half a granularity period so repeated screener rounds
// do not hammer the broker.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::broker::{protocol, BrokerHandle};
use crate::market_data::Candle;

/// Default number of candles requested per analysis.
const FETCH_COUNT: u32 = 300;

#[derive(Clone)]
pub struct TaFeed {
    handle: BrokerHandle,
    cache: Arc<Mutex<HashMap<(String, u32), (Instant, Arc<Vec<Candle>>)>>>,
}

impl TaFeed {
    pub fn new(handle: BrokerHandle) -> Self {
        Self {
            handle,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch candles for `(symbol, granularity)`, serving from cache while the
    /// entry is younger than half a granularity period.
    pub async fn candles(&self, symbol: &str, granularity: u32) -> Result<Arc<Vec<Candle>>> {
        let key = (symbol.to_string(), granularity);
        let ttl = std::time::Duration::from_secs(u64::from(granularity) / 2);

        if let Some((at, cached)) = self.cache.lock().get(&key) {
            if at.elapsed() < ttl {
                return Ok(cached.clone());
            }
        }

        let response = self
            .handle
            .call(protocol::ticks_history(symbol, granularity, FETCH_COUNT))
            .await?;
        let candles = Arc::new(protocol::candles_payload(&response)?);

        debug!(symbol, granularity, count = candles.len(), "ta feed fetched");
        self.cache
            .lock()
            .insert(key, (Instant::now(), candles.clone()));
        Ok(candles)
    }
}
