// =============================================================================
// SNR Zones — support/resistance clustering over local peaks and troughs
// =============================================================================
//
// Collect local peak/trough levels over the last 100 candles, cluster levels
// closer than 0.05% of the mean close, keep clusters with at least two
// touches, and mark a cluster as "Flip" when it alternated between support
// and resistance. Lifetime touch counts are carried over from the previous
// zone set (matched within 0.1%); a zone retires once its lifetime touches
// exceed five.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Window of candles considered for zone extraction.
const ZONE_LOOKBACK: usize = 100;
/// Cluster radius as a fraction of the mean close.
const CLUSTER_RADIUS: f64 = 0.0005;
/// Zone-identity radius when carrying lifetime touches forward.
const CARRY_RADIUS: f64 = 0.001;
/// A zone retires once lifetime touches exceed this.
const MAX_LIFETIME_TOUCHES: u32 = 5;
/// At most this many zones are kept, strongest first.
const MAX_ZONES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Support,
    Resistance,
    Flip,
}

impl ZoneKind {
    pub fn acts_as_support(self) -> bool {
        matches!(self, Self::Support | Self::Flip)
    }

    pub fn acts_as_resistance(self) -> bool {
        matches!(self, Self::Resistance | Self::Flip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnrZone {
    pub price: f64,
    pub kind: ZoneKind,
    pub touches: u32,
    pub lifetime_touches: u32,
}

/// Recompute the zone set from `candles`, carrying lifetime touch counts from
/// `previous`. With fewer than 20 candles the previous set is returned
/// unchanged (sentinel behavior, not an error).
pub fn calculate_snr_zones(candles: &[Candle], previous: &[SnrZone]) -> Vec<SnrZone> {
    if candles.len() < 20 {
        return previous.to_vec();
    }
    let tail = &candles[candles.len().saturating_sub(ZONE_LOOKBACK)..];

    // Local peaks/troughs over a 1-bar neighborhood.
    #[derive(Clone, Copy, PartialEq)]
    enum LevelKind {
        S,
        R,
    }
    let mut levels: Vec<(f64, LevelKind)> = Vec::new();
    for i in 1..tail.len() - 1 {
        if tail[i].high > tail[i - 1].high && tail[i].high > tail[i + 1].high {
            levels.push((tail[i].high, LevelKind::R));
        }
        if tail[i].low < tail[i - 1].low && tail[i].low < tail[i + 1].low {
            levels.push((tail[i].low, LevelKind::S));
        }
    }
    if levels.is_empty() {
        return previous.to_vec();
    }

    let mean_close = tail.iter().map(|c| c.close).sum::<f64>() / tail.len() as f64;
    let radius = mean_close * CLUSTER_RADIUS;

    struct Cluster {
        anchor: f64,
        prices: Vec<f64>,
        touches: u32,
        last: LevelKind,
        flipped: bool,
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for (price, kind) in levels {
        match clusters.iter_mut().find(|c| (price - c.anchor).abs() < radius) {
            Some(c) => {
                c.prices.push(price);
                c.touches += 1;
                if kind != c.last {
                    c.flipped = true;
                }
                c.last = kind;
            }
            None => clusters.push(Cluster {
                anchor: price,
                prices: vec![price],
                touches: 1,
                last: kind,
                flipped: false,
            }),
        }
    }

    let mut zones: Vec<SnrZone> = Vec::new();
    for c in clusters {
        if c.touches < 2 {
            continue;
        }
        let price = c.prices.iter().sum::<f64>() / c.prices.len() as f64;
        let kind = if c.flipped {
            ZoneKind::Flip
        } else {
            match c.last {
                LevelKind::S => ZoneKind::Support,
                LevelKind::R => ZoneKind::Resistance,
            }
        };

        // Carry lifetime touches from the matching previous zone.
        let lifetime = previous
            .iter()
            .find(|z| z.price != 0.0 && ((price - z.price) / z.price).abs() < CARRY_RADIUS)
            .map(|z| z.lifetime_touches)
            .unwrap_or(c.touches);

        if lifetime <= MAX_LIFETIME_TOUCHES {
            zones.push(SnrZone {
                price,
                kind,
                touches: c.touches,
                lifetime_touches: lifetime,
            });
        }
    }

    zones.sort_by(|a, b| b.touches.cmp(&a.touches));
    zones.truncate(MAX_ZONES);
    zones
}
