// =============================================================================
// Signal scorer — 0-100 confluence score gating new-position entry
// =============================================================================
//
// Weighted confluence checks against the alert's indicator bundle:
//
//   trend_alignment   <= 30   close vs trend tracer
//   trend_strength    <= 25   distance from smart trail + neo lead/lag accord
//   smart_trail       <= 20   close vs smart trail
//   reversal_zone     <= 15   proximity to first support (LONG) / resistance (SHORT)
//   price_action      <= 10   candle direction + nonzero volume
//   momentum_bonus    +10     when the MACD gate confirmed
//
// The raw weights sum to 100; the optional bonus can push past it, so the
// total is capped. Near-confluence bands use 0.5 % relative distance.
// =============================================================================

use serde::Serialize;

use crate::signal::SignalData;
use crate::types::PositionSide;

/// Relative distance band that counts as "near confluence".
const NEAR_BAND: f64 = 0.005;
/// Relative distance that counts as a strong trend-strength separation.
const STRONG_BAND: f64 = 0.01;

/// Named component breakdown of one confluence score.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Score {
    pub trend_alignment: u32,
    pub trend_strength: u32,
    pub smart_trail: u32,
    pub reversal_zone: u32,
    pub price_action: u32,
    pub momentum_bonus: u32,
    /// Component sum, capped at 100.
    pub total: u32,
}

impl Score {
    fn finish(mut self) -> Self {
        let sum = self.trend_alignment
            + self.trend_strength
            + self.smart_trail
            + self.reversal_zone
            + self.price_action
            + self.momentum_bonus;
        self.total = sum.min(100);
        self
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (tracer {} | strength {} | trail {} | rz {} | pa {} | macd {})",
            self.total,
            self.trend_alignment,
            self.trend_strength,
            self.smart_trail,
            self.reversal_zone,
            self.price_action,
            self.momentum_bonus
        )
    }
}

/// Relative distance of `close` from `level`, positive when `close` is on the
/// favorable side for `side`.
fn favorable_distance(close: f64, level: f64, side: PositionSide) -> f64 {
    match side {
        PositionSide::Long => (close - level) / level,
        PositionSide::Short => (level - close) / level,
    }
}

/// Compute the confluence score for a candidate position side.
///
/// `momentum_confirmed` is `true` only when the MACD gate ran and passed;
/// absent indicators simply contribute zero to their components.
pub fn compute_score(data: &SignalData, side: PositionSide, momentum_confirmed: bool) -> Score {
    let close = data.close;
    let ind = &data.indicators;

    // Trend alignment vs the trend tracer (<= 30).
    let trend_alignment = match ind.tracer {
        Some(tracer) if tracer > 0.0 => {
            let dist = favorable_distance(close, tracer, side);
            if dist > 0.0 {
                30
            } else if dist.abs() <= NEAR_BAND {
                15
            } else {
                0
            }
        }
        _ => 0,
    };

    // Trend strength: separation from the smart trail plus neo lead/lag
    // agreement (<= 25).
    let trend_strength = match (ind.smart_trail, ind.neo_lead, ind.neo_lag) {
        (Some(trail), Some(lead), Some(lag)) if trail > 0.0 => {
            let dist = favorable_distance(close, trail, side);
            let trend_agrees = match side {
                PositionSide::Long => lead > lag,
                PositionSide::Short => lead < lag,
            };
            if dist > STRONG_BAND && trend_agrees {
                25
            } else if dist > 0.0 && trend_agrees {
                15
            } else if dist.abs() <= NEAR_BAND {
                5
            } else {
                0
            }
        }
        _ => 0,
    };

    // Smart-trail confluence (<= 20).
    let smart_trail = match ind.smart_trail {
        Some(trail) if trail > 0.0 => {
            let dist = favorable_distance(close, trail, side);
            if dist > 0.0 {
                20
            } else if dist.abs() <= NEAR_BAND {
                10
            } else {
                0
            }
        }
        _ => 0,
    };

    // Proximity to the first reversal-zone level (<= 15). Longs look at the
    // first support, shorts at the first resistance.
    let zone_level = match side {
        PositionSide::Long => ind.rz_s1,
        PositionSide::Short => ind.rz_r1,
    };
    let reversal_zone = match zone_level {
        Some(level) if level > 0.0 => {
            let dist = ((close - level) / level).abs();
            if dist <= NEAR_BAND {
                15
            } else if dist <= 2.0 * NEAR_BAND {
                8
            } else {
                0
            }
        }
        _ => 0,
    };

    // Price action (<= 10): candle direction and nonzero volume are
    // independent 5-point checks.
    let directional = match side {
        PositionSide::Long => close > data.open,
        PositionSide::Short => close < data.open,
    };
    let mut price_action = 0;
    if directional {
        price_action += 5;
    }
    if data.volume > 0.0 {
        price_action += 5;
    }

    let momentum_bonus = if momentum_confirmed { 10 } else { 0 };

    Score {
        trend_alignment,
        trend_strength,
        smart_trail,
        reversal_zone,
        price_action,
        momentum_bonus,
        total: 0,
    }
    .finish()
}
