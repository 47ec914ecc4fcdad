//! Range comparison helpers shared by setup detectors

use crate::{OHLCVExt, OHLCV};

// ============================================================
// DEFAULTS
// ============================================================

/// Containment slack as a fraction of the reference range (0 = exact)
pub const CONTAINMENT_TOLERANCE: f64 = 0.0;
/// Bars a pending setup may wait for its breakout after the latest inside bar
pub const MAX_WAIT_BARS: usize = 3;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

/// Check if `bar` lies within `reference`, widened on both sides by
/// `tolerance * reference.range()`. Equal highs/lows count as inside.
#[inline]
pub fn is_inside<A: OHLCV, B: OHLCV>(bar: &A, reference: &B, tolerance: f64) -> bool {
    let slack = reference.range() * tolerance;
    bar.high() <= reference.high() + slack && bar.low() >= reference.low() - slack
}

/// True if `bar` trades strictly above `level`
#[inline]
pub fn pierces_above<T: OHLCV>(bar: &T, level: f64) -> bool {
    bar.high() > level
}

/// True if `bar` trades strictly below `level`
#[inline]
pub fn pierces_below<T: OHLCV>(bar: &T, level: f64) -> bool {
    bar.low() < level
}
