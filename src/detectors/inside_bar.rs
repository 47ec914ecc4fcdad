//! Inside-bar breakout detector
//!
//! Two stages, both resolved strictly left to right:
//! - **Inside bar**: bar\[i\] is contained in bar\[i-1\] (the mother bar). This arms
//!   a pending setup carrying the mother's high/low. An inside bar never
//!   confirms its own setup.
//! - **Confirmation**: a later bar closes strictly beyond the mother range.
//!   A close above the mother high confirms a long, below the mother low a short.
//!
//! While armed, a pending setup is dropped when:
//! - the mother range has been pierced on both sides (ambiguous, no signal),
//! - a newer inside bar appears (the most recent mother bar wins),
//! - `max_wait` bars pass after the latest inside bar without a breakout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::helpers::{self, is_inside, pierces_above, pierces_below};
use crate::{
    params::{get_period, get_ratio, ParamMeta, Parameterized},
    Bar, Period, Ratio, Result, SetupDetector, Side, OHLCV,
};

// ============================================================
// ANNOTATIONS
// ============================================================

/// The bar whose range frames a setup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBar {
    /// Position of the reference bar in the input series
    pub index: usize,
    pub high: f64,
    pub low: f64,
}

impl ReferenceBar {
    fn of<T: OHLCV>(index: usize, bar: &T) -> Self {
        Self {
            index,
            high: bar.high(),
            low: bar.low(),
        }
    }
}

/// A bar plus what the detector concluded about it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedBar {
    pub bar: Bar,
    /// Bar is contained in its predecessor and armed a setup
    pub is_inside: bool,
    /// Bar confirmed a setup; `direction` and `reference` are set
    pub is_setup: bool,
    pub direction: Option<Side>,
    pub reference: Option<ReferenceBar>,
}

impl AnnotatedBar {
    pub fn plain(bar: Bar) -> Self {
        Self {
            bar,
            is_inside: false,
            is_setup: false,
            direction: None,
            reference: None,
        }
    }

    #[inline]
    pub fn reference_high(&self) -> Option<f64> {
        self.reference.map(|r| r.high)
    }

    #[inline]
    pub fn reference_low(&self) -> Option<f64> {
        self.reference.map(|r| r.low)
    }
}

// ============================================================
// DETECTOR
// ============================================================

/// Inside bar followed by a close outside the mother bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InsideBarDetector {
    /// Slack on the containment test, as a fraction of the mother range
    pub containment_tolerance: Ratio,
    /// Bars to wait for a breakout after the latest inside bar; `None` waits
    /// until breakout or invalidation. Serialized as `0` when unbounded.
    #[serde(with = "wait_bars")]
    pub max_wait: Option<Period>,
}

/// `max_wait` on the wire: `0` (or null) means unbounded, like `with_params`
mod wait_bars {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::Period;

    pub fn serialize<S: Serializer>(
        value: &Option<Period>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        value.map_or(0, Period::get).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Period>, D::Error> {
        match Option::<usize>::deserialize(d)? {
            None | Some(0) => Ok(None),
            Some(bars) => Period::new(bars).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

impl Default for InsideBarDetector {
    fn default() -> Self {
        Self {
            containment_tolerance: Ratio::new_const(helpers::CONTAINMENT_TOLERANCE),
            max_wait: Some(Period::new_const(helpers::MAX_WAIT_BARS)),
        }
    }
}

impl InsideBarDetector {
    /// Never expire a pending setup
    pub fn unbounded(mut self) -> Self {
        self.max_wait = None;
        self
    }
}

/// Setup armed by an inside bar, waiting for its breakout
#[derive(Debug, Clone, Copy)]
struct Pending {
    reference: ReferenceBar,
    inside_index: usize,
    pierced_high: bool,
    pierced_low: bool,
}

enum Resolution {
    Confirmed(Side),
    Invalidated,
    Waiting,
}

impl Pending {
    fn arm(reference: ReferenceBar, inside_index: usize) -> Self {
        Self {
            reference,
            inside_index,
            pierced_high: false,
            pierced_low: false,
        }
    }

    fn expired(&self, index: usize, max_wait: Option<Period>) -> bool {
        max_wait.is_some_and(|p| index - self.inside_index > p.get())
    }

    fn observe<T: OHLCV>(&mut self, bar: &T) -> Resolution {
        self.pierced_high |= pierces_above(bar, self.reference.high);
        self.pierced_low |= pierces_below(bar, self.reference.low);

        if self.pierced_high && self.pierced_low {
            Resolution::Invalidated
        } else if bar.close() > self.reference.high {
            Resolution::Confirmed(Side::Long)
        } else if bar.close() < self.reference.low {
            Resolution::Confirmed(Side::Short)
        } else {
            Resolution::Waiting
        }
    }
}

impl SetupDetector for InsideBarDetector {
    fn name(&self) -> &'static str {
        "INSIDE_BAR"
    }

    /// Re-check values that `new_const` can construct without validation
    fn validate_config(&self) -> Result<()> {
        Ratio::new(self.containment_tolerance.get())?;
        if let Some(wait) = self.max_wait {
            Period::new(wait.get())?;
        }
        Ok(())
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> Vec<AnnotatedBar> {
        let mut out: Vec<AnnotatedBar> = bars
            .iter()
            .map(|b| AnnotatedBar::plain(Bar::from_ohlcv(b)))
            .collect();
        let tolerance = self.containment_tolerance.get();
        let mut pending: Option<Pending> = None;

        for index in 1..bars.len() {
            let bar = &bars[index];
            let prev = &bars[index - 1];
            debug_assert!(
                prev.timestamp() < bar.timestamp(),
                "bars must be strictly time-ordered"
            );

            if pending.is_some_and(|p| p.expired(index, self.max_wait)) {
                trace!(index, "pending setup expired");
                pending = None;
            }

            if let Some(mut setup) = pending.take() {
                match setup.observe(bar) {
                    Resolution::Confirmed(side) => {
                        debug!(
                            index,
                            %side,
                            reference = setup.reference.index,
                            "setup confirmed"
                        );
                        let a = &mut out[index];
                        a.is_setup = true;
                        a.direction = Some(side);
                        a.reference = Some(setup.reference);
                    }
                    Resolution::Invalidated => {
                        trace!(index, reference = setup.reference.index, "range broken both ways");
                    }
                    Resolution::Waiting => pending = Some(setup),
                }
            }

            // The most recent mother bar always wins
            if is_inside(bar, prev, tolerance) {
                out[index].is_inside = true;
                pending = Some(Pending::arm(ReferenceBar::of(index - 1, prev), index));
            }
        }

        out
    }
}

// ============================================================
// PARAMETERS
// ============================================================

const INSIDE_BAR_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "containment_tolerance",
        helpers::CONTAINMENT_TOLERANCE,
        (0.0, 0.1, 0.05),
        "Containment slack as a fraction of the mother bar range",
    ),
    ParamMeta::period(
        "max_wait",
        helpers::MAX_WAIT_BARS as f64,
        (1.0, 5.0, 1.0),
        "Bars to wait for a breakout after the latest inside bar",
    ),
];

impl Parameterized for InsideBarDetector {
    fn param_meta() -> &'static [ParamMeta] {
        INSIDE_BAR_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let max_wait = match params.get("max_wait") {
            Some(&v) if v <= 0.0 => None,
            _ => Some(get_period(params, "max_wait", helpers::MAX_WAIT_BARS)?),
        };
        Ok(Self {
            containment_tolerance: get_ratio(
                params,
                "containment_tolerance",
                helpers::CONTAINMENT_TOLERANCE,
            )?,
            max_wait,
        })
    }

    fn current_params(&self) -> HashMap<&'static str, f64> {
        HashMap::from([
            ("containment_tolerance", self.containment_tolerance.get()),
            (
                "max_wait",
                self.max_wait.map_or(0.0, |p| p.get() as f64),
            ),
        ])
    }

    fn name() -> &'static str {
        "INSIDE_BAR"
    }
}

// ============================================================
// TESTS
// ============================================================
