//! Setup detectors
//!
//! A detector makes one left-to-right pass over a bar series and returns one
//! [`AnnotatedBar`] per input bar. Only confirming bars carry a direction and
//! the reference (mother) bar's range; everything else is a plain annotation.

pub mod helpers;
pub mod inside_bar;

pub use helpers::*;
pub use inside_bar::*;
