//! Range Remapping
//!
//! Linear range mapping with out-of-range policies. The handshake uses the
//! clamped form to turn a hand distance into a blend ceiling.

use serde::{Serialize, Deserialize};

/// What to do when the input falls outside `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MapMode {
    /// Map continuously, extrapolating past the borders
    #[default]
    Float,
    /// Clamp at the borders of the output range
    Clamp,
    /// Repeat into the range, like a modulo
    Wrap,
    /// Fold back into the range, alternating direction each period
    Mirror,
}

/// Position of `input` inside `[start, end]` as a ratio.
///
/// An empty input range (`start == end`) yields 0.
pub fn ratio(input: f32, start: f32, end: f32, mode: MapMode) -> f32 {
    if end == start {
        return 0.0;
    }

    let mut ratio = (input - start) / (end - start);

    match mode {
        MapMode::Float => {}
        MapMode::Clamp => {
            ratio = ratio.clamp(0.0, 1.0);
        }
        MapMode::Wrap => {
            ratio -= ratio.floor();
        }
        MapMode::Mirror => {
            // Shift by an even number of periods, then fold the upper half back
            let mut periods = ratio.floor() as i64;
            periods -= periods & 1;
            ratio -= periods as f32;
            if ratio > 1.0 {
                ratio = 2.0 - ratio;
            }
        }
    }

    ratio
}

/// Linear interpolation, `t = 0` gives `a`, `t = 1` gives `b`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Map `input` from `[in_min, in_max]` to `[out_min, out_max]`.
pub fn remap(input: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32, mode: MapMode) -> f32 {
    lerp(out_min, out_max, ratio(input, in_min, in_max, mode))
}
