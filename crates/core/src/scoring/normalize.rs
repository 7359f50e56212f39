/// Neutral score returned when a measurement carries no usable signal.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Clamp `value` into `[min, max]` and map it linearly onto `[0, 100]`.
///
/// With `invert` set, `min` maps to 100 and `max` to 0. A degenerate range
/// (`min == max`) yields [`NEUTRAL_SCORE`].
pub fn clamp_linear(value: f64, min: f64, max: f64, invert: bool) -> f64 {
    if max == min {
        return NEUTRAL_SCORE;
    }

    let clamped = value.max(min).min(max);
    let mut normalized = (clamped - min) / (max - min);
    if invert {
        normalized = 1.0 - normalized;
    }
    normalized * 100.0
}

/// Score the distance of `value` from `optimal` with a Gaussian kernel.
///
/// Returns exactly 100 at the optimum and falls off symmetrically, reaching
/// ~60.65 one `sigma` away.
pub fn gaussian_proximity(value: f64, optimal: f64, sigma: f64) -> f64 {
    let deviation = (value - optimal).abs();
    let score = (-(deviation * deviation) / (2.0 * sigma * sigma)).exp();
    score * 100.0
}

/// Round to `places` decimal digits, exact ties going to the even digit.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round_ties_even() / factor
}
