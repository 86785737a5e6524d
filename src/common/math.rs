/// Error function approximation after Abramowitz & Stegun 7.1.26.
///
/// The absolute error is below `1.5e-7` over the whole real line, which is well below
/// the resolution of any hit probability reported to an operator.
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x_abs = x.abs();
    let t = 1.0 / (1.0 + P * x_abs);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x_abs * x_abs).exp())
}

/// Standard normal cumulative distribution function Φ.
pub fn normal_cdf(x: f64) -> f64 { 0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2)) }

/// Probability that a Gaussian miss along one axis with standard deviation `sigma`
/// stays within `radius`, i.e. `2·Φ(radius/σ) − 1`.
///
/// # Returns
/// - A value in `[0.0, 1.0]`; a vanishing `sigma` yields certainty (`1.0`) as long as
///   the radius is positive.
pub fn gaussian_capture_probability(radius: f64, sigma: f64) -> f64 {
    if radius <= 0.0 {
        return 0.0;
    }
    if sigma <= f64::EPSILON {
        return 1.0;
    }
    (2.0 * normal_cdf(radius / sigma) - 1.0).clamp(0.0, 1.0)
}

/// Exponential backoff step `base · 2^attempt`, capped at `max`.
pub fn capped_backoff(base: std::time::Duration, max: std::time::Duration, attempt: u32) -> std::time::Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}
