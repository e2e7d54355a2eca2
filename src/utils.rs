/// Log-odds of a probability: `ln(p / (1 - p))`
#[inline]
pub fn logodds(probability: f64) -> f32 {
    (probability / (1.0 - probability)).ln() as f32
}

/// Inverse of [`logodds`]
#[inline]
pub fn probability(logodds: f64) -> f64 {
    1.0 - (1.0 / (1.0 + logodds.exp()))
}

/// Adds `delta` to `value` and saturates at `[min, max]`.
#[inline]
pub fn clamped_add(value: f32, delta: f32, min: f32, max: f32) -> f32 {
    let sum = value + delta;
    if sum < min {
        min
    } else if sum > max {
        max
    } else {
        sum
    }
}

#[test]
fn logodds_probability_inverse() {
    for p in [0.1192, 0.4, 0.49, 0.5, 0.7, 0.971, 0.99] {
        let back = probability(logodds(p) as f64);
        assert!((back - p).abs() < 1e-6, "{p} -> {back}");
    }
    assert_eq!(logodds(0.5), 0.0);
}

#[test]
fn clamped_add_saturates() {
    assert_eq!(clamped_add(3.0, 1.0, -2.0, 3.5), 3.5);
    assert_eq!(clamped_add(-1.5, -1.0, -2.0, 3.5), -2.0);
    assert_eq!(clamped_add(0.5, 0.25, -2.0, 3.5), 0.75);
}
