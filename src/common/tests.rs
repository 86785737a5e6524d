use super::math::{capped_backoff, erf, gaussian_capture_probability, normal_cdf};
use super::{Mat3, Vec3};
use rand::Rng;
use std::time::Duration;

#[test]
fn test_erf_reference_values() {
    let table = [(0.0, 0.0), (0.5, 0.520_499_877_8), (1.0, 0.842_700_792_9), (2.0, 0.995_322_265_0)];
    for (x, expected) in table {
        assert!((erf(x) - expected).abs() < 2e-7, "erf({x})");
        assert!((erf(-x) + expected).abs() < 2e-7, "erf(-{x})");
    }
}

#[test]
fn test_normal_cdf_symmetry() {
    let mut rng = rand::rng();
    for _ in 0..100 {
        let x: f64 = rng.random_range(-6.0..6.0);
        assert!((normal_cdf(x) + normal_cdf(-x) - 1.0).abs() < 1e-6);
    }
    assert!((normal_cdf(1.0) - 0.841_344_746).abs() < 1e-6);
}

#[test]
fn test_capture_probability_bounds() {
    // one sigma inside the capture radius is the classic 68% band
    assert!((gaussian_capture_probability(1.0, 1.0) - 0.682_689_49).abs() < 1e-6);
    assert!((gaussian_capture_probability(2.0, 0.0) - 1.0).abs() < f64::EPSILON);
    assert!(gaussian_capture_probability(0.0, 1.0).abs() < f64::EPSILON);
    assert!(gaussian_capture_probability(1.0, 100.0) < 0.01);
}

#[test]
fn test_backoff_is_capped() {
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(60);
    assert_eq!(capped_backoff(base, max, 0), Duration::from_secs(1));
    assert_eq!(capped_backoff(base, max, 3), Duration::from_secs(8));
    assert_eq!(capped_backoff(base, max, 10), max);
    assert_eq!(capped_backoff(base, max, 200), max);
}

#[test]
fn test_vec3_geometry() {
    let e: Vec3<f64> = Vec3::zero();
    let t = Vec3::new(3.0_f64, 4.0, 0.0);
    assert!((e.euclid_distance(&t) - 5.0).abs() < 1e-12);
    let up = Vec3::new(1.0_f64, 0.0, 1.0);
    assert!((up.elevation_deg() - 45.0).abs() < 1e-9);
    assert!((Vec3::new(0.0_f64, 1.0, 0.0).azimuth_deg() - 90.0).abs() < 1e-9);
    assert!(((t * 2.0).abs() - 10.0).abs() < 1e-12);
    assert_eq!(e.to(&t) + e, t);
    assert!(!Vec3::new(f64::NAN, 0.0, 0.0).is_finite());
}

#[test]
fn test_covariance_psd_check() {
    let diag = Mat3::diagonal([1.0, 2.0, 0.0]);
    assert!(diag.is_positive_semidefinite(1e-9));

    let correlated = Mat3::new([[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 1.0]]);
    assert!(correlated.is_positive_semidefinite(1e-9));

    let negative_var = Mat3::diagonal([1.0, -0.5, 1.0]);
    assert!(!negative_var.is_positive_semidefinite(1e-9));

    let asymmetric = Mat3::new([[1.0, 0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    assert!(!asymmetric.is_positive_semidefinite(1e-9));

    // all leading minors vanish, but the (0,2) principal minor is negative
    let hidden = Mat3::new([[0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
    assert!(!hidden.is_positive_semidefinite(1e-9));
}

#[test]
fn test_matrix_ops() {
    let a: Mat3<f64> = Mat3::new([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]]);
    assert!((a.determinant() + 3.0).abs() < 1e-9);
    assert!(((a + a).trace() - 32.0).abs() < 1e-12);
    assert_eq!(a + a, a.scale(2.0));
}
