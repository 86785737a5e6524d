use num::traits::{Float, Num, NumCast};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::{Add, Mul};

/// A 3D vector generic over any numeric type.
///
/// Positions are expressed in a local east-north-up frame in meters, velocities in m/s
/// and accelerations in m/s².
///
/// # Type Parameters
/// * `T` - The functionality for the vector depends on traits implemented by `T`.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Vec3<T> {
    /// The x-component (east) of the vector.
    x: T,
    /// The y-component (north) of the vector.
    y: T,
    /// The z-component (up) of the vector.
    z: T,
}

impl<T: Copy> Vec3<T> {
    /// Creates a new vector with the given components.
    pub const fn new(x: T, y: T, z: T) -> Self { Self { x, y, z } }

    pub const fn x(&self) -> T { self.x }

    pub const fn y(&self) -> T { self.y }

    pub const fn z(&self) -> T { self.z }
}

impl<T: Num + NumCast + Copy> Vec3<T> {
    /// The null vector.
    pub fn zero() -> Self { Self::new(T::zero(), T::zero(), T::zero()) }

    /// Creates a vector pointing from the current vector (`self`) to another vector (`other`).
    pub fn to(&self, other: &Vec3<T>) -> Vec3<T> {
        Vec3::new(other.x - self.x, other.y - self.y, other.z - self.z)
    }
}

impl<T: Float> Vec3<T> {
    /// Computes the magnitude (absolute value) of the vector.
    pub fn abs(&self) -> T { (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt() }

    /// Magnitude of the projection onto the horizontal (x/y) plane.
    pub fn horizontal_abs(&self) -> T { (self.x.powi(2) + self.y.powi(2)).sqrt() }

    /// Computes the Euclidean distance between the current vector and another vector.
    pub fn euclid_distance(&self, other: &Self) -> T { self.to(other).abs() }

    /// `true` if no component is `NaN` or infinite.
    pub fn is_finite(&self) -> bool { self.x.is_finite() && self.y.is_finite() && self.z.is_finite() }

    /// Azimuth of the vector in degrees, measured counter-clockwise from the x-axis.
    pub fn azimuth_deg(&self) -> T { self.y.atan2(self.x).to_degrees() }

    /// Elevation of the vector above the horizontal plane in degrees.
    pub fn elevation_deg(&self) -> T { self.z.atan2(self.horizontal_abs()).to_degrees() }
}

impl<T: Add<Output = T>> Add for Vec3<T> {
    type Output = Vec3<T>;

    fn add(self, rhs: Self) -> Self::Output {
        Self { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for Vec3<T> {
    type Output = Vec3<T>;

    fn mul(self, rhs: T) -> Self::Output {
        Self { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}

impl<T: Display> Display for Vec3<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

impl<T: Copy> From<(T, T, T)> for Vec3<T> {
    fn from(tuple: (T, T, T)) -> Self { Self::new(tuple.0, tuple.1, tuple.2) }
}
