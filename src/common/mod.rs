pub(crate) mod math;
pub(crate) mod matrix;
pub(crate) mod vec3;
#[cfg(test)]
mod tests;

pub use matrix::Mat3;
pub use vec3::Vec3;
