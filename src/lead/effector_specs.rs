use serde::{Deserialize, Serialize};

/// Kinematic envelope of one net launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectorSpecs {
    pub effector_id: String,
    /// Muzzle speed of the net projectile in m/s.
    pub projectile_speed: f64,
    /// Radius around the aim point within which the net captures the target, in m.
    pub capture_radius: f64,
    /// Closest allowed intercept; nearer engagements endanger the crew.
    pub min_range: f64,
    pub max_range: f64,
    pub min_elevation_deg: f64,
    pub max_elevation_deg: f64,
    /// Targets faster than this cannot be captured by the net.
    pub max_target_speed: f64,
    /// Whether the launch speed can be commanded per shot.
    pub adjustable_speed: bool,
}

impl EffectorSpecs {
    /// Shoulder-fired net launcher used by the field teams.
    pub fn standard_net_launcher(effector_id: &str) -> Self {
        Self {
            effector_id: effector_id.to_string(),
            projectile_speed: 50.0,
            capture_radius: 2.0,
            min_range: 5.0,
            max_range: 150.0,
            min_elevation_deg: -10.0,
            max_elevation_deg: 80.0,
            max_target_speed: 30.0,
            adjustable_speed: false,
        }
    }
}
