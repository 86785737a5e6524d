//! Intercept computation: turns a track estimate and the launcher's kinematics into a
//! signed, time-bounded [`FireSolution`].

mod effector_specs;
mod fire_solution;
mod lead_calculator;

pub use effector_specs::EffectorSpecs;
pub use fire_solution::{AuthTokenRef, ExpiredSolution, FireSolution, FireSolutionBody, SolutionId};
pub use lead_calculator::{InterceptEstimate, LeadCalculator, LeadError};
