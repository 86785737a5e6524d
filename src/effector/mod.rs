//! Effector boundary: the session state machine that turns fire solutions into fire
//! commands, its driver and rules-of-engagement collaborators, and the inbox where
//! solutions wait to be consumed.

mod effector_driver;
mod effector_session;
mod engagement_report;
mod roe;
mod session_state;
mod solution_inbox;
#[cfg(test)]
mod tests;

pub use effector_driver::{
    DriverError, DriverSink, EffectorDriver, EffectorTelemetry, InertDriver, SimulatedNetLauncher,
};
pub use effector_session::{EffectorSession, SessionDeps, SessionError};
pub use engagement_report::{AbortReason, EngagementOutcome, EngagementReport, EngagementReportBody, ReportId};
pub use roe::{AuthToken, RoeReference, RoeViolation, StaticRoe};
pub use session_state::{SessionState, SessionTransition};
pub use solution_inbox::SolutionInbox;
