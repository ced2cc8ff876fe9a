mod actions;
mod planner;

pub use actions::{ActionKind, ActionReason, ReconciliationAction};
pub use planner::{ReconcileContext, ReconciliationPlanner};
