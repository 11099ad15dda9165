pub mod planner;
pub mod ranking;

pub use planner::{HostAssignment, MigrationPlan, Planner};
pub use ranking::rank_destinations;
