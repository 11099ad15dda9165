pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod migration;
pub mod scheduler;
pub mod workflow;

// Re-exports
pub use cluster::{ClusterApi, ProxmoxClient};
pub use errors::{BalancerError, BalancerResult};
pub use scheduler::{MigrationPlan, Planner};
pub use workflow::{Balancer, RunOptions, RunReport};
