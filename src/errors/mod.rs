use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Cluster Error: {0}")]
    ClusterError(#[from] ClusterError),

    #[error("Placement Error: {0}")]
    PlacementError(#[from] PlacementError),

    #[error("Wait Error: {0}")]
    WaitError(#[from] WaitError),

    #[error("Configuration Error: {0}")]
    ConfigError(#[from] config::ConfigError),
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API call {method} {path} returned {status}: {message}")]
    Api {
        method: &'static str,
        path: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Node not found in cluster: {0}")]
    UnknownNode(String),

    #[error("VM not found in cluster: {0}")]
    UnknownVm(u32),
}

#[derive(Error, Debug)]
pub enum PlacementError {
    /// Aggregate free memory across the destinations cannot hold the demand.
    #[error("Unable to evacuate, not enough RAM free: {needed} bytes needed, {free} bytes free")]
    InsufficientCapacity { needed: u64, free: u64 },

    #[error("List of nodes is too short: {}", .0.join(", "))]
    TooFewNodes(Vec<String>),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WaitError {
    #[error("gave up waiting after {waited:?}")]
    TimedOut { waited: Duration },

    #[error("wait cancelled")]
    Cancelled,
}

// Result type alias for convenience
pub type BalancerResult<T> = Result<T, BalancerError>;
