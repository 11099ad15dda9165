mod settings;

pub use settings::{
    generate_default_config, ClusterSettings, MigrationSettings, PlannerSettings, Settings,
};
