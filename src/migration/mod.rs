pub mod driver;
pub mod wait;

pub use driver::{DriverOptions, MigrationDriver, MigrationOutcome, MigrationState};
pub use wait::{WaitPolicy, Waiter};
