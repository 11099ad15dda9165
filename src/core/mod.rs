pub mod ha;
pub mod node;
pub mod snapshot;
pub mod vm;

// exports for lazy devs like us
pub use ha::{HaGroup, HaIndex, HaResource, HaState};
pub use node::{Destination, Node};
pub use snapshot::ClusterSnapshot;
pub use vm::{GuestKind, Vm, VmPool, VmStatus};
