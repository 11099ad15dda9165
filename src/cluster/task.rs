use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker inside the id returned for HA managed guests. The HA manager
/// queues the real migration task later.
pub const HA_MIGRATE_MARKER: &str = ":hamigrate:";

/// Task types of actual guest migrations (VMs and containers).
pub const MIGRATE_MARKERS: [&str; 2] = [":qmigrate:", ":vzmigrate:"];

pub const SUCCESS_EXIT_STATUS: &str = "OK";

/// Task identifier (UPID), e.g.
/// `UPID:pve1:0000A1B2:01C0FFEE:65F0A0B0:qmigrate:100:root@pam:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(upid: impl Into<String>) -> Self {
        Self(upid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ha_placeholder(&self) -> bool {
        self.0.contains(HA_MIGRATE_MARKER)
    }

    pub fn is_migration(&self) -> bool {
        MIGRATE_MARKERS.iter().any(|m| self.0.contains(m))
    }

    /// Node the task runs on.
    pub fn node(&self) -> Option<&str> {
        let mut parts = self.0.split(':');
        if parts.next()? != "UPID" {
            return None;
        }
        parts.next().filter(|n| !n.is_empty())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(upid: String) -> Self {
        Self(upid)
    }
}
