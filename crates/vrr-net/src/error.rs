//! Error types for the OVS driver and kernel watcher.

use thiserror::Error;

/// Errors raised while shelling out to `ovs-vsctl` / `ovs-ofctl`, or while
/// talking to the kernel over rtnetlink.
#[derive(Error, Debug)]
pub enum OvsError {
    #[error("{tool} exited with status {status}: {stderr}")]
    CommandFailed {
        tool: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("failed to spawn {1}: {0}")]
    Spawn(#[source] std::io::Error, &'static str),

    #[error("bridge '{0}' not found")]
    BridgeNotFound(String),

    #[error("port '{0}' not found")]
    PortNotFound(String),

    #[error("malformed ovs-vsctl output: {0}")]
    MalformedOutput(String),

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("operation requires root privileges")]
    NotRoot,

    #[error("ovs-vswitchd is not running")]
    OvsNotRunning,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OvsError>;

impl OvsError {
    /// A short, human-actionable hint for operators reading logs.
    pub fn suggestion(&self) -> &'static str {
        match self {
            OvsError::NotRoot => "run as root or grant CAP_NET_ADMIN",
            OvsError::OvsNotRunning => "start OVS: systemctl start openvswitch-switch",
            OvsError::BridgeNotFound(_) => "check that the bridge has been created with AddBridge",
            OvsError::NamespaceNotFound(_) => "create the namespace with ip netns add",
            _ => "check ovs-vsctl/ovs-ofctl logs for more detail",
        }
    }

    /// True when retrying as root might resolve the failure.
    pub fn needs_root(&self) -> bool {
        matches!(self, OvsError::NotRoot)
    }

    pub fn needs_ovs(&self) -> bool {
        matches!(self, OvsError::OvsNotRunning)
    }
}

impl From<OvsError> for vrr_core::Error {
    fn from(err: OvsError) -> Self {
        vrr_core::Error::Driver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_root_needs_root() {
        let err = OvsError::NotRoot;
        assert!(err.needs_root());
        assert!(!err.needs_ovs());
    }

    #[test]
    fn command_failed_formats_stderr() {
        let err = OvsError::CommandFailed {
            tool: "ovs-vsctl",
            status: 1,
            stderr: "no such bridge".into(),
        };
        assert!(err.to_string().contains("no such bridge"));
    }
}
