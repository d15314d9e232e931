//! # Bridge configuration

use realmrpc::ChannelConfig;

/// What happens to host requests still waiting for the guest at teardown.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Fail them with [`Error::Terminated`](crate::Error::Terminated).
    #[default]
    Reject,
    /// Leave them unsettled forever.
    Abandon,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Label used in logs.
    pub name: String,
    pub pending_policy: PendingPolicy,
    pub channel: ChannelConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "plugin".to_string(),
            pending_policy: PendingPolicy::default(),
            channel: ChannelConfig::default(),
        }
    }
}
