//! Peer control messages carried in `graphics admin` records.

use std::fmt;

/// What a `graphics admin` record asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdminAction {
    /// Announces the sender's peer name.
    SetName,
    /// Maps a sender node onto a receiver node before a push.
    Map,
    /// Reply to a created node: sender ID and receiver ID.
    NodeMap,
    /// Asks for a dump of a subtree.
    PullSerial,
    /// Marks the end of a requested dump.
    DumpDone,
    /// Round-trip check.
    Ping,
    /// Answer to `Ping`.
    PingReply,
    /// Locks one node for the sender.
    Lock,
    /// Locks a subtree for the sender.
    LockBelow,
    /// Releases one node.
    Unlock,
    /// Releases a subtree.
    UnlockBelow,
    /// Sender's latest frame time in milliseconds.
    FrameTime,
}

impl AdminAction {
    /// Every action.
    pub const ALL: [Self; 12] = [
        Self::SetName,
        Self::Map,
        Self::NodeMap,
        Self::PullSerial,
        Self::DumpDone,
        Self::Ping,
        Self::PingReply,
        Self::Lock,
        Self::LockBelow,
        Self::Unlock,
        Self::UnlockBelow,
        Self::FrameTime,
    ];

    /// Name carried in the `action` field.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SetName => "set_name",
            Self::Map => "map",
            Self::NodeMap => "node_map",
            Self::PullSerial => "pull_serial",
            Self::DumpDone => "dump_done",
            Self::Ping => "ping",
            Self::PingReply => "ping_reply",
            Self::Lock => "lock",
            Self::LockBelow => "lock_below",
            Self::Unlock => "unlock",
            Self::UnlockBelow => "unlock_below",
            Self::FrameTime => "frame_time",
        }
    }

    /// Parses an `action` field.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique_and_parse() {
        for action in AdminAction::ALL {
            assert_eq!(AdminAction::from_name(action.name()), Some(action));
        }
        assert_eq!(AdminAction::from_name("reboot"), None);
    }
}
