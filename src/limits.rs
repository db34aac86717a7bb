/// Group guardrails.
///
/// Hard ceilings that no configuration can raise. `EngineConfig` supplies
/// the tunable values underneath them.

/// Absolute upper bound on members + pending invites.
pub const HARD_MAX_GROUP_SIZE: usize = 1_001;

/// Default size limit when the config does not set one.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 1_001;

/// Max title length in characters.
pub const MAX_TITLE_CHARS: usize = 32;

/// Max description length in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 480;

/// Invite-link password length in bytes.
pub const INVITE_LINK_PASSWORD_BYTES: usize = 16;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Size check result for a prospective group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSizeStatus {
    Ok,
    /// Over the configured limit.
    TooLarge { limit: usize },
}

/// Check a prospective member + invite count against `limit`, clamped to
/// the hard maximum.
pub fn check_group_size(occupied_slots: usize, limit: usize) -> GroupSizeStatus {
    let limit = limit.min(HARD_MAX_GROUP_SIZE);
    if occupied_slots > limit {
        GroupSizeStatus::TooLarge { limit }
    } else {
        GroupSizeStatus::Ok
    }
}
