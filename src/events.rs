/// Domain events emitted for every applied change.
///
/// Timeline rendering and notification dispatch live outside this crate;
/// they subscribe to the `EventBus` and receive one `GroupEvent` per
/// observable transition, carrying the old value, the new value and the
/// acting ACI.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ids::{Aci, GroupId};
use crate::model::{AccessRequired, Role};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupEvent {
    pub group_id: GroupId,
    /// Revision produced by the change that emitted this event.
    pub revision: u32,
    pub editor: Aci,
    pub kind: GroupEventKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum GroupEventKind {
    MemberAdded { aci: Aci, role: Role },
    MemberRemoved { aci: Aci },
    /// The editor removed itself.
    MemberLeft { aci: Aci },
    RoleChanged { aci: Aci, old: Role, new: Role },
    ProfileKeyChanged { aci: Aci },

    MemberInvited { aci: Aci, role: Role },
    InviteRevoked { aci: Aci },
    /// A pending member removed its own invite.
    InviteDeclined { aci: Aci },
    InviteAccepted { aci: Aci },

    JoinRequested { aci: Aci },
    JoinRequestDenied { aci: Aci },
    /// A requesting member withdrew its own request.
    JoinRequestCancelled { aci: Aci },
    JoinRequestApproved { aci: Aci, role: Role },

    TitleChanged { old: String, new: String },
    DescriptionChanged { old: String, new: String },
    AvatarChanged { old: String, new: String },
    DisappearingTimerChanged { old: u32, new: u32 },
    AttributesAccessChanged { old: AccessRequired, new: AccessRequired },
    MembershipAccessChanged { old: AccessRequired, new: AccessRequired },
    InviteLinkAccessChanged { old: AccessRequired, new: AccessRequired },
    InviteLinkPasswordReset,
    AnnouncementsOnlyChanged { old: bool, new: bool },

    /// The stored snapshot was replaced by a refetched one. Changes between
    /// the two revisions produce no individual events.
    Resynced { from: u32, to: u32 },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fan-out of applied-change events to any number of subscribers.
///
/// Subscribers that fall behind by more than the channel capacity observe
/// `RecvError::Lagged` and should refetch state.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<GroupEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.sender.subscribe()
    }

    /// Publish events in order. Having no subscriber is not an error.
    pub fn publish(&self, events: &[GroupEvent]) {
        for event in events {
            if self.sender.send(event.clone()).is_err() {
                log::debug!("No event subscribers; dropped {} event(s)", events.len());
                return;
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
