/// Server group client contract.
///
/// The engine never talks to the network itself. The application supplies a
/// `GroupServer` that performs the `patchGroup` round trip: it submits a
/// sealed proposal bound to the revision the editor observed and returns the
/// change the server actually accepted. That returned change is authoritative
/// and may differ from the proposal (a different member auto-promoted, a
/// redundant action dropped).

use async_trait::async_trait;
use thiserror::Error;

use crate::change::{GroupChangeProposal, SignedGroupChange};
use crate::ids::GroupId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// `base_revision` is stale: another change already landed.
    #[error("Revision conflict: server is at revision {server_revision}")]
    Conflict { server_revision: u32 },

    /// Transport failure. The proposal may or may not have landed.
    #[error("Network error: {0}")]
    Network(String),

    /// The server does not consider the caller a member.
    #[error("Not a member of the group")]
    NotAMember,

    /// The caller is a member but lacks the role the change needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Group would exceed the server size limit")]
    GroupTooLarge,

    /// The proposal was malformed or failed server-side validation.
    #[error("Proposal rejected: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// What a successful `patch_group` returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupChangeResponse {
    /// The accepted change, sealed and signed by the server.
    pub group_change: SignedGroupChange,
}

// ---------------------------------------------------------------------------
// GroupServer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GroupServer: Send + Sync {
    /// Submit `proposal` against `proposal.base_revision`. Exactly one call
    /// per edit session; implementations must not retry on their own.
    async fn patch_group(
        &self,
        group_id: &GroupId,
        proposal: GroupChangeProposal,
    ) -> Result<GroupChangeResponse, ServerError>;
}
