//! # Group V2 Engine
//!
//! **Edit and reconciliation engine for encrypted, server-sequenced groups.**
//!
//! A group's membership and metadata live on an authoritative server as a
//! chain of signed, encrypted changes, one per revision. This crate keeps a
//! local snapshot in step with that chain:
//!
//! - **Edits** are recorded as intents in a per-group session, diffed against
//!   the local snapshot, sealed and submitted in a single round trip
//! - **Responses and remote pushes** are verified and applied strictly in
//!   revision order through one compare-and-set write path
//! - **Conflicts** surface to the caller; the engine never retries on its own
//!
//! ## Quick Start
//!
//! ```rust
//! use groupv2::{EngineConfig, GroupMasterKey};
//!
//! let config = EngineConfig::from_json(r#"{ "max_group_size": 100 }"#).unwrap();
//! assert_eq!(config.max_title_chars, 32);
//!
//! let master_key = GroupMasterKey::generate();
//! assert!(master_key.group_id().is_v2());
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ids`] | Group ids, master keys, account ids, profile-key commitments |
//! | [`model`] | Group snapshot, members, roles, access control, invariants |
//! | [`change`] | Action taxonomy, plaintext/signed changes, proposals |
//! | [`apply`] | Pure change application |
//! | [`events`] | Domain events and the broadcast bus |
//! | [`crypto`] | Change sealing, server signatures, `ChangeCodec` |
//! | [`store`] | Local group store contract and in-memory store |
//! | [`encoder`] | Intents to sealed proposal plus predicted snapshot |
//! | [`server`] | Server group client contract |
//! | [`reconciler`] | Ordered, verified application of authoritative changes |
//! | [`editor`] | `GroupEditor`, edit sessions, per-group locks |
//! | [`config`] | Engine configuration |
//! | [`limits`] | Hard guardrails |

#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Identifiers and key material.
pub mod ids;

/// Group snapshot and invariant checks.
pub mod model;

/// Group changes and their wire forms.
pub mod change;

/// Applying a change to a snapshot.
pub mod apply;

/// Domain events for applied changes.
pub mod events;

/// Sealing, signing and the change codec.
pub mod crypto;

/// Local group persistence.
pub mod store;

/// Turning edit intents into proposals.
pub mod encoder;

/// Server round-trip contract.
pub mod server;

/// Applying authoritative changes to the store.
pub mod reconciler;

/// Edit sessions and per-group locking.
pub mod editor;

pub mod config;
pub mod limits;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use change::{DecryptedGroupChange, GroupAction, GroupChangeProposal, SignedGroupChange};
pub use config::{ConfigError, EngineConfig};
pub use crypto::{ChangeCodec, CodecError, SealedChangeCodec};
pub use editor::{
    EditSession, EditState, GroupChangeError, GroupChangeFailureReason, GroupChangeOutcome,
    GroupEditor, GroupLockGuard, GroupLocks,
};
pub use encoder::{EditIntent, GroupCandidate};
pub use events::{EventBus, GroupEvent, GroupEventKind};
pub use ids::{Aci, GroupId, GroupMasterKey, ProfileKeyCommitment};
pub use model::{
    AccessControl, AccessRequired, DecryptedGroup, Member, PendingMember, RequestingMember, Role,
};
pub use reconciler::{ChangeReconciler, ReconcileError, ReconcileOutcome};
pub use server::{GroupChangeResponse, GroupServer, ServerError};
pub use store::{GroupStore, MemoryGroupStore, StoreError, StoredGroup};

// ── Library metadata ────────────────────────────────────────────────────────

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }
}
