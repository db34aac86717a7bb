//! Shared fixtures: an in-memory authoritative group server and helpers for
//! building clients against it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hex_literal::hex;

use groupv2::apply::apply_change;
use groupv2::crypto::{generate_keypair, sign_group_change};
use groupv2::{
    Aci, ChangeCodec, DecryptedGroup, DecryptedGroupChange, EngineConfig, GroupChangeProposal,
    GroupChangeResponse, GroupEditor, GroupId, GroupMasterKey, GroupServer, Member,
    MemoryGroupStore, ProfileKeyCommitment, Role, SealedChangeCodec, ServerError,
    SignedGroupChange,
};

pub const MASTER_KEY: [u8; 32] =
    hex!("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef");

pub const OTHER_MASTER_KEY: [u8; 32] =
    hex!("fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210");

type Transform = Box<dyn Fn(&DecryptedGroup, DecryptedGroupChange) -> DecryptedGroupChange + Send + Sync>;

type AcceptHook = Arc<dyn Fn(&GroupId, &SignedGroupChange) + Send + Sync>;

// ---------------------------------------------------------------------------
// TestGroupServer
// ---------------------------------------------------------------------------

/// Holds the authoritative copy of every group, sequences changes by
/// revision and signs what it accepts.
pub struct TestGroupServer {
    private_key: [u8; 32],
    public_key: [u8; 32],
    codec: SealedChangeCodec,
    state: Mutex<ServerState>,
}

#[derive(Default)]
struct ServerState {
    groups: HashMap<GroupId, (GroupMasterKey, DecryptedGroup)>,
    history: HashMap<GroupId, Vec<SignedGroupChange>>,
    fail_next: Option<ServerError>,
    transform: Option<Transform>,
    on_accept: Option<AcceptHook>,
    delay: Option<Duration>,
    corrupt_signatures: bool,
    calls: usize,
}

impl TestGroupServer {
    pub fn new() -> Arc<Self> {
        let (public_key, private_key) = generate_keypair();
        Arc::new(TestGroupServer {
            private_key,
            public_key,
            codec: SealedChangeCodec::new(public_key),
            state: Mutex::new(ServerState::default()),
        })
    }

    /// Codec a client needs to verify this server's changes.
    pub fn client_codec(&self) -> SealedChangeCodec {
        SealedChangeCodec::new(self.public_key)
    }

    pub fn create_group(&self, master_key: &GroupMasterKey, group: DecryptedGroup) -> GroupId {
        let group_id = master_key.group_id();
        let mut state = self.state.lock().unwrap();
        state.groups.insert(group_id, (master_key.clone(), group));
        state.history.insert(group_id, Vec::new());
        group_id
    }

    pub fn group(&self, group_id: &GroupId) -> Option<DecryptedGroup> {
        let state = self.state.lock().unwrap();
        state.groups.get(group_id).map(|(_, group)| group.clone())
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn fail_next(&self, err: ServerError) {
        self.state.lock().unwrap().fail_next = Some(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn set_transform<F>(&self, transform: F)
    where
        F: Fn(&DecryptedGroup, DecryptedGroupChange) -> DecryptedGroupChange + Send + Sync + 'static,
    {
        self.state.lock().unwrap().transform = Some(Box::new(transform));
    }

    /// Run `hook` with every accepted change before the response goes back,
    /// the way the update channel can beat the response to the client.
    pub fn set_on_accept<F>(&self, hook: F)
    where
        F: Fn(&GroupId, &SignedGroupChange) + Send + Sync + 'static,
    {
        self.state.lock().unwrap().on_accept = Some(Arc::new(hook));
    }

    pub fn corrupt_signatures(&self) {
        self.state.lock().unwrap().corrupt_signatures = true;
    }

    /// Every accepted change after `revision`, oldest first.
    pub fn changes_since(&self, group_id: &GroupId, revision: u32) -> Vec<SignedGroupChange> {
        let state = self.state.lock().unwrap();
        state
            .history
            .get(group_id)
            .map(|changes| {
                changes
                    .iter()
                    .filter(|c| self.revision_of(&state, group_id, c) > revision)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accept a change made by some other client, bypassing proposals.
    pub fn push_change(&self, group_id: &GroupId, change: DecryptedGroupChange) -> anyhow::Result<SignedGroupChange> {
        let mut state = self.state.lock().unwrap();
        let (master_key, current) = state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown group"))?;
        let (next, _) = apply_change(*group_id, &current, &change)?;
        let signed = self.seal_and_sign(&master_key, &change, false)?;
        state.groups.insert(*group_id, (master_key, next));
        state.history.entry(*group_id).or_default().push(signed.clone());
        Ok(signed)
    }

    fn seal_and_sign(
        &self,
        master_key: &GroupMasterKey,
        change: &DecryptedGroupChange,
        corrupt: bool,
    ) -> anyhow::Result<SignedGroupChange> {
        let sealed = self.codec.encrypt_change(master_key, change)?;
        let mut signed = sign_group_change(sealed, &self.private_key);
        if corrupt {
            signed.server_signature[0] ^= 0x01;
        }
        Ok(signed)
    }

    fn revision_of(&self, state: &ServerState, group_id: &GroupId, change: &SignedGroupChange) -> u32 {
        state
            .groups
            .get(group_id)
            .and_then(|(key, _)| self.codec.decrypt_change(key, &change.encrypted_actions).ok())
            .map(|c| c.revision)
            .unwrap_or(0)
    }
}

#[async_trait]
impl GroupServer for TestGroupServer {
    async fn patch_group(
        &self,
        group_id: &GroupId,
        proposal: GroupChangeProposal,
    ) -> Result<GroupChangeResponse, ServerError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (signed, on_accept) = self.accept(group_id, proposal)?;
        if let Some(hook) = on_accept {
            hook(group_id, &signed);
        }

        Ok(GroupChangeResponse {
            group_change: signed,
        })
    }
}

impl TestGroupServer {
    fn accept(
        &self,
        group_id: &GroupId,
        proposal: GroupChangeProposal,
    ) -> Result<(SignedGroupChange, Option<AcceptHook>), ServerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let (master_key, current) = state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| ServerError::Rejected("unknown group".into()))?;

        if proposal.base_revision != current.revision {
            return Err(ServerError::Conflict {
                server_revision: current.revision,
            });
        }

        let change = self
            .codec
            .decrypt_change(&master_key, &proposal.encrypted_actions)
            .map_err(|e| ServerError::Rejected(e.to_string()))?;
        if current.status_of(&change.editor) == groupv2::model::MembershipStatus::NotInGroup {
            return Err(ServerError::NotAMember);
        }

        let change = match &state.transform {
            Some(transform) => transform(&current, change),
            None => change,
        };
        let (next, _) = apply_change(*group_id, &current, &change)
            .map_err(|e| ServerError::Rejected(e.to_string()))?;

        let signed = self
            .seal_and_sign(&master_key, &change, state.corrupt_signatures)
            .map_err(|e| ServerError::Rejected(e.to_string()))?;
        state.groups.insert(*group_id, (master_key, next));
        state.history.entry(*group_id).or_default().push(signed.clone());

        Ok((signed, state.on_accept.clone()))
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

pub struct Client {
    pub aci: Aci,
    pub editor: GroupEditor,
    pub store: Arc<MemoryGroupStore>,
}

pub fn client(server: &Arc<TestGroupServer>, aci: Aci) -> Client {
    client_with_config(server, aci, EngineConfig::default())
}

pub fn client_with_config(server: &Arc<TestGroupServer>, aci: Aci, config: EngineConfig) -> Client {
    let store = Arc::new(MemoryGroupStore::new());
    let editor = GroupEditor::new(
        aci,
        store.clone(),
        server.clone(),
        Arc::new(server.client_codec()),
        config,
    )
    .expect("valid config");
    Client { aci, editor, store }
}

/// Create `group` on the server and give every client the same snapshot.
pub fn seed_group(
    server: &TestGroupServer,
    master_key: [u8; 32],
    group: DecryptedGroup,
    clients: &[&Client],
) -> GroupId {
    let master_key = GroupMasterKey::from_bytes(master_key);
    let group_id = server.create_group(&master_key, group.clone());
    for client in clients {
        assert!(client
            .editor
            .insert_group(master_key.clone(), group.clone())
            .expect("seed group"));
    }
    group_id
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn aci(n: u8) -> Aci {
    Aci::from_bytes([n; 16])
}

pub fn commitment(n: u8) -> ProfileKeyCommitment {
    ProfileKeyCommitment::from_bytes([n; 32])
}

pub fn member(n: u8, role: Role) -> Member {
    Member {
        aci: aci(n),
        role,
        joined_revision: 0,
        profile_key_commitment: commitment(n),
    }
}

pub fn group_at(revision: u32, members: Vec<Member>) -> DecryptedGroup {
    DecryptedGroup {
        revision,
        title: "Trail crew".into(),
        members,
        ..Default::default()
    }
}
