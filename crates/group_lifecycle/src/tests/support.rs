//! Hand-rolled trait doubles shared by the per-module test suites.

use std::collections::{HashMap, VecDeque};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        CipherSuite, ConversationId, ConversationKind, Epoch, GroupId, GroupLifecycleState,
        ProtocolInfo, SubconversationId, UserId,
    },
    error::{CoreFailure, NetworkFailure, StorageFailure},
    protocol::{
        ConversationResponse, CreateConversationRequest, GroupGuard, MemberChangeResponse,
        ProtocolTag, SubconversationResponse,
    },
};
use tokio::sync::Mutex;

use crate::{
    gateway::ConversationGateway, provider::MlsGroupProvider, store::ConversationStore,
};

pub fn convo(value: &str) -> ConversationId {
    ConversationId::new(value, "alpha.example")
}

pub fn user(value: &str) -> UserId {
    UserId::new(value, "alpha.example")
}

pub fn group(value: &str) -> GroupId {
    GroupId(value.to_string())
}

pub fn sub(value: &str) -> SubconversationId {
    SubconversationId(value.to_string())
}

pub fn stale_epoch() -> CoreFailure {
    NetworkFailure::StaleEpoch.into()
}

pub fn no_connection() -> CoreFailure {
    NetworkFailure::NoConnection(anyhow!("socket refused")).into()
}

pub fn missing_key_packages(values: &[&str]) -> CoreFailure {
    CoreFailure::MissingKeyPackages(values.iter().map(|value| user(value)).collect())
}

pub fn mls_info(group_id: &str, state: GroupLifecycleState, epoch: u64) -> ProtocolInfo {
    ProtocolInfo::Mls {
        group_id: group(group_id),
        group_state: state,
        epoch: Epoch(epoch),
        cipher_suite: CipherSuite(1),
        keying_material_last_update: Utc::now(),
    }
}

pub fn mls_response(value: &str, group_id: &str, epoch: u64) -> ConversationResponse {
    ConversationResponse {
        id: convo(value),
        kind: ConversationKind::Group,
        protocol: ProtocolTag::Mls,
        group_id_b64: Some(group_id.to_string()),
        epoch,
        cipher_suite: Some(1),
        group_state: None,
        members: Vec::new(),
    }
}

pub fn sub_response(
    parent: &ConversationId,
    subconversation: &SubconversationId,
    group_id: &str,
    epoch: u64,
    epoch_timestamp: Option<DateTime<Utc>>,
    members: Vec<UserId>,
) -> SubconversationResponse {
    SubconversationResponse {
        parent: parent.clone(),
        id: subconversation.clone(),
        group_id_b64: group_id.to_string(),
        epoch,
        epoch_timestamp,
        cipher_suite: Some(1),
        members,
    }
}

/// A valid group-info prefix: version, cipher suite, one-byte-length
/// group id, then the epoch in big-endian.
pub fn sample_group_info(group_id: &[u8], epoch: u64) -> Vec<u8> {
    assert!(group_id.len() < 64, "sample uses the one-byte length form");
    let mut data = vec![0, 1, 0, 1];
    data.push(group_id.len() as u8);
    data.extend_from_slice(group_id);
    data.extend_from_slice(&epoch.to_be_bytes());
    data
}

/// `MlsGroupProvider` double recording every call, with scripted
/// failure queues. An empty queue means the call succeeds.
pub struct RecordingProvider {
    pub epoch: Epoch,
    pub welcome_group: GroupId,
    pub out_of_sync: Mutex<HashMap<GroupId, bool>>,
    pub create_results: Mutex<VecDeque<Result<(), CoreFailure>>>,
    pub join_results: Mutex<VecDeque<Result<(), CoreFailure>>>,
    pub wipe_results: Mutex<VecDeque<Result<(), CoreFailure>>>,
    pub created: Mutex<Vec<(GroupId, Vec<UserId>)>>,
    pub joined: Mutex<Vec<(GroupId, Vec<u8>)>>,
    pub added: Mutex<Vec<(GroupId, Vec<UserId>)>>,
    pub removed: Mutex<Vec<(GroupId, Vec<UserId>)>>,
    pub wiped: Mutex<Vec<GroupId>>,
    pub processed_welcomes: Mutex<Vec<Vec<u8>>>,
    pub sync_checks: Mutex<Vec<(GroupId, Epoch)>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            epoch: Epoch(1),
            welcome_group: group("welcome-group"),
            out_of_sync: Mutex::new(HashMap::new()),
            create_results: Mutex::new(VecDeque::new()),
            join_results: Mutex::new(VecDeque::new()),
            wipe_results: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            wiped: Mutex::new(Vec::new()),
            processed_welcomes: Mutex::new(Vec::new()),
            sync_checks: Mutex::new(Vec::new()),
        }
    }

    pub async fn script_join(&self, results: Vec<Result<(), CoreFailure>>) {
        self.join_results.lock().await.extend(results);
    }

    pub async fn script_create(&self, results: Vec<Result<(), CoreFailure>>) {
        self.create_results.lock().await.extend(results);
    }

    pub async fn mark_out_of_sync(&self, group_id: &GroupId) {
        self.out_of_sync.lock().await.insert(group_id.clone(), true);
    }
}

#[async_trait]
impl MlsGroupProvider for RecordingProvider {
    async fn create_group(&self, group_id: &GroupId, members: &[UserId]) -> Result<(), CoreFailure> {
        self.created
            .lock()
            .await
            .push((group_id.clone(), members.to_vec()));
        self.create_results.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn join_by_external_commit(
        &self,
        group_id: &GroupId,
        group_info: &[u8],
    ) -> Result<(), CoreFailure> {
        self.joined
            .lock()
            .await
            .push((group_id.clone(), group_info.to_vec()));
        self.join_results.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn add_members(&self, group_id: &GroupId, members: &[UserId]) -> Result<(), CoreFailure> {
        self.added
            .lock()
            .await
            .push((group_id.clone(), members.to_vec()));
        Ok(())
    }

    async fn remove_members(
        &self,
        group_id: &GroupId,
        members: &[UserId],
    ) -> Result<(), CoreFailure> {
        self.removed
            .lock()
            .await
            .push((group_id.clone(), members.to_vec()));
        Ok(())
    }

    async fn process_welcome(&self, welcome: &[u8]) -> Result<GroupId, CoreFailure> {
        self.processed_welcomes.lock().await.push(welcome.to_vec());
        Ok(self.welcome_group.clone())
    }

    async fn current_epoch(&self, _group_id: &GroupId) -> Result<Epoch, CoreFailure> {
        Ok(self.epoch)
    }

    async fn is_group_out_of_sync(
        &self,
        group_id: &GroupId,
        epoch: Epoch,
    ) -> Result<bool, CoreFailure> {
        self.sync_checks.lock().await.push((group_id.clone(), epoch));
        Ok(*self
            .out_of_sync
            .lock()
            .await
            .get(group_id)
            .unwrap_or(&false))
    }

    async fn wipe_group(&self, group_id: &GroupId) -> Result<(), CoreFailure> {
        self.wiped.lock().await.push(group_id.clone());
        self.wipe_results.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

fn unscripted(endpoint: &str) -> NetworkFailure {
    NetworkFailure::ServerError {
        status: 404,
        label: "unscripted".to_string(),
        message: format!("no stubbed response for {endpoint}"),
    }
}

/// `ConversationGateway` double with per-endpoint response queues and
/// call recorders.
pub struct StubGateway {
    pub conversation: Mutex<Option<ConversationResponse>>,
    pub conversation_fetches: Mutex<u32>,
    pub group_info_results: Mutex<VecDeque<Result<Vec<u8>, NetworkFailure>>>,
    pub sub_details: Mutex<VecDeque<Result<SubconversationResponse, NetworkFailure>>>,
    pub sub_group_info: Mutex<VecDeque<Result<Vec<u8>, NetworkFailure>>>,
    pub sub_group_info_fetches: Mutex<u32>,
    pub deleted_subconversations: Mutex<Vec<(ConversationId, SubconversationId, GroupGuard)>>,
    pub left_subconversations: Mutex<Vec<(ConversationId, SubconversationId)>>,
    pub resets: Mutex<Vec<(ConversationId, GroupGuard)>>,
    pub reset_results: Mutex<VecDeque<Result<(), NetworkFailure>>>,
    pub created: Mutex<Vec<CreateConversationRequest>>,
    pub create_response: Mutex<Option<ConversationResponse>>,
    pub added_members: Mutex<Vec<(ConversationId, Vec<UserId>)>>,
    pub add_member_results: Mutex<VecDeque<Result<MemberChangeResponse, NetworkFailure>>>,
    pub removed_members: Mutex<Vec<(ConversationId, UserId)>>,
    pub remove_member_results: Mutex<VecDeque<Result<MemberChangeResponse, NetworkFailure>>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            conversation: Mutex::new(None),
            conversation_fetches: Mutex::new(0),
            group_info_results: Mutex::new(VecDeque::new()),
            sub_details: Mutex::new(VecDeque::new()),
            sub_group_info: Mutex::new(VecDeque::new()),
            sub_group_info_fetches: Mutex::new(0),
            deleted_subconversations: Mutex::new(Vec::new()),
            left_subconversations: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            reset_results: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            create_response: Mutex::new(None),
            added_members: Mutex::new(Vec::new()),
            add_member_results: Mutex::new(VecDeque::new()),
            removed_members: Mutex::new(Vec::new()),
            remove_member_results: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn set_conversation(&self, response: ConversationResponse) {
        *self.conversation.lock().await = Some(response);
    }

    pub async fn script_sub_details(
        &self,
        results: Vec<Result<SubconversationResponse, NetworkFailure>>,
    ) {
        self.sub_details.lock().await.extend(results);
    }

    pub async fn script_sub_group_info(&self, results: Vec<Result<Vec<u8>, NetworkFailure>>) {
        self.sub_group_info.lock().await.extend(results);
    }
}

#[async_trait]
impl ConversationGateway for StubGateway {
    async fn fetch_conversation(
        &self,
        _conversation: &ConversationId,
    ) -> Result<ConversationResponse, NetworkFailure> {
        *self.conversation_fetches.lock().await += 1;
        self.conversation
            .lock()
            .await
            .clone()
            .ok_or_else(|| unscripted("conversation"))
    }

    async fn fetch_group_info(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<u8>, NetworkFailure> {
        self.group_info_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(sample_group_info(b"grp", 5)))
    }

    async fn fetch_subconversation_details(
        &self,
        _conversation: &ConversationId,
        _subconversation: &SubconversationId,
    ) -> Result<SubconversationResponse, NetworkFailure> {
        self.sub_details
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("subconversation details")))
    }

    async fn fetch_subconversation_group_info(
        &self,
        _conversation: &ConversationId,
        _subconversation: &SubconversationId,
    ) -> Result<Vec<u8>, NetworkFailure> {
        *self.sub_group_info_fetches.lock().await += 1;
        self.sub_group_info
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(b"sub-group-info".to_vec()))
    }

    async fn delete_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure> {
        self.deleted_subconversations.lock().await.push((
            conversation.clone(),
            subconversation.clone(),
            guard.clone(),
        ));
        Ok(())
    }

    async fn leave_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<(), NetworkFailure> {
        self.left_subconversations
            .lock()
            .await
            .push((conversation.clone(), subconversation.clone()));
        Ok(())
    }

    async fn reset_conversation(
        &self,
        conversation: &ConversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure> {
        self.resets
            .lock()
            .await
            .push((conversation.clone(), guard.clone()));
        self.reset_results.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, NetworkFailure> {
        self.created.lock().await.push(request.clone());
        self.create_response
            .lock()
            .await
            .clone()
            .ok_or_else(|| unscripted("create conversation"))
    }

    async fn add_member(
        &self,
        conversation: &ConversationId,
        users: &[UserId],
    ) -> Result<MemberChangeResponse, NetworkFailure> {
        self.added_members
            .lock()
            .await
            .push((conversation.clone(), users.to_vec()));
        self.add_member_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Ok(MemberChangeResponse::Changed {
                    event_time: Utc::now(),
                })
            })
    }

    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<MemberChangeResponse, NetworkFailure> {
        self.removed_members
            .lock()
            .await
            .push((conversation.clone(), user.clone()));
        self.remove_member_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Ok(MemberChangeResponse::Changed {
                    event_time: Utc::now(),
                })
            })
    }
}

pub struct StoredConversation {
    pub kind: ConversationKind,
    pub info: ProtocolInfo,
    pub members: Vec<UserId>,
}

/// In-memory `ConversationStore` with the same epoch-clamp and
/// reset-state semantics as the SQLite implementation.
pub struct MemoryStore {
    pub records: Mutex<Vec<(ConversationId, StoredConversation)>>,
    pub fail_listing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_listing: false,
        }
    }

    pub async fn seed(
        &self,
        conversation: ConversationId,
        kind: ConversationKind,
        info: ProtocolInfo,
        members: Vec<UserId>,
    ) {
        self.records
            .lock()
            .await
            .push((conversation, StoredConversation { kind, info, members }));
    }

    pub async fn stored_info(&self, conversation: &ConversationId) -> ProtocolInfo {
        self.records
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == conversation)
            .map(|(_, record)| record.info.clone())
            .expect("conversation seeded")
    }

    pub async fn stored_members(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.records
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == conversation)
            .map(|(_, record)| record.members.clone())
            .expect("conversation seeded")
    }
}

fn response_info(response: &ConversationResponse) -> ProtocolInfo {
    match response.protocol {
        ProtocolTag::Proteus => ProtocolInfo::Proteus,
        ProtocolTag::Mls => ProtocolInfo::Mls {
            group_id: GroupId(response.group_id_b64.clone().unwrap_or_default()),
            group_state: response
                .group_state
                .unwrap_or(GroupLifecycleState::PendingJoin),
            epoch: Epoch(response.epoch),
            cipher_suite: CipherSuite(response.cipher_suite.unwrap_or(0)),
            keying_material_last_update: Utc::now(),
        },
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn protocol_info(
        &self,
        conversation: &ConversationId,
    ) -> Result<ProtocolInfo, StorageFailure> {
        self.records
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == conversation)
            .map(|(_, record)| record.info.clone())
            .ok_or(StorageFailure::NotFound)
    }

    async fn set_protocol_info(
        &self,
        conversation: &ConversationId,
        info: &ProtocolInfo,
    ) -> Result<(), StorageFailure> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|(id, _)| id == conversation)
            .ok_or(StorageFailure::NotFound)?;
        record.1.info = info.clone();
        Ok(())
    }

    async fn set_group_state(
        &self,
        conversation: &ConversationId,
        state: GroupLifecycleState,
    ) -> Result<(), StorageFailure> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|(id, _)| id == conversation)
            .ok_or(StorageFailure::NotFound)?;
        match &mut record.1.info {
            ProtocolInfo::Mls { group_state, .. } => {
                *group_state = state;
                Ok(())
            }
            ProtocolInfo::Proteus => Err(StorageFailure::NotFound),
        }
    }

    async fn kind(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationKind, StorageFailure> {
        self.records
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == conversation)
            .map(|(_, record)| record.kind)
            .ok_or(StorageFailure::NotFound)
    }

    async fn members(&self, conversation: &ConversationId) -> Result<Vec<UserId>, StorageFailure> {
        self.records
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == conversation)
            .map(|(_, record)| record.members.clone())
            .ok_or(StorageFailure::NotFound)
    }

    async fn set_members(
        &self,
        conversation: &ConversationId,
        members: &[UserId],
    ) -> Result<(), StorageFailure> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|(id, _)| id == conversation)
            .ok_or(StorageFailure::NotFound)?;
        record.1.members = members.to_vec();
        Ok(())
    }

    async fn conversations_by_group_state(
        &self,
        state: GroupLifecycleState,
    ) -> Result<Vec<ConversationId>, StorageFailure> {
        if self.fail_listing {
            return Err(StorageFailure::Generic(anyhow!("listing unavailable")));
        }
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|(_, record)| {
                matches!(&record.info, ProtocolInfo::Mls { group_state, .. } if *group_state == state)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn insert_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure> {
        self.records.lock().await.push((
            response.id.clone(),
            StoredConversation {
                kind: response.kind,
                info: response_info(response),
                members: response.members.clone(),
            },
        ));
        Ok(())
    }

    async fn apply_remote_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure> {
        let incoming = response_info(response);
        let mut records = self.records.lock().await;
        let Some(record) = records.iter_mut().find(|(id, _)| id == &response.id) else {
            records.push((
                response.id.clone(),
                StoredConversation {
                    kind: response.kind,
                    info: incoming,
                    members: response.members.clone(),
                },
            ));
            return Ok(());
        };

        let merged = match (&record.1.info, incoming) {
            (
                ProtocolInfo::Mls {
                    group_id: stored_group,
                    group_state: stored_state,
                    epoch: stored_epoch,
                    keying_material_last_update,
                    ..
                },
                ProtocolInfo::Mls {
                    group_id,
                    group_state,
                    epoch,
                    cipher_suite,
                    ..
                },
            ) => {
                let same_group = *stored_group == group_id;
                let epoch = if same_group {
                    (*stored_epoch).max(epoch)
                } else {
                    epoch
                };
                let group_state = match (response.group_state, stored_state) {
                    (Some(explicit), _) => explicit,
                    (None, GroupLifecycleState::PendingAfterReset) => {
                        GroupLifecycleState::PendingJoin
                    }
                    (None, stored) if same_group => *stored,
                    (None, _) => group_state,
                };
                ProtocolInfo::Mls {
                    group_id,
                    group_state,
                    epoch,
                    cipher_suite,
                    keying_material_last_update: *keying_material_last_update,
                }
            }
            (_, incoming) => incoming,
        };

        record.1.kind = response.kind;
        record.1.info = merged;
        record.1.members = response.members.clone();
        Ok(())
    }
}
