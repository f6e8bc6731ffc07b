use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CipherSuite, ConversationId, ConversationKind, Epoch, GroupLifecycleState, SubconversationId,
    UserId,
};

/// Error body the backend attaches to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolTag {
    Proteus,
    Mls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub protocol: ProtocolTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id_b64: Option<String>,
    #[serde(default)]
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_state: Option<GroupLifecycleState>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfoResponse {
    pub group_info_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubconversationResponse {
    pub parent: ConversationId,
    pub id: SubconversationId,
    pub group_id_b64: String,
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<u16>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Guard carried by destructive calls so the server can reject a caller
/// acting on an outdated view of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGuard {
    pub group_id_b64: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub name: String,
    pub kind: ConversationKind,
    pub protocol: ProtocolTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<u16>,
    /// Initial member list. Must be empty for MLS creation; the server
    /// rejects MLS conversations created with members.
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberChangeRequest {
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemberChangeResponse {
    Unchanged,
    Changed { event_time: DateTime<Utc> },
}

impl ConversationResponse {
    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch)
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite.map(CipherSuite)
    }
}

impl SubconversationResponse {
    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch)
    }
}
