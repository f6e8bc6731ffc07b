use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identifier qualified by the backend domain that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub value: String,
    pub domain: String,
}

impl ConversationId {
    pub fn new(value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            domain: domain.into(),
        }
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.value, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId {
    pub value: String,
    pub domain: String,
}

impl UserId {
    pub fn new(value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            domain: domain.into(),
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.value, self.domain)
    }
}

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(SubconversationId);
opaque_id!(GroupId);

/// Group epoch. Zero means the group has not been established yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const UNINITIALIZED: Epoch = Epoch(0);

    pub fn is_uninitialized(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IANA-registered ciphersuite tag, carried through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CipherSuite(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    SelfConversation,
    OneOnOne,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLifecycleState {
    PendingCreation,
    PendingJoin,
    PendingWelcomeMessage,
    PendingAfterReset,
    Established,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolInfo {
    Proteus,
    Mls {
        group_id: GroupId,
        group_state: GroupLifecycleState,
        epoch: Epoch,
        cipher_suite: CipherSuite,
        keying_material_last_update: DateTime<Utc>,
    },
}

impl ProtocolInfo {
    pub fn is_mls(&self) -> bool {
        matches!(self, ProtocolInfo::Mls { .. })
    }

    pub fn mls_group_id(&self) -> Option<&GroupId> {
        match self {
            ProtocolInfo::Mls { group_id, .. } => Some(group_id),
            ProtocolInfo::Proteus => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subconversation {
    pub id: SubconversationId,
    pub parent: ConversationId,
    pub group_id: GroupId,
    pub epoch: Epoch,
    /// When the current epoch was entered, per the backend.
    pub epoch_timestamp: Option<DateTime<Utc>>,
}

/// Result of a membership mutation. `Changed` carries the server event time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberChangeOutcome {
    Unchanged,
    Changed(DateTime<Utc>),
}
