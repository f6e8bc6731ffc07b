use thiserror::Error;

use crate::domain::UserId;

/// Top-level failure type crossing the engine boundary. Failures are
/// values; nothing in the library panics on a bad backend or store.
#[derive(Debug, Error)]
pub enum CoreFailure {
    #[error(transparent)]
    Network(#[from] NetworkFailure),
    #[error(transparent)]
    Mls(#[from] MlsFailure),
    #[error("no key packages available for {0:?}")]
    MissingKeyPackages(Vec<UserId>),
    #[error(transparent)]
    Storage(#[from] StorageFailure),
    #[error("unknown failure")]
    Unknown(#[source] anyhow::Error),
}

impl CoreFailure {
    pub fn is_stale_epoch(&self) -> bool {
        matches!(self, CoreFailure::Network(NetworkFailure::StaleEpoch))
    }

    pub fn is_missing_group_info(&self) -> bool {
        matches!(self, CoreFailure::Network(NetworkFailure::MissingGroupInfo))
    }
}

/// Backend error labels that the engine recognizes and reacts to.
pub const LABEL_STALE_MESSAGE: &str = "mls-stale-message";
pub const LABEL_MISSING_GROUP_INFO: &str = "mls-missing-group-info";

#[derive(Debug, Error)]
pub enum NetworkFailure {
    /// The commit was produced against an epoch the server has moved past.
    #[error("commit rejected for stale epoch")]
    StaleEpoch,
    /// The server has no published group info for the group.
    #[error("no group info available")]
    MissingGroupInfo,
    #[error("no connection to backend")]
    NoConnection(#[source] anyhow::Error),
    #[error("server error {status}: {label}")]
    ServerError {
        status: u16,
        label: String,
        message: String,
    },
    #[error("federated backends unreachable: {0:?}")]
    FederatedBackendFailure(Vec<String>),
}

impl NetworkFailure {
    /// Maps a backend error body onto the recognized variants by label.
    pub fn from_server_error(status: u16, label: &str, message: &str) -> Self {
        match label {
            LABEL_STALE_MESSAGE => NetworkFailure::StaleEpoch,
            LABEL_MISSING_GROUP_INFO => NetworkFailure::MissingGroupInfo,
            _ => NetworkFailure::ServerError {
                status,
                label: label.to_string(),
                message: message.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum MlsFailure {
    #[error("unsupported proposal")]
    UnsupportedProposal,
    #[error("message for wrong epoch")]
    WrongEpoch,
    #[error("conversation does not support mls")]
    ConversationDoesNotSupportMls,
    #[error("mls operation failed")]
    Generic(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StorageFailure {
    #[error("record not found")]
    NotFound,
    #[error("storage operation failed")]
    Generic(#[source] anyhow::Error),
}
