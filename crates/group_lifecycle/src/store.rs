use async_trait::async_trait;
use shared::{
    domain::{ConversationId, ConversationKind, GroupLifecycleState, ProtocolInfo, UserId},
    error::StorageFailure,
    protocol::ConversationResponse,
};

/// Local conversation metadata store.
///
/// Epochs never move backwards through this interface: implementations
/// clamp an incoming epoch to the maximum of the stored and offered
/// values when applying remote state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn protocol_info(
        &self,
        conversation: &ConversationId,
    ) -> Result<ProtocolInfo, StorageFailure>;

    async fn set_protocol_info(
        &self,
        conversation: &ConversationId,
        info: &ProtocolInfo,
    ) -> Result<(), StorageFailure>;

    async fn set_group_state(
        &self,
        conversation: &ConversationId,
        state: GroupLifecycleState,
    ) -> Result<(), StorageFailure>;

    async fn kind(&self, conversation: &ConversationId)
        -> Result<ConversationKind, StorageFailure>;

    async fn members(&self, conversation: &ConversationId) -> Result<Vec<UserId>, StorageFailure>;

    async fn set_members(
        &self,
        conversation: &ConversationId,
        members: &[UserId],
    ) -> Result<(), StorageFailure>;

    async fn conversations_by_group_state(
        &self,
        state: GroupLifecycleState,
    ) -> Result<Vec<ConversationId>, StorageFailure>;

    /// Inserts a conversation that does not exist locally yet.
    async fn insert_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure>;

    /// Overlays freshly fetched remote state onto the local record,
    /// swapping the group id and clamping the epoch in one step.
    async fn apply_remote_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure>;
}
