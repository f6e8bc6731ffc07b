use async_trait::async_trait;
use shared::{
    domain::{ConversationId, SubconversationId, UserId},
    error::NetworkFailure,
    protocol::{
        ConversationResponse, CreateConversationRequest, GroupGuard, MemberChangeResponse,
        SubconversationResponse,
    },
};

/// Backend REST surface for conversation state.
///
/// Group-info and welcome blobs cross this boundary as raw bytes; the
/// transport encoding (base64 in JSON bodies) is an implementation
/// detail of the gateway.
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    async fn fetch_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationResponse, NetworkFailure>;

    async fn fetch_group_info(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<u8>, NetworkFailure>;

    async fn fetch_subconversation_details(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<SubconversationResponse, NetworkFailure>;

    async fn fetch_subconversation_group_info(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<Vec<u8>, NetworkFailure>;

    async fn delete_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure>;

    async fn leave_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<(), NetworkFailure>;

    async fn reset_conversation(
        &self,
        conversation: &ConversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure>;

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, NetworkFailure>;

    async fn add_member(
        &self,
        conversation: &ConversationId,
        users: &[UserId],
    ) -> Result<MemberChangeResponse, NetworkFailure>;

    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<MemberChangeResponse, NetworkFailure>;
}
