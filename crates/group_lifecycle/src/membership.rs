use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{
        ConversationId, ConversationKind, GroupId, GroupLifecycleState, MemberChangeOutcome,
        ProtocolInfo, UserId,
    },
    error::CoreFailure,
    protocol::{CreateConversationRequest, MemberChangeResponse, ProtocolTag},
};
use tracing::{debug, info};

use crate::{gateway::ConversationGateway, provider::MlsGroupProvider, store::ConversationStore};

/// Membership mutations that branch on the conversation's protocol.
///
/// Proteus conversations change membership through the backend and
/// mirror the result locally; MLS conversations change membership
/// through group commits, which the backend observes on delivery.
pub struct MembershipManager {
    provider: Arc<dyn MlsGroupProvider>,
    gateway: Arc<dyn ConversationGateway>,
    store: Arc<dyn ConversationStore>,
    self_user: UserId,
}

impl MembershipManager {
    pub fn new(
        provider: Arc<dyn MlsGroupProvider>,
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<dyn ConversationStore>,
        self_user: UserId,
    ) -> Self {
        Self {
            provider,
            gateway,
            store,
            self_user,
        }
    }

    pub async fn add_members(
        &self,
        conversation: &ConversationId,
        users: &[UserId],
    ) -> Result<MemberChangeOutcome, CoreFailure> {
        match self.store.protocol_info(conversation).await? {
            ProtocolInfo::Proteus => {
                let response = self.gateway.add_member(conversation, users).await?;
                match response {
                    MemberChangeResponse::Unchanged => Ok(MemberChangeOutcome::Unchanged),
                    MemberChangeResponse::Changed { event_time } => {
                        let mut members = self.store.members(conversation).await?;
                        for user in users {
                            if !members.contains(user) {
                                members.push(user.clone());
                            }
                        }
                        self.store.set_members(conversation, &members).await?;
                        Ok(MemberChangeOutcome::Changed(event_time))
                    }
                }
            }
            ProtocolInfo::Mls { group_id, .. } => {
                info!(
                    conversation = %conversation,
                    group = %group_id,
                    users = users.len(),
                    "adding members over mls"
                );
                self.provider.add_members(&group_id, users).await?;
                Ok(MemberChangeOutcome::Changed(Utc::now()))
            }
        }
    }

    pub async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<MemberChangeOutcome, CoreFailure> {
        match self.store.protocol_info(conversation).await? {
            ProtocolInfo::Proteus => {
                let response = self.gateway.remove_member(conversation, user).await?;
                match response {
                    MemberChangeResponse::Unchanged => Ok(MemberChangeOutcome::Unchanged),
                    MemberChangeResponse::Changed { event_time } => {
                        let members: Vec<UserId> = self
                            .store
                            .members(conversation)
                            .await?
                            .into_iter()
                            .filter(|member| member != user)
                            .collect();
                        self.store.set_members(conversation, &members).await?;
                        Ok(MemberChangeOutcome::Changed(event_time))
                    }
                }
            }
            ProtocolInfo::Mls { group_id, .. } => {
                if *user == self.self_user {
                    self.leave_group(conversation, user, &group_id).await
                } else {
                    debug!(
                        conversation = %conversation,
                        group = %group_id,
                        "removing member over mls"
                    );
                    self.provider
                        .remove_members(&group_id, std::slice::from_ref(user))
                        .await?;
                    Ok(MemberChangeOutcome::Changed(Utc::now()))
                }
            }
        }
    }

    /// Creates a group conversation on the backend and locally. For
    /// MLS the member list is withheld from the create call (the
    /// server rejects it) and the group is established afterwards,
    /// with members recorded locally as a separate step.
    pub async fn create_group_conversation(
        &self,
        name: &str,
        members: &[UserId],
        protocol: ProtocolTag,
    ) -> Result<ConversationId, CoreFailure> {
        let request = CreateConversationRequest {
            name: name.to_string(),
            kind: ConversationKind::Group,
            protocol: protocol.clone(),
            cipher_suite: None,
            members: match protocol {
                ProtocolTag::Proteus => members.to_vec(),
                ProtocolTag::Mls => Vec::new(),
            },
        };

        let response = self.gateway.create_conversation(&request).await?;
        let conversation = response.id.clone();
        self.store.insert_conversation(&response).await?;

        match protocol {
            ProtocolTag::Proteus => {
                self.store.set_members(&conversation, members).await?;
            }
            ProtocolTag::Mls => {
                let group_id = response
                    .group_id_b64
                    .clone()
                    .map(GroupId)
                    .ok_or_else(|| {
                        CoreFailure::Unknown(anyhow::anyhow!(
                            "backend created mls conversation without group id"
                        ))
                    })?;
                self.store
                    .set_group_state(&conversation, GroupLifecycleState::PendingCreation)
                    .await?;
                self.provider.create_group(&group_id, members).await?;
                self.store
                    .set_group_state(&conversation, GroupLifecycleState::Established)
                    .await?;
                self.store.set_members(&conversation, members).await?;
                info!(
                    conversation = %conversation,
                    group = %group_id,
                    members = members.len(),
                    "created mls group conversation"
                );
            }
        }

        Ok(conversation)
    }

    async fn leave_group(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        group_id: &GroupId,
    ) -> Result<MemberChangeOutcome, CoreFailure> {
        info!(
            conversation = %conversation,
            group = %group_id,
            "removing self from mls conversation"
        );
        let response = self.gateway.remove_member(conversation, user).await?;
        self.provider.wipe_group(group_id).await?;
        match response {
            MemberChangeResponse::Unchanged => Ok(MemberChangeOutcome::Unchanged),
            MemberChangeResponse::Changed { event_time } => {
                Ok(MemberChangeOutcome::Changed(event_time))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
