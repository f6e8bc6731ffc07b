use std::sync::Arc;

use shared::{
    domain::{ConversationId, ProtocolInfo},
    error::{CoreFailure, MlsFailure},
    protocol::GroupGuard,
};
use tracing::{debug, info};

use crate::{
    config::Settings, gateway::ConversationGateway, provider::MlsGroupProvider,
    resolver::JoinOrEstablishResolver, store::ConversationStore,
};

/// Tears a broken group down and rebuilds it from scratch under a
/// server-side compare guard.
pub struct ResetEngine {
    resolver: Arc<JoinOrEstablishResolver>,
    provider: Arc<dyn MlsGroupProvider>,
    gateway: Arc<dyn ConversationGateway>,
    store: Arc<dyn ConversationStore>,
    settings: Settings,
}

impl ResetEngine {
    pub fn new(
        resolver: Arc<JoinOrEstablishResolver>,
        provider: Arc<dyn MlsGroupProvider>,
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<dyn ConversationStore>,
        settings: Settings,
    ) -> Self {
        Self {
            resolver,
            provider,
            gateway,
            store,
            settings,
        }
    }

    /// Strictly ordered: backend reset, local wipe, conversation
    /// refetch, member refetch, establish. The first failing step
    /// aborts; nothing is marked established on a partial run.
    pub async fn reset(&self, conversation: &ConversationId) -> Result<(), CoreFailure> {
        if !self.settings.reset_enabled {
            debug!(conversation = %conversation, "conversation reset disabled, skipping");
            return Ok(());
        }

        let info = self.store.protocol_info(conversation).await?;
        let ProtocolInfo::Mls {
            group_id, epoch, ..
        } = info
        else {
            return Err(CoreFailure::Mls(MlsFailure::ConversationDoesNotSupportMls));
        };

        info!(
            conversation = %conversation,
            group = %group_id,
            epoch = %epoch,
            "resetting conversation group"
        );

        let guard = GroupGuard {
            group_id_b64: group_id.0.clone(),
            epoch: epoch.0,
        };
        self.gateway.reset_conversation(conversation, &guard).await?;

        self.provider.wipe_group(&group_id).await?;

        let remote = self.gateway.fetch_conversation(conversation).await?;
        self.store.apply_remote_conversation(&remote).await?;

        let members = self.store.members(conversation).await?;

        let fresh = self.store.protocol_info(conversation).await?;
        let ProtocolInfo::Mls {
            group_id: fresh_group,
            ..
        } = fresh
        else {
            return Err(CoreFailure::Mls(MlsFailure::ConversationDoesNotSupportMls));
        };

        self.resolver
            .establish_with_members(conversation, &fresh_group, &members)
            .await?;
        info!(
            conversation = %conversation,
            old_group = %group_id,
            new_group = %fresh_group,
            "conversation group rebuilt"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/reset_tests.rs"]
mod tests;
