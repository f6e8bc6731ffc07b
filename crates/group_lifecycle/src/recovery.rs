use std::sync::Arc;

use shared::{
    domain::{ConversationId, GroupLifecycleState, ProtocolInfo},
    error::CoreFailure,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Settings, provider::MlsGroupProvider, resolver::JoinOrEstablishResolver,
    store::ConversationStore,
};

enum Outcome {
    InSync,
    Recovered,
}

/// Batch scanner that walks conversations stuck in `PendingJoin` and
/// pushes each out-of-sync one through the join-or-establish path.
pub struct RecoveryScanner {
    resolver: Arc<JoinOrEstablishResolver>,
    provider: Arc<dyn MlsGroupProvider>,
    store: Arc<dyn ConversationStore>,
    settings: Settings,
}

impl RecoveryScanner {
    pub fn new(
        resolver: Arc<JoinOrEstablishResolver>,
        provider: Arc<dyn MlsGroupProvider>,
        store: Arc<dyn ConversationStore>,
        settings: Settings,
    ) -> Self {
        Self {
            resolver,
            provider,
            store,
            settings,
        }
    }

    /// Processes the pending-join backlog sequentially. Conversations
    /// whose members lack key packages stay pending; any other network
    /// failure stops the whole batch.
    pub async fn recover_all(&self) -> Result<(), CoreFailure> {
        if !self.settings.mls_enabled {
            debug!("mls disabled, skipping recovery scan");
            return Ok(());
        }

        let pending = self
            .store
            .conversations_by_group_state(GroupLifecycleState::PendingJoin)
            .await?;
        info!(count = pending.len(), "scanning conversations pending join");

        for conversation in pending {
            match self.recover_one(&conversation).await {
                Ok(Outcome::InSync) => {
                    debug!(conversation = %conversation, "group already in sync, skipping");
                }
                Ok(Outcome::Recovered) => {
                    info!(conversation = %conversation, "recovered pending join");
                }
                Err(CoreFailure::MissingKeyPackages(users)) => {
                    warn!(
                        conversation = %conversation,
                        users = users.len(),
                        "key packages missing, leaving conversation pending"
                    );
                }
                Err(failure @ CoreFailure::Network(_)) => {
                    error!(
                        conversation = %conversation,
                        error = %failure,
                        "network failure during recovery, aborting batch"
                    );
                    return Err(failure);
                }
                Err(failure) => {
                    warn!(
                        conversation = %conversation,
                        error = %failure,
                        "recovery failed, continuing with next conversation"
                    );
                }
            }
        }

        Ok(())
    }

    async fn recover_one(&self, conversation: &ConversationId) -> Result<Outcome, CoreFailure> {
        let info = self.store.protocol_info(conversation).await?;
        let ProtocolInfo::Mls {
            group_id, epoch, ..
        } = info
        else {
            return Ok(Outcome::InSync);
        };

        if !self
            .provider
            .is_group_out_of_sync(&group_id, epoch)
            .await?
        {
            return Ok(Outcome::InSync);
        }

        self.resolver.resolve(conversation).await?;
        Ok(Outcome::Recovered)
    }
}

#[cfg(test)]
#[path = "tests/recovery_tests.rs"]
mod tests;
