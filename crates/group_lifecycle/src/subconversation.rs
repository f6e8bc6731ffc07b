use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use shared::{
    domain::{ConversationId, GroupId, SubconversationId, UserId},
    error::CoreFailure,
    protocol::{GroupGuard, SubconversationResponse},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    config::Settings, gateway::ConversationGateway, provider::MlsGroupProvider,
    retry::join_with_stale_epoch_retry,
};

type RegistryKey = (ConversationId, SubconversationId);

/// Join and leave lifecycle for subconversations (transient groups
/// hanging off a parent conversation, e.g. for conference calls).
///
/// Joined groups are tracked in a locked in-memory registry; the
/// registry is the source of truth for "are we a member", with a
/// backend details query as fallback.
pub struct SubconversationLifecycle {
    provider: Arc<dyn MlsGroupProvider>,
    gateway: Arc<dyn ConversationGateway>,
    self_user: UserId,
    settings: Settings,
    registry: Mutex<HashMap<RegistryKey, GroupId>>,
}

impl SubconversationLifecycle {
    pub fn new(
        provider: Arc<dyn MlsGroupProvider>,
        gateway: Arc<dyn ConversationGateway>,
        self_user: UserId,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            gateway,
            self_user,
            settings,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub async fn join(
        &self,
        parent: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<(), CoreFailure> {
        let details = self
            .gateway
            .fetch_subconversation_details(parent, subconversation)
            .await?;
        let group_id = GroupId(details.group_id_b64.clone());

        if details.epoch == 0 {
            info!(
                parent = %parent,
                subconversation = %subconversation,
                group = %group_id,
                "establishing fresh subconversation group"
            );
            self.provider.create_group(&group_id, &[]).await?;
        } else if self.is_stale(&details) {
            info!(
                parent = %parent,
                subconversation = %subconversation,
                group = %group_id,
                epoch = details.epoch,
                "subconversation epoch is stale, deleting and establishing"
            );
            let guard = GroupGuard {
                group_id_b64: details.group_id_b64.clone(),
                epoch: details.epoch,
            };
            self.gateway
                .delete_subconversation(parent, subconversation, &guard)
                .await?;
            self.provider.create_group(&group_id, &[]).await?;
        } else {
            let initial = self
                .gateway
                .fetch_subconversation_group_info(parent, subconversation)
                .await?;
            let group_info = Mutex::new(initial);
            join_with_stale_epoch_retry(
                || async {
                    let blob = group_info.lock().await.clone();
                    self.provider.join_by_external_commit(&group_id, &blob).await
                },
                || async {
                    let fresh = self
                        .gateway
                        .fetch_subconversation_group_info(parent, subconversation)
                        .await?;
                    *group_info.lock().await = fresh;
                    Ok(())
                },
            )
            .await?;
        }

        self.registry
            .lock()
            .await
            .insert((parent.clone(), subconversation.clone()), group_id.clone());
        info!(
            parent = %parent,
            subconversation = %subconversation,
            group = %group_id,
            "joined subconversation"
        );
        Ok(())
    }

    pub async fn leave(
        &self,
        parent: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<(), CoreFailure> {
        let group_id = match self.cached_group(parent, subconversation).await {
            Some(group_id) => Some(group_id),
            None => {
                let details = self
                    .gateway
                    .fetch_subconversation_details(parent, subconversation)
                    .await?;
                if details.members.contains(&self.self_user) {
                    Some(GroupId(details.group_id_b64))
                } else {
                    None
                }
            }
        };

        let Some(group_id) = group_id else {
            debug!(
                parent = %parent,
                subconversation = %subconversation,
                "not a subconversation member, nothing to leave"
            );
            return Ok(());
        };

        self.gateway
            .leave_subconversation(parent, subconversation)
            .await?;
        self.registry
            .lock()
            .await
            .remove(&(parent.clone(), subconversation.clone()));
        self.provider.wipe_group(&group_id).await?;
        info!(
            parent = %parent,
            subconversation = %subconversation,
            group = %group_id,
            "left subconversation"
        );
        Ok(())
    }

    /// The group id recorded for `(parent, subconversation)` by a
    /// previous successful join, if any.
    pub async fn cached_group(
        &self,
        parent: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Option<GroupId> {
        self.registry
            .lock()
            .await
            .get(&(parent.clone(), subconversation.clone()))
            .cloned()
    }

    fn is_stale(&self, details: &SubconversationResponse) -> bool {
        match details.epoch_timestamp {
            Some(timestamp) => Utc::now() - timestamp > self.settings.subconversation_staleness(),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "tests/subconversation_tests.rs"]
mod tests;
