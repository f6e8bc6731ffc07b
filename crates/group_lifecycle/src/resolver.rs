use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ConversationId, ConversationKind, GroupId, GroupLifecycleState, ProtocolInfo},
    error::CoreFailure,
};
use tracing::{debug, info, warn};

use crate::{
    config::Settings, gateway::ConversationGateway, provider::MlsGroupProvider,
    retry::join_with_stale_epoch_retry, store::ConversationStore,
};

/// Drives a conversation the device is a member of towards an
/// established local group, either by joining the existing group
/// through an external commit or by establishing a fresh one.
pub struct JoinOrEstablishResolver {
    provider: Arc<dyn MlsGroupProvider>,
    gateway: Arc<dyn ConversationGateway>,
    store: Arc<dyn ConversationStore>,
    settings: Settings,
}

impl JoinOrEstablishResolver {
    pub fn new(
        provider: Arc<dyn MlsGroupProvider>,
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<dyn ConversationStore>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            gateway,
            store,
            settings,
        }
    }

    pub async fn resolve(&self, conversation: &ConversationId) -> Result<(), CoreFailure> {
        if !self.settings.mls_enabled {
            debug!(conversation = %conversation, "mls disabled, skipping join");
            return Ok(());
        }

        join_with_stale_epoch_retry(
            || self.join_or_establish(conversation),
            || self.refetch_conversation(conversation),
        )
        .await
    }

    /// Consumes a pending welcome message for the conversation and
    /// moves it to `Established`.
    pub async fn establish_from_welcome(
        &self,
        conversation: &ConversationId,
        welcome: &[u8],
    ) -> Result<(), CoreFailure> {
        let group_id = self.provider.process_welcome(welcome).await?;
        info!(
            conversation = %conversation,
            group = %group_id,
            "established group from welcome message"
        );
        self.mark_established(conversation).await
    }

    async fn join_or_establish(&self, conversation: &ConversationId) -> Result<(), CoreFailure> {
        let info = self.store.protocol_info(conversation).await?;
        let ProtocolInfo::Mls {
            group_id, epoch, ..
        } = info
        else {
            debug!(conversation = %conversation, "conversation is not on mls, nothing to do");
            return Ok(());
        };

        if !epoch.is_uninitialized() {
            self.join_existing(conversation, &group_id).await?;
            return self.mark_established(conversation).await;
        }

        match self.store.kind(conversation).await? {
            ConversationKind::SelfConversation => {
                info!(conversation = %conversation, group = %group_id, "establishing self conversation group");
                self.provider.create_group(&group_id, &[]).await?;
            }
            ConversationKind::OneOnOne => {
                let members = self.store.members(conversation).await?;
                info!(
                    conversation = %conversation,
                    group = %group_id,
                    members = members.len(),
                    "establishing one-on-one group"
                );
                self.provider.create_group(&group_id, &members).await?;
            }
            ConversationKind::Group => {
                debug!(
                    conversation = %conversation,
                    "group conversation at epoch 0, waiting for creation flow"
                );
                return Ok(());
            }
        }

        self.mark_established(conversation).await
    }

    pub(crate) async fn establish_with_members(
        &self,
        conversation: &ConversationId,
        group_id: &GroupId,
        members: &[shared::domain::UserId],
    ) -> Result<(), CoreFailure> {
        self.provider.create_group(group_id, members).await?;
        self.mark_established(conversation).await
    }

    async fn join_existing(
        &self,
        conversation: &ConversationId,
        group_id: &GroupId,
    ) -> Result<(), CoreFailure> {
        let group_info = self.gateway.fetch_group_info(conversation).await?;
        match extract_group_info_epoch(&group_info) {
            Some(epoch) => info!(
                conversation = %conversation,
                group = %group_id,
                epoch,
                "joining group by external commit"
            ),
            None => warn!(
                conversation = %conversation,
                group = %group_id,
                "group info epoch could not be parsed"
            ),
        }
        self.provider
            .join_by_external_commit(group_id, &group_info)
            .await
    }

    async fn refetch_conversation(&self, conversation: &ConversationId) -> Result<(), CoreFailure> {
        let remote = self.gateway.fetch_conversation(conversation).await?;
        self.store.apply_remote_conversation(&remote).await?;
        Ok(())
    }

    async fn mark_established(&self, conversation: &ConversationId) -> Result<(), CoreFailure> {
        let info = self.store.protocol_info(conversation).await?;
        let ProtocolInfo::Mls {
            group_id,
            cipher_suite,
            ..
        } = info
        else {
            return Ok(());
        };

        let epoch = self.provider.current_epoch(&group_id).await?;
        let updated = ProtocolInfo::Mls {
            group_id,
            group_state: GroupLifecycleState::Established,
            epoch,
            cipher_suite,
            keying_material_last_update: Utc::now(),
        };
        self.store.set_protocol_info(conversation, &updated).await?;
        Ok(())
    }
}

/// Reads the epoch out of a raw group-info blob.
///
/// The blob opens with a GroupContext: version (u16), cipher suite
/// (u16), group id (variable-length vector), epoch (u64, big endian).
/// The group id length uses the QUIC-style variable-length integer
/// with a two-bit length prefix; prefix `11` is invalid and
/// non-minimal encodings are rejected. Malformed input yields `None`.
pub fn extract_group_info_epoch(data: &[u8]) -> Option<u64> {
    let mut pos = 4usize; // version + cipher suite

    let first = *data.get(pos)?;
    pos += 1;
    let group_id_len = match first >> 6 {
        0 => (first & 0x3f) as usize,
        1 => {
            let b1 = *data.get(pos)? as usize;
            pos += 1;
            let v = (((first & 0x3f) as usize) << 8) | b1;
            if v < 64 {
                return None;
            }
            v
        }
        2 => {
            let rest = data.get(pos..pos + 3)?;
            pos += 3;
            let v = (((first & 0x3f) as usize) << 24)
                | ((rest[0] as usize) << 16)
                | ((rest[1] as usize) << 8)
                | (rest[2] as usize);
            if v < 16384 {
                return None;
            }
            v
        }
        _ => return None,
    };

    pos = pos.checked_add(group_id_len)?;
    let epoch_bytes = data.get(pos..pos + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(epoch_bytes);
    Some(u64::from_be_bytes(buf))
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
