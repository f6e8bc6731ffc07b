use anyhow::anyhow;
use async_trait::async_trait;
use shared::{
    domain::{Epoch, GroupId, UserId},
    error::{CoreFailure, MlsFailure},
};

/// Cryptographic group operations, owned by an external MLS backend.
///
/// Implementations hold all key material; this crate only ever sees
/// opaque group ids, epochs, and serialized group-info or welcome blobs.
#[async_trait]
pub trait MlsGroupProvider: Send + Sync {
    async fn create_group(&self, group_id: &GroupId, members: &[UserId])
        -> Result<(), CoreFailure>;
    async fn join_by_external_commit(
        &self,
        group_id: &GroupId,
        group_info: &[u8],
    ) -> Result<(), CoreFailure>;
    async fn add_members(&self, group_id: &GroupId, members: &[UserId]) -> Result<(), CoreFailure>;
    async fn remove_members(
        &self,
        group_id: &GroupId,
        members: &[UserId],
    ) -> Result<(), CoreFailure>;
    async fn process_welcome(&self, welcome: &[u8]) -> Result<GroupId, CoreFailure>;
    async fn current_epoch(&self, group_id: &GroupId) -> Result<Epoch, CoreFailure>;
    async fn is_group_out_of_sync(
        &self,
        group_id: &GroupId,
        epoch: Epoch,
    ) -> Result<bool, CoreFailure>;
    async fn wipe_group(&self, group_id: &GroupId) -> Result<(), CoreFailure>;
}

/// Null object for builds without a configured MLS backend.
pub struct MissingMlsGroupProvider;

impl MissingMlsGroupProvider {
    fn unavailable(group_id: &GroupId) -> CoreFailure {
        CoreFailure::Mls(MlsFailure::Generic(anyhow!(
            "mls backend unavailable for group {group_id}"
        )))
    }
}

#[async_trait]
impl MlsGroupProvider for MissingMlsGroupProvider {
    async fn create_group(
        &self,
        group_id: &GroupId,
        _members: &[UserId],
    ) -> Result<(), CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn join_by_external_commit(
        &self,
        group_id: &GroupId,
        _group_info: &[u8],
    ) -> Result<(), CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn add_members(
        &self,
        group_id: &GroupId,
        _members: &[UserId],
    ) -> Result<(), CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn remove_members(
        &self,
        group_id: &GroupId,
        _members: &[UserId],
    ) -> Result<(), CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn process_welcome(&self, _welcome: &[u8]) -> Result<GroupId, CoreFailure> {
        Err(CoreFailure::Mls(MlsFailure::Generic(anyhow!(
            "mls backend unavailable"
        ))))
    }

    async fn current_epoch(&self, group_id: &GroupId) -> Result<Epoch, CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn is_group_out_of_sync(
        &self,
        group_id: &GroupId,
        _epoch: Epoch,
    ) -> Result<bool, CoreFailure> {
        Err(Self::unavailable(group_id))
    }

    async fn wipe_group(&self, group_id: &GroupId) -> Result<(), CoreFailure> {
        Err(Self::unavailable(group_id))
    }
}
