use std::future::Future;

use shared::error::CoreFailure;
use tracing::warn;

/// Runs a join or establish attempt under the bounded stale-epoch
/// retry contract.
///
/// A stale-epoch rejection triggers `refetch` followed by exactly one
/// more attempt; a second stale rejection surfaces unchanged. A
/// missing-group-info rejection, on either attempt, counts as success
/// since the server has nothing to join. Every other failure
/// propagates untouched.
pub async fn join_with_stale_epoch_retry<A, AF, R, RF>(
    mut attempt: A,
    refetch: R,
) -> Result<(), CoreFailure>
where
    A: FnMut() -> AF,
    AF: Future<Output = Result<(), CoreFailure>>,
    R: FnOnce() -> RF,
    RF: Future<Output = Result<(), CoreFailure>>,
{
    let outcome = match attempt().await {
        Err(failure) if failure.is_stale_epoch() => {
            warn!("group commit rejected for stale epoch, refetching and retrying once");
            refetch().await?;
            attempt().await
        }
        outcome => outcome,
    };

    match outcome {
        Err(failure) if failure.is_missing_group_info() => {
            warn!("no group info published for group, nothing to join");
            Ok(())
        }
        outcome => outcome,
    }
}
