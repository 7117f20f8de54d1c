use log::{trace, Logger};

use crate::category::Category;
use crate::db::GroupStore;
use crate::errors::BackendError;
use crate::group::{Group, NewGroup, GROUP_CAPACITY};

/// Reserves one slot in a group of `category` and returns that group
/// with its updated member count.
///
/// Must run inside the same session as the insertion of the user who
/// takes the slot. The lowest-indexed group with room is used; when
/// every group is full (or none exists yet) the next one in the
/// sequence is created. Nothing is retried here: every error leaves
/// the session unusable and the caller starts over with a new one.
pub async fn reserve_slot<S>(
    logger: &Logger,
    store: &mut S,
    category: Category,
) -> Result<Group, BackendError>
where
    S: GroupStore + ?Sized,
{
    store.lock_category(category).await?;

    let mut group = match store.lock_available_group(category).await? {
        Some(group) => group,
        None => {
            let index = store.max_group_index(category).await? + 1;
            trace!(logger, "Creating group..."; "category" => %category, "index" => index);

            store
                .insert_group(NewGroup::new(category, index, GROUP_CAPACITY))
                .await?
        }
    };

    let updated = store.increment_member_count(group.name()).await?;

    if updated != 1 {
        return Err(BackendError::GroupFull {
            group: group.name().to_owned(),
        });
    }

    group.member_count += 1;
    trace!(logger, "Reserved slot"; "group" => group.name(), "member_count" => group.member_count);

    Ok(group)
}
