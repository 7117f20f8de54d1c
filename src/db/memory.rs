//! An in-process [`Db`](super::Db) for tests and local experiments.
//!
//! Every session holds the whole store's lock until it is committed
//! or dropped, so sessions are fully serialized. Changes are made on a
//! private copy and only published on commit.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Db, GroupStore, Session, UserStore};
use crate::category::Category;
use crate::errors::BackendError;
use crate::group::{Group, NewGroup};
use crate::user::{NewUser, User};

#[derive(Clone, Debug, Default)]
struct State {
    users: Vec<User>,
    groups: Vec<Group>,
}

#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<State>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemorySession {
    published: OwnedMutexGuard<State>,
    working: State,
}

impl Db for MemoryDb {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Session>, BackendError>> {
        async move {
            let published = self.state.clone().lock_owned().await;
            let working = published.clone();

            Ok(Box::new(MemorySession { published, working }) as Box<dyn Session>)
        }
        .boxed()
    }

    fn email_exists(&self, email: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let email = email.to_owned();

        async move {
            let state = self.state.lock().await;

            Ok(state.users.iter().any(|u| u.email == email))
        }
        .boxed()
    }

    fn retrieve_user(&self, id: &Uuid) -> BoxFuture<'_, Result<Option<User>, BackendError>> {
        let id = *id;

        async move {
            let state = self.state.lock().await;

            Ok(state.users.iter().find(|u| u.id == id).cloned())
        }
        .boxed()
    }

    fn update_user(
        &self,
        id: &Uuid,
        name: &str,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<User>, BackendError>> {
        let id = *id;
        let name = name.to_owned();
        let email = email.to_owned();

        async move {
            let mut state = self.state.lock().await;

            if state.users.iter().any(|u| u.email == email && u.id != id) {
                return Err(BackendError::EmailAlreadyExists);
            }

            let user = state.users.iter_mut().find(|u| u.id == id).map(|user| {
                user.name = name;
                user.email = email;
                user.times.updated_at = OffsetDateTime::now_utc();
                user.clone()
            });

            Ok(user)
        }
        .boxed()
    }

    fn list_users(&self, group: Option<&str>) -> BoxFuture<'_, Result<Vec<User>, BackendError>> {
        let group = group.map(str::to_owned);

        async move {
            let state = self.state.lock().await;

            let users = state
                .users
                .iter()
                .filter(|u| group.as_ref().map_or(true, |g| &u.group_name == g))
                .cloned()
                .collect();

            Ok(users)
        }
        .boxed()
    }

    fn retrieve_group(&self, name: &str) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
        let name = name.to_owned();

        async move {
            let state = self.state.lock().await;

            Ok(state.groups.iter().find(|g| g.name == name).cloned())
        }
        .boxed()
    }

    fn list_groups(
        &self,
        base: Option<Category>,
    ) -> BoxFuture<'_, Result<Vec<Group>, BackendError>> {
        async move {
            let state = self.state.lock().await;

            let mut groups: Vec<Group> = state
                .groups
                .iter()
                .filter(|g| base.map_or(true, |b| g.base == b))
                .cloned()
                .collect();
            groups.sort_by(|a, b| (a.base.as_str(), a.index).cmp(&(b.base.as_str(), b.index)));

            Ok(groups)
        }
        .boxed()
    }
}

impl GroupStore for MemorySession {
    fn lock_category(&mut self, _category: Category) -> BoxFuture<'_, Result<(), BackendError>> {
        // the session already holds the lock on everything
        async { Ok(()) }.boxed()
    }

    fn lock_available_group(
        &mut self,
        category: Category,
    ) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
        let group = self
            .working
            .groups
            .iter()
            .filter(|g| g.base == category && g.has_room())
            .min_by_key(|g| g.index)
            .cloned();

        async move { Ok(group) }.boxed()
    }

    fn max_group_index(&mut self, category: Category) -> BoxFuture<'_, Result<i32, BackendError>> {
        let index = self
            .working
            .groups
            .iter()
            .filter(|g| g.base == category)
            .map(|g| g.index)
            .max()
            .unwrap_or(0);

        async move { Ok(index) }.boxed()
    }

    fn insert_group(&mut self, group: NewGroup) -> BoxFuture<'_, Result<Group, BackendError>> {
        async move {
            let taken = self
                .working
                .groups
                .iter()
                .any(|g| g.name == group.name || (g.base == group.base && g.index == group.index));

            if taken {
                return Err(BackendError::AllocationConflict { group: group.name });
            }

            let group = group.into_group(OffsetDateTime::now_utc());
            self.working.groups.push(group.clone());

            Ok(group)
        }
        .boxed()
    }

    fn increment_member_count(&mut self, name: &str) -> BoxFuture<'_, Result<u64, BackendError>> {
        let name = name.to_owned();

        async move {
            let group = self
                .working
                .groups
                .iter_mut()
                .find(|g| g.name == name && g.has_room());

            Ok(match group {
                Some(group) => {
                    group.member_count += 1;
                    group.times.updated_at = OffsetDateTime::now_utc();
                    1
                }
                None => 0,
            })
        }
        .boxed()
    }
}

impl UserStore for MemorySession {
    fn insert_user(&mut self, user: NewUser) -> BoxFuture<'_, Result<User, BackendError>> {
        async move {
            if self.working.users.iter().any(|u| u.email == user.email) {
                return Err(BackendError::EmailAlreadyExists);
            }

            if !self.working.groups.iter().any(|g| g.name == user.group_name) {
                return Err(BackendError::GroupNotFound(user.group_name));
            }

            let user = user.into_user(OffsetDateTime::now_utc());
            self.working.users.push(user.clone());

            Ok(user)
        }
        .boxed()
    }
}

impl Session for MemorySession {
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>> {
        let MemorySession {
            mut published,
            working,
        } = *self;

        async move {
            *published = working;

            Ok(())
        }
        .boxed()
    }
}
