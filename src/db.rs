use futures::future::BoxFuture;
use uuid::Uuid;

use crate::category::Category;
use crate::errors::BackendError;
use crate::group::{Group, NewGroup};
use crate::user::{NewUser, User};

pub mod memory;

/// Group operations available inside a creation transaction.
pub trait GroupStore: Send {
    /// Serializes the "no group available" branch for `category`
    /// until the transaction ends.
    fn lock_category(&mut self, category: Category) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Locks the lowest-indexed group of `category` that still has
    /// room, if any.
    fn lock_available_group(
        &mut self,
        category: Category,
    ) -> BoxFuture<'_, Result<Option<Group>, BackendError>>;

    /// Returns the highest index in use for `category`, or 0.
    fn max_group_index(&mut self, category: Category) -> BoxFuture<'_, Result<i32, BackendError>>;

    fn insert_group(&mut self, group: NewGroup) -> BoxFuture<'_, Result<Group, BackendError>>;

    /// Adds one member to the named group unless it is full. Returns
    /// the number of rows changed.
    fn increment_member_count(&mut self, name: &str) -> BoxFuture<'_, Result<u64, BackendError>>;
}

/// User operations available inside a creation transaction.
pub trait UserStore: Send {
    fn insert_user(&mut self, user: NewUser) -> BoxFuture<'_, Result<User, BackendError>>;
}

/// One atomic unit of work. Dropping it without committing discards
/// every change made through it.
pub trait Session: GroupStore + UserStore {
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>>;
}

pub trait Db: Send + Sync {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Session>, BackendError>>;

    fn email_exists(&self, email: &str) -> BoxFuture<'_, Result<bool, BackendError>>;

    fn retrieve_user(&self, id: &Uuid) -> BoxFuture<'_, Result<Option<User>, BackendError>>;

    fn update_user(
        &self,
        id: &Uuid,
        name: &str,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<User>, BackendError>>;

    fn list_users(&self, group: Option<&str>) -> BoxFuture<'_, Result<Vec<User>, BackendError>>;

    fn retrieve_group(&self, name: &str) -> BoxFuture<'_, Result<Option<Group>, BackendError>>;

    fn list_groups(
        &self,
        base: Option<Category>,
    ) -> BoxFuture<'_, Result<Vec<Group>, BackendError>>;
}

pub use self::postgres::*;

mod postgres {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::{
        self,
        postgres::{PgPool, PgRow},
        Postgres, Transaction,
    };
    use time::{Date, OffsetDateTime};
    use uuid::Uuid;

    use crate::category::Category;
    use crate::errors::BackendError;
    use crate::group::{Group, NewGroup};
    use crate::user::{NewUser, Times, User};

    const USERS_EMAIL_CONSTRAINT: &str = "users_email_unique";
    const GROUPS_NAME_CONSTRAINT: &str = "groups_primary_key";
    const GROUPS_INDEX_CONSTRAINT: &str = "groups_base_index_unique";

    pub struct PgDb {
        pool: PgPool,
    }

    impl PgDb {
        pub fn new(pool: PgPool) -> Self {
            PgDb { pool }
        }
    }

    /// A creation transaction. Runs at the default READ COMMITTED
    /// level; the advisory and row locks provide the serialization.
    pub struct PgSession {
        tx: Transaction<'static, Postgres>,
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::Db for PgDb {
        fn begin(&self) -> BoxFuture<'_, Result<Box<dyn super::Session>, BackendError>> {
            async move {
                let tx = self.pool.begin().await.map_err(map_session_error)?;

                Ok(Box::new(PgSession { tx }) as Box<dyn super::Session>)
            }
            .boxed()
        }

        fn email_exists(&self, email: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
            let email = email.to_owned();

            async move {
                let query = sqlx::query_as::<_, (bool,)>(include_str!("db/queries/email_exists.sql"));

                let (exists,) = query
                    .bind(email)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(exists)
            }
            .boxed()
        }

        fn retrieve_user(&self, id: &Uuid) -> BoxFuture<'_, Result<Option<User>, BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("db/queries/retrieve_user.sql"));

                let user = query
                    .bind(id)
                    .try_map(|row: PgRow| user_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(user)
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
                let query = sqlx::query(include_str!("db/queries/update_user.sql"));

                let user = query
                    .bind(id)
                    .bind(name)
                    .bind(email)
                    .try_map(|row: PgRow| user_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(user)
            }
            .boxed()
        }

        fn list_users(&self, group: Option<&str>) -> BoxFuture<'_, Result<Vec<User>, BackendError>> {
            let group = group.map(str::to_owned);

            async move {
                let query = sqlx::query(include_str!("db/queries/list_users.sql"));

                let users = query
                    .bind(group)
                    .try_map(|row: PgRow| user_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(users)
            }
            .boxed()
        }

        fn retrieve_group(&self, name: &str) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
            let name = name.to_owned();

            async move {
                let query = sqlx::query(include_str!("db/queries/retrieve_group.sql"));

                let group = query
                    .bind(name)
                    .try_map(|row: PgRow| group_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(group)
            }
            .boxed()
        }

        fn list_groups(
            &self,
            base: Option<Category>,
        ) -> BoxFuture<'_, Result<Vec<Group>, BackendError>> {
            async move {
                let query = sqlx::query(include_str!("db/queries/list_groups.sql"));

                let groups = query
                    .bind(base.map(Category::as_str))
                    .try_map(|row: PgRow| group_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(groups)
            }
            .boxed()
        }
    }

    impl super::GroupStore for PgSession {
        fn lock_category(&mut self, category: Category) -> BoxFuture<'_, Result<(), BackendError>> {
            async move {
                let query = sqlx::query(include_str!("db/queries/lock_category.sql"));

                query
                    .bind(category.as_str())
                    .execute(&mut self.tx)
                    .await
                    .map_err(map_session_error)?;

                Ok(())
            }
            .boxed()
        }

        fn lock_available_group(
            &mut self,
            category: Category,
        ) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
            async move {
                let query = sqlx::query(include_str!("db/queries/lock_available_group.sql"));

                let group = query
                    .bind(category.as_str())
                    .try_map(|row: PgRow| group_from_row(&row))
                    .fetch_optional(&mut self.tx)
                    .await
                    .map_err(map_session_error)?;

                Ok(group)
            }
            .boxed()
        }

        fn max_group_index(&mut self, category: Category) -> BoxFuture<'_, Result<i32, BackendError>> {
            async move {
                let query = sqlx::query_as::<_, (i32,)>(include_str!("db/queries/max_group_index.sql"));

                let (index,) = query
                    .bind(category.as_str())
                    .fetch_one(&mut self.tx)
                    .await
                    .map_err(map_session_error)?;

                Ok(index)
            }
            .boxed()
        }

        fn insert_group(&mut self, group: NewGroup) -> BoxFuture<'_, Result<Group, BackendError>> {
            async move {
                let query = sqlx::query_as(include_str!("db/queries/create_group.sql"));

                let (created_at, updated_at): (OffsetDateTime, OffsetDateTime) = query
                    .bind(&group.name)
                    .bind(group.base.as_str())
                    .bind(group.index)
                    .bind(group.capacity)
                    .fetch_one(&mut self.tx)
                    .await
                    .map_err(|e| map_group_insertion_error(e, &group.name))?;

                let times = Times::new(created_at, updated_at);

                Ok(Group::new(
                    group.name,
                    group.base,
                    group.index,
                    group.capacity,
                    0,
                    times,
                ))
            }
            .boxed()
        }

        fn increment_member_count(&mut self, name: &str) -> BoxFuture<'_, Result<u64, BackendError>> {
            let name = name.to_owned();

            async move {
                let query = sqlx::query(include_str!("db/queries/increment_member_count.sql"));

                let count = query
                    .bind(name)
                    .execute(&mut self.tx)
                    .await
                    .map_err(map_session_error)?
                    .rows_affected();

                Ok(count)
            }
            .boxed()
        }
    }

    impl super::UserStore for PgSession {
        fn insert_user(&mut self, user: NewUser) -> BoxFuture<'_, Result<User, BackendError>> {
            async move {
                let query = sqlx::query_as(include_str!("db/queries/create_user.sql"));

                let (created_at, updated_at): (OffsetDateTime, OffsetDateTime) = query
                    .bind(user.id)
                    .bind(&user.name)
                    .bind(&user.email)
                    .bind(user.date_of_birth)
                    .bind(&user.group_name)
                    .fetch_one(&mut self.tx)
                    .await
                    .map_err(map_session_error)?;

                let times = Times::new(created_at, updated_at);

                Ok(User::new(
                    user.id,
                    user.name,
                    user.email,
                    user.date_of_birth,
                    user.group_name,
                    times,
                ))
            }
            .boxed()
        }
    }

    impl super::Session for PgSession {
        fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>> {
            async move { self.tx.commit().await.map_err(map_session_error) }.boxed()
        }
    }

    fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
        let id: Uuid = try_get(row, "id")?;
        let name: String = try_get(row, "name")?;
        let email: String = try_get(row, "email")?;
        let date_of_birth: Date = try_get(row, "date_of_birth")?;
        let group_name: String = try_get(row, "group_name")?;

        Ok(User::new(
            id,
            name,
            email,
            date_of_birth,
            group_name,
            times_from_row(row)?,
        ))
    }

    fn group_from_row(row: &PgRow) -> Result<Group, sqlx::Error> {
        let name: String = try_get(row, "name")?;
        let base: String = try_get(row, "base")?;
        // this should never fail, since only the allocator writes
        // groups, but just for completeness...
        let base: Category = base
            .parse()
            .map_err(|e: BackendError| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Group::new(
            name,
            base,
            try_get(row, "index")?,
            try_get(row, "capacity")?,
            try_get(row, "member_count")?,
            times_from_row(row)?,
        ))
    }

    fn times_from_row(row: &PgRow) -> Result<Times, sqlx::Error> {
        Ok(Times::new(
            try_get(row, "created_at")?,
            try_get(row, "updated_at")?,
        ))
    }

    fn try_get<'a, T: sqlx::Type<sqlx::Postgres> + sqlx::decode::Decode<'a, sqlx::Postgres>>(
        row: &'a PgRow,
        column: &str,
    ) -> Result<T, sqlx::Error> {
        use sqlx::prelude::*;

        row.try_get(column)
    }

    fn is_violation_of(error: &sqlx::Error, constraints: &[&str]) -> bool {
        match error {
            sqlx::Error::Database(e) => e
                .constraint()
                .map(|c| constraints.contains(&c))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn map_sqlx_error(error: sqlx::Error) -> BackendError {
        if is_violation_of(&error, &[USERS_EMAIL_CONSTRAINT]) {
            BackendError::EmailAlreadyExists
        } else {
            BackendError::Sqlx { source: error }
        }
    }

    /// Anything unexpected inside a creation transaction aborts it as
    /// a whole.
    fn map_session_error(error: sqlx::Error) -> BackendError {
        if is_violation_of(&error, &[USERS_EMAIL_CONSTRAINT]) {
            BackendError::EmailAlreadyExists
        } else {
            BackendError::TransactionAborted { source: error }
        }
    }

    fn map_group_insertion_error(error: sqlx::Error, name: &str) -> BackendError {
        if is_violation_of(&error, &[GROUPS_NAME_CONSTRAINT, GROUPS_INDEX_CONSTRAINT]) {
            BackendError::AllocationConflict {
                group: name.to_owned(),
            }
        } else {
            map_session_error(error)
        }
    }
}
