use std::sync::Arc;

use log::{debug, o, warn, Logger};
use time::Date;
use uuid::Uuid;

use crate::allocator::reserve_slot;
use crate::category::{classify, Category};
use crate::db::Db;
use crate::environment::{Clock, Config};
use crate::errors::BackendError;
use crate::group::Group;
use crate::user::{CreationRequest, NewUser, UpdateRequest, User};
use crate::validation::{validate_date_of_birth, validate_email, validate_name};

/// Everything the HTTP layer can do with users and groups.
#[derive(Clone)]
pub struct UserService {
    logger: Arc<Logger>,
    db: Arc<dyn Db>,
    clock: Arc<Clock>,
    config: Config,
}

impl UserService {
    pub fn new(logger: Arc<Logger>, db: Arc<dyn Db>, clock: Arc<Clock>, config: Config) -> Self {
        UserService {
            logger,
            db,
            clock,
            config,
        }
    }

    /// Validates a request, assigns the user to a group of their age
    /// category and stores both in one transaction.
    ///
    /// Transient allocation failures restart the whole transaction, up
    /// to the configured number of attempts.
    pub async fn create(&self, request: CreationRequest) -> Result<User, BackendError> {
        let today = (self.clock)();

        let name = validate_name(&request.name)?;
        let email = validate_email(&request.email)?;
        let date_of_birth = validate_date_of_birth(&request.date_of_birth, today)?;

        if self.db.email_exists(&email).await? {
            return Err(BackendError::EmailAlreadyExists);
        }

        let category = classify(date_of_birth, today);
        let logger = self
            .logger
            .new(o!("email" => email.clone(), "category" => category.as_str()));

        let attempts = self.config.creation_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self
                .try_create(&logger, &name, &email, date_of_birth, category)
                .await
            {
                Ok(user) => {
                    debug!(logger, "Created user"; "id" => %user.id(), "group" => user.group_name(), "attempt" => attempt);
                    return Ok(user);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= attempts {
                return Err(BackendError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            warn!(logger, "Retrying creation"; "attempt" => attempt, "error" => %error);
        }
    }

    async fn try_create(
        &self,
        logger: &Logger,
        name: &str,
        email: &str,
        date_of_birth: Date,
        category: Category,
    ) -> Result<User, BackendError> {
        let mut session = self.db.begin().await?;

        let group = reserve_slot(logger, &mut *session, category).await?;

        let user = session
            .insert_user(NewUser::new(
                Uuid::new_v4(),
                name.to_owned(),
                email.to_owned(),
                date_of_birth,
                group.name().to_owned(),
            ))
            .await?;

        session.commit().await?;

        Ok(user)
    }

    /// Creates users one after the other. Stops at the first failure
    /// and reports the position of the failing request; users created
    /// before it are kept.
    pub async fn create_many(
        &self,
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<User>, (usize, BackendError)> {
        let mut users = Vec::with_capacity(requests.len());

        for (index, request) in requests.into_iter().enumerate() {
            users.push(self.create(request).await.map_err(|e| (index, e))?);
        }

        Ok(users)
    }

    pub async fn get(&self, id: &str) -> Result<User, BackendError> {
        let id = parse_id(id)?;

        self.db
            .retrieve_user(&id)
            .await?
            .ok_or(BackendError::UserNotFound(id))
    }

    /// Changes the name and/or email of a user. The group stays as it
    /// was assigned.
    pub async fn update(&self, id: &str, request: UpdateRequest) -> Result<User, BackendError> {
        let id = parse_id(id)?;

        let existing = self
            .db
            .retrieve_user(&id)
            .await?
            .ok_or(BackendError::UserNotFound(id))?;

        let name = match request.name {
            Some(name) => validate_name(name)?,
            None => existing.name.clone(),
        };

        let email = match request.email {
            Some(email) => validate_email(email)?,
            None => existing.email.clone(),
        };

        if name == existing.name && email == existing.email {
            return Ok(existing);
        }

        if email != existing.email && self.db.email_exists(&email).await? {
            return Err(BackendError::EmailAlreadyExists);
        }

        self.db
            .update_user(&id, &name, &email)
            .await?
            .ok_or(BackendError::UserNotFound(id))
    }

    /// Lists users in creation order, optionally only those in
    /// `group`. An empty group name means no filter.
    pub async fn list(&self, group: Option<&str>) -> Result<Vec<User>, BackendError> {
        let group = group.filter(|g| !g.is_empty());

        self.db.list_users(group).await
    }

    pub async fn group(&self, name: &str) -> Result<Group, BackendError> {
        self.db
            .retrieve_group(name)
            .await?
            .ok_or_else(|| BackendError::GroupNotFound(name.to_owned()))
    }

    pub async fn groups(&self, base: Option<&str>) -> Result<Vec<Group>, BackendError> {
        let base = match base.filter(|b| !b.is_empty()) {
            Some(base) => Some(base.parse::<Category>()?),
            None => None,
        };

        self.db.list_groups(base).await
    }
}

fn parse_id(id: &str) -> Result<Uuid, BackendError> {
    Uuid::parse_str(id).map_err(|_| BackendError::InvalidId(id.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::future::{BoxFuture, FutureExt};
    use time::Date;
    use uuid::Uuid;

    use super::UserService;
    use crate::category::Category;
    use crate::db::memory::MemoryDb;
    use crate::db::{Db, GroupStore, Session, UserStore};
    use crate::environment::{Clock, Config};
    use crate::errors::BackendError;
    use crate::group::{Group, NewGroup};
    use crate::user::{CreationRequest, NewUser, UpdateRequest, User};

    fn today() -> Date {
        Date::try_from_ymd(2024, 6, 1).unwrap()
    }

    fn clock() -> Arc<Clock> {
        Arc::new(today)
    }

    fn service(db: Arc<dyn Db>, attempts: u8) -> UserService {
        UserService::new(
            Arc::new(log::discard()),
            db,
            clock(),
            Config::new(attempts),
        )
    }

    fn request(name: &str, email: &str, date_of_birth: &str) -> CreationRequest {
        CreationRequest {
            name: name.to_owned(),
            email: email.to_owned(),
            date_of_birth: date_of_birth.to_owned(),
        }
    }

    fn adult(n: usize) -> CreationRequest {
        request(
            &format!("Adult {}", n),
            &format!("adult{}@example.com", n),
            "1990-01-01",
        )
    }

    #[tokio::test]
    async fn first_user_opens_the_first_group() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        let user = service.create(adult(1)).await.unwrap();

        assert_eq!(user.group_name(), "adult-1");
        let group = db.retrieve_group("adult-1").await.unwrap().unwrap();
        assert_eq!(group.member_count(), 1);
        assert_eq!(group.capacity(), 3);
    }

    #[tokio::test]
    async fn groups_fill_up_in_order() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        let mut groups = vec![];
        for n in 0..4 {
            groups.push(service.create(adult(n)).await.unwrap().group_name().to_owned());
        }

        assert_eq!(groups, vec!["adult-1", "adult-1", "adult-1", "adult-2"]);

        let counts: Vec<_> = db
            .list_groups(Some(Category::Adult))
            .await
            .unwrap()
            .iter()
            .map(|g| (g.name().to_owned(), g.member_count()))
            .collect();
        assert_eq!(
            counts,
            vec![("adult-1".to_owned(), 3), ("adult-2".to_owned(), 1)]
        );
    }

    #[tokio::test]
    async fn ages_pick_the_category() {
        let service = service(Arc::new(MemoryDb::new()), 5);

        let cases = [
            ("2012-06-01", "child-1"),
            ("2011-06-01", "teen-1"),
            ("2006-06-02", "teen-1"),
            ("2006-06-01", "adult-1"),
            ("1959-06-02", "adult-1"),
            ("1959-06-01", "senior-1"),
        ];

        for (n, (date_of_birth, group)) in cases.iter().enumerate() {
            let user = service
                .create(request("Someone", &format!("u{}@example.com", n), date_of_birth))
                .await
                .unwrap();

            assert_eq!(user.group_name(), *group, "born {}", date_of_birth);
        }
    }

    #[tokio::test]
    async fn duplicate_emails_are_rejected_without_allocating() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        service
            .create(request("A", "dup@example.com", "1990-01-01"))
            .await
            .unwrap();
        let result = service
            .create(request("B", " DUP@example.com", "1991-01-01"))
            .await;

        assert!(matches!(result, Err(BackendError::EmailAlreadyExists)));
        let group = db.retrieve_group("adult-1").await.unwrap().unwrap();
        assert_eq!(group.member_count(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_touch_nothing() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        assert!(matches!(
            service.create(request("  ", "a@example.com", "1990-01-01")).await,
            Err(BackendError::NameRequired)
        ));
        assert!(matches!(
            service.create(request("A", "not-an-email", "1990-01-01")).await,
            Err(BackendError::InvalidEmail(_))
        ));
        assert!(matches!(
            service.create(request("A", "a@example.com", "01/01/1990")).await,
            Err(BackendError::InvalidDateOfBirth(_))
        ));
        assert!(matches!(
            service.create(request("A", "a@example.com", "2024-06-02")).await,
            Err(BackendError::DateOfBirthInFuture)
        ));

        assert!(db.list_groups(None).await.unwrap().is_empty());
        assert!(db.list_users(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creations_never_overfill_a_group() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        let handles: Vec<_> = (0..10)
            .map(|n| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .create(request("Senior", &format!("s{}@example.com", n), "1950-01-01"))
                        .await
                })
            })
            .collect();

        let mut per_group = BTreeMap::new();
        for handle in handles {
            let user = handle.await.unwrap().unwrap();
            *per_group.entry(user.group_name().to_owned()).or_insert(0) += 1;
        }

        let expected: BTreeMap<_, _> = vec![
            ("senior-1".to_owned(), 3),
            ("senior-2".to_owned(), 3),
            ("senior-3".to_owned(), 3),
            ("senior-4".to_owned(), 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(per_group, expected);

        for group in db.list_groups(Some(Category::Senior)).await.unwrap() {
            assert_eq!(
                group.member_count(),
                per_group[group.name()],
                "{} counts its members",
                group.name()
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_racing_seniors_share_the_first_group() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        let (first, second) = tokio::join!(
            service.create(request("A", "a@example.com", "1940-01-01")),
            service.create(request("B", "b@example.com", "1941-01-01"))
        );

        assert_eq!(first.unwrap().group_name(), "senior-1");
        assert_eq!(second.unwrap().group_name(), "senior-1");

        let groups = db.list_groups(Some(Category::Senior)).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_count(), 2);
    }

    #[tokio::test]
    async fn batches_stop_at_the_first_failure() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);

        let result = service
            .create_many(vec![
                adult(1),
                request("Bad", "bad", "1990-01-01"),
                adult(2),
            ])
            .await;

        assert!(matches!(result, Err((1, BackendError::InvalidEmail(_)))));
        assert_eq!(db.list_users(None).await.unwrap().len(), 1);

        let users = service.create_many(vec![adult(3), adult(4)]).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn updates_keep_the_group() {
        let db = MemoryDb::new();
        let service = service(Arc::new(db.clone()), 5);
        let user = service.create(adult(1)).await.unwrap();
        let id = user.id().to_string();

        let updated = service
            .update(
                &id,
                UpdateRequest {
                    name: Some(" Renamed ".to_owned()),
                    email: Some("NEW@example.com".to_owned()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name(), "Renamed");
        assert_eq!(updated.email(), "new@example.com");
        assert_eq!(updated.group_name(), "adult-1");
        assert_eq!(service.get(&id).await.unwrap(), updated);

        let unchanged = service.update(&id, UpdateRequest::default()).await.unwrap();
        assert_eq!(unchanged, updated);
    }

    #[tokio::test]
    async fn updates_cannot_steal_an_email() {
        let service = service(Arc::new(MemoryDb::new()), 5);
        service.create(adult(1)).await.unwrap();
        let second = service.create(adult(2)).await.unwrap();

        let result = service
            .update(
                &second.id().to_string(),
                UpdateRequest {
                    name: None,
                    email: Some("adult1@example.com".to_owned()),
                },
            )
            .await;

        assert!(matches!(result, Err(BackendError::EmailAlreadyExists)));
    }

    #[tokio::test]
    async fn lookups_distinguish_bad_and_missing_ids() {
        let service = service(Arc::new(MemoryDb::new()), 5);

        assert!(matches!(
            service.get("not-a-uuid").await,
            Err(BackendError::InvalidId(_))
        ));
        assert!(matches!(
            service.get(&Uuid::new_v4().to_string()).await,
            Err(BackendError::UserNotFound(_))
        ));
        assert!(matches!(
            service.group("adult-7").await,
            Err(BackendError::GroupNotFound(_))
        ));
        assert!(matches!(
            service.groups(Some("toddler")).await,
            Err(BackendError::InvalidCategory(_))
        ));
    }

    #[tokio::test]
    async fn listings_filter_by_group() {
        let service = service(Arc::new(MemoryDb::new()), 5);
        for n in 0..4 {
            service.create(adult(n)).await.unwrap();
        }
        service
            .create(request("Kid", "kid@example.com", "2020-01-01"))
            .await
            .unwrap();

        assert_eq!(service.list(None).await.unwrap().len(), 5);
        assert_eq!(service.list(Some("")).await.unwrap().len(), 5);
        assert_eq!(service.list(Some("adult-1")).await.unwrap().len(), 3);
        assert_eq!(service.list(Some("child-1")).await.unwrap().len(), 1);

        let adults = service.groups(Some("adult")).await.unwrap();
        assert_eq!(adults.len(), 2);
        assert_eq!(service.groups(None).await.unwrap().len(), 3);
    }

    #[derive(Clone, Copy)]
    enum Fault {
        /// The first session sees a maximum index one lower than the
        /// real one, as if a concurrent creation had just committed.
        StaleIndexOnce,
        /// Every increment matches no row.
        RefuseIncrements,
    }

    /// Wraps a `MemoryDb` and injects allocation failures into its
    /// sessions.
    struct FaultyDb {
        inner: MemoryDb,
        fault: Fault,
        sessions: Arc<AtomicUsize>,
    }

    struct FaultySession {
        inner: Box<dyn Session>,
        fault: Fault,
        first: bool,
    }

    impl Db for FaultyDb {
        fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Session>, BackendError>> {
            async move {
                let first = self.sessions.fetch_add(1, Ordering::SeqCst) == 0;
                let inner = self.inner.begin().await?;

                Ok(Box::new(FaultySession {
                    inner,
                    fault: self.fault,
                    first,
                }) as Box<dyn Session>)
            }
            .boxed()
        }

        fn email_exists(&self, email: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
            self.inner.email_exists(email)
        }

        fn retrieve_user(&self, id: &Uuid) -> BoxFuture<'_, Result<Option<User>, BackendError>> {
            self.inner.retrieve_user(id)
        }

        fn update_user(
            &self,
            id: &Uuid,
            name: &str,
            email: &str,
        ) -> BoxFuture<'_, Result<Option<User>, BackendError>> {
            self.inner.update_user(id, name, email)
        }

        fn list_users(&self, group: Option<&str>) -> BoxFuture<'_, Result<Vec<User>, BackendError>> {
            self.inner.list_users(group)
        }

        fn retrieve_group(&self, name: &str) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
            self.inner.retrieve_group(name)
        }

        fn list_groups(
            &self,
            base: Option<Category>,
        ) -> BoxFuture<'_, Result<Vec<Group>, BackendError>> {
            self.inner.list_groups(base)
        }
    }

    impl GroupStore for FaultySession {
        fn lock_category(&mut self, category: Category) -> BoxFuture<'_, Result<(), BackendError>> {
            self.inner.lock_category(category)
        }

        fn lock_available_group(
            &mut self,
            category: Category,
        ) -> BoxFuture<'_, Result<Option<Group>, BackendError>> {
            self.inner.lock_available_group(category)
        }

        fn max_group_index(&mut self, category: Category) -> BoxFuture<'_, Result<i32, BackendError>> {
            let stale = matches!(self.fault, Fault::StaleIndexOnce) && self.first;

            async move {
                let index = self.inner.max_group_index(category).await?;

                Ok(if stale { (index - 1).max(0) } else { index })
            }
            .boxed()
        }

        fn insert_group(&mut self, group: NewGroup) -> BoxFuture<'_, Result<Group, BackendError>> {
            self.inner.insert_group(group)
        }

        fn increment_member_count(&mut self, name: &str) -> BoxFuture<'_, Result<u64, BackendError>> {
            match self.fault {
                Fault::RefuseIncrements => async { Ok(0) }.boxed(),
                Fault::StaleIndexOnce => self.inner.increment_member_count(name),
            }
        }
    }

    impl UserStore for FaultySession {
        fn insert_user(&mut self, user: NewUser) -> BoxFuture<'_, Result<User, BackendError>> {
            self.inner.insert_user(user)
        }
    }

    impl Session for FaultySession {
        fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>> {
            self.inner.commit()
        }
    }

    /// Fills `adult-1` directly so that the next creation must open a
    /// new group.
    async fn fill_first_adult_group(db: &MemoryDb) {
        let mut session = db.begin().await.unwrap();
        session
            .insert_group(NewGroup::new(Category::Adult, 1, 3))
            .await
            .unwrap();

        for n in 0..3 {
            session.increment_member_count("adult-1").await.unwrap();
            session
                .insert_user(NewUser::new(
                    Uuid::new_v4(),
                    "Filler".to_owned(),
                    format!("filler{}@example.com", n),
                    Date::try_from_ymd(1980, 1, 1).unwrap(),
                    "adult-1".to_owned(),
                ))
                .await
                .unwrap();
        }

        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn conflicting_group_creation_is_retried() {
        let db = MemoryDb::new();
        fill_first_adult_group(&db).await;

        let sessions = Arc::new(AtomicUsize::new(0));
        let faulty = FaultyDb {
            inner: db.clone(),
            fault: Fault::StaleIndexOnce,
            sessions: sessions.clone(),
        };
        let service = service(Arc::new(faulty), 5);

        let user = service.create(adult(1)).await.unwrap();

        assert_eq!(user.group_name(), "adult-2");
        assert_eq!(sessions.load(Ordering::SeqCst), 2);
        assert_eq!(db.list_groups(Some(Category::Adult)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_the_attempts() {
        let db = MemoryDb::new();
        let sessions = Arc::new(AtomicUsize::new(0));
        let faulty = FaultyDb {
            inner: db.clone(),
            fault: Fault::RefuseIncrements,
            sessions: sessions.clone(),
        };
        let service = service(Arc::new(faulty), 3);

        let result = service.create(adult(1)).await;

        match result {
            Err(BackendError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, BackendError::GroupFull { .. }));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(sessions.load(Ordering::SeqCst), 3);
        assert!(db.list_groups(None).await.unwrap().is_empty());
        assert!(db.list_users(None).await.unwrap().is_empty());
    }
}
