use std::sync::Arc;

use log::Logger;
use time::{Date, OffsetDateTime};

use crate::db::Db;
use crate::service::UserService;
use crate::urls::Urls;

/// Supplies "today", against which ages are computed and birth dates
/// validated.
pub type Clock = dyn Fn() -> Date + Send + Sync;

#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn Db>,
    pub urls: Arc<Urls>,
    pub clock: Arc<Clock>,
    pub config: Config,
}

impl Environment {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db>,
        urls: Arc<Urls>,
        clock: Arc<Clock>,
        config: Config,
    ) -> Self {
        Self {
            logger,
            db,
            urls,
            clock,
            config,
        }
    }

    pub fn users(&self) -> UserService {
        UserService::new(
            self.logger.clone(),
            self.db.clone(),
            self.clock.clone(),
            self.config,
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// How many times a creation is attempted before giving up on
    /// transient allocation failures.
    pub(crate) creation_attempts: u8,
}

impl Config {
    pub fn new(creation_attempts: u8) -> Self {
        Self {
            creation_attempts: creation_attempts.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(5)
    }
}

/// The current UTC date.
pub fn system_clock() -> Arc<Clock> {
    Arc::new(|| OffsetDateTime::now_utc().date())
}
