use serde::{Deserialize, Serialize, Serializer};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// A single user in the database.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    /// The ID of the user.
    pub(crate) id: Uuid,

    /// The name provided, trimmed.
    pub(crate) name: String,

    /// The email provided, lowercased. Unique across users.
    pub(crate) email: String,

    #[serde(serialize_with = "serialize_date")]
    pub(crate) date_of_birth: Date,

    /// The group assigned at creation. Never changes afterwards.
    #[serde(rename = "group")]
    pub(crate) group_name: String,

    /// The times it was created and updated.
    #[serde(flatten)]
    pub(crate) times: Times,
}

impl User {
    pub fn new(
        id: Uuid,
        name: String,
        email: String,
        date_of_birth: Date,
        group_name: String,
        times: Times,
    ) -> Self {
        User {
            id,
            name,
            email,
            date_of_birth,
            group_name,
            times,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn date_of_birth(&self) -> Date {
        self.date_of_birth
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }
}

/// A validated user about to be inserted.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) date_of_birth: Date,
    pub(crate) group_name: String,
}

impl NewUser {
    pub fn new(
        id: Uuid,
        name: String,
        email: String,
        date_of_birth: Date,
        group_name: String,
    ) -> Self {
        NewUser {
            id,
            name,
            email,
            date_of_birth,
            group_name,
        }
    }

    pub fn into_user(self, now: OffsetDateTime) -> User {
        User::new(
            self.id,
            self.name,
            self.email,
            self.date_of_birth,
            self.group_name,
            Times::at(now),
        )
    }
}

/// The body of a creation request, before validation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreationRequest {
    pub name: String,
    pub email: String,

    /// `YYYY-MM-DD`.
    pub date_of_birth: String,
}

/// Creation accepts either one user or a list of them.
#[derive(Clone, Debug)]
pub enum CreationBody {
    Many(Vec<CreationRequest>),
    One(CreationRequest),
}

impl CreationBody {
    /// Parses a JSON array as a list and anything else as one
    /// request, so parse errors name the offending field.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') => serde_json::from_slice(body).map(CreationBody::Many),
            _ => serde_json::from_slice(body).map(CreationBody::One),
        }
    }
}

/// The body of an update request. The group is deliberately absent:
/// sending it is rejected as an unknown field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

/// The creation and modification times of a row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Times {
    /// The date and time it was created.
    #[serde(with = "time::serde::timestamp")]
    pub(crate) created_at: OffsetDateTime,

    /// The date and time it was last modified.
    #[serde(with = "time::serde::timestamp")]
    pub(crate) updated_at: OffsetDateTime,
}

impl Times {
    pub fn new(created_at: OffsetDateTime, updated_at: OffsetDateTime) -> Self {
        Times {
            created_at,
            updated_at,
        }
    }

    pub fn at(now: OffsetDateTime) -> Self {
        Times::new(now, now)
    }
}

fn serialize_date<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.format("%F"))
}
