use serde::Serialize;
use warp::http::StatusCode;
use warp::reject;

use crate::errors::BackendError;

#[derive(Debug)]
pub struct Rejection {
    pub(crate) context: Context,
    pub(crate) error: BackendError,
}

impl Rejection {
    pub fn new(context: Context, error: BackendError) -> Self {
        Rejection { context, error }
    }

    pub fn flatten(&self, status: StatusCode) -> FlattenedRejection {
        FlattenedRejection {
            context: self.context.clone(),
            code: status.as_u16(),
            message: format!("{}", self.error),
        }
    }
}

impl reject::Reject for Rejection {}

#[derive(Debug, Serialize)]
pub struct FlattenedRejection {
    #[serde(flatten)]
    pub(crate) context: Context,
    pub(crate) code: u16,
    pub(crate) message: String,
}

/// What the request was about, echoed back next to the error.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Context {
    CreateUsers {
        /// Position of the failing item when a list was submitted.
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    ListUsers {
        #[serde(skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    RetrieveUser {
        id: String,
    },
    UpdateUser {
        id: String,
    },
    ListGroups {
        #[serde(skip_serializing_if = "Option::is_none")]
        base: Option<String>,
    },
    RetrieveGroup {
        name: String,
    },
}

impl Context {
    pub fn create_users(index: Option<usize>) -> Context {
        Context::CreateUsers { index }
    }

    pub fn list_users(group: Option<String>) -> Context {
        Context::ListUsers { group }
    }

    pub fn retrieve_user(id: String) -> Context {
        Context::RetrieveUser { id }
    }

    pub fn update_user(id: String) -> Context {
        Context::UpdateUser { id }
    }

    pub fn list_groups(base: Option<String>) -> Context {
        Context::ListGroups { base }
    }

    pub fn retrieve_group(name: String) -> Context {
        Context::RetrieveGroup { name }
    }
}
