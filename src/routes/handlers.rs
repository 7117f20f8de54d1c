use std::time::{Duration, Instant};

use bytes::Bytes;
use log::debug;
use serde::de::DeserializeOwned;
use warp::{
    http::StatusCode,
    reject,
    reply::{json, with_header, with_status, Reply},
};

use crate::environment::Environment;
use crate::errors::BackendError;
use crate::routes::{
    query::{GroupQuery, UserQuery},
    rejection::{Context, Rejection},
    response::SuccessResponse,
};
use crate::user::{CreationBody, UpdateRequest};

const SERVER_TIMING_HEADER: &str = "server-timing";
type RouteResult = Result<Box<dyn Reply>, reject::Rejection>;

macro_rules! timed {
    ($($expression:stmt);+) => {
        let start = Instant::now();

        // TODO when `try` blocks are stabilized, we can wrap the body
        // and return the headers even on errors
        let result = { $($expression)+ };

        Ok(Box::new(with_header(
            result,
            SERVER_TIMING_HEADER,
            format_server_timing(start.elapsed()),
        )) as Box<dyn Reply>)
    };
}

pub async fn create_users(environment: Environment, body: Bytes) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::create_users(None), e);

        let body = CreationBody::from_slice(&body)
            .map_err(BackendError::MalformedBody)
            .map_err(error_handler)?;
        let users = environment.users();

        let reply = match body {
            CreationBody::One(request) => {
                debug!(environment.logger, "Creating user...");
                let user = users.create(request).await.map_err(error_handler)?;

                Box::new(with_header(
                    with_status(json(&user), StatusCode::CREATED),
                    "location",
                    environment.urls.user(user.id()).as_str(),
                )) as Box<dyn Reply>
            }
            CreationBody::Many(requests) => {
                debug!(environment.logger, "Creating users..."; "count" => requests.len());
                let created = users
                    .create_many(requests)
                    .await
                    .map_err(|(index, e)| Rejection::new(Context::create_users(Some(index)), e))?;

                Box::new(with_status(json(&created), StatusCode::CREATED)) as Box<dyn Reply>
            }
        };

        reply
    }
}

pub async fn list_users(environment: Environment, query: UserQuery) -> RouteResult {
    timed! {
        let UserQuery { group } = query;

        let users = environment
            .users()
            .list(group.as_deref())
            .await
            .map_err(|e| Rejection::new(Context::list_users(group.clone()), e))?;

        json(&users)
    }
}

pub async fn retrieve_user(environment: Environment, id: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::retrieve_user(id.clone()), e);

        let user = environment.users().get(&id).await.map_err(error_handler)?;

        json(&user)
    }
}

pub async fn update_user(environment: Environment, id: String, body: Bytes) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::update_user(id.clone()), e);

        let request: UpdateRequest = parse_body(&body).map_err(error_handler)?;
        debug!(environment.logger, "Updating user..."; "id" => &id);

        let user = environment
            .users()
            .update(&id, request)
            .await
            .map_err(error_handler)?;

        json(&user)
    }
}

pub async fn list_groups(environment: Environment, query: GroupQuery) -> RouteResult {
    timed! {
        let GroupQuery { base } = query;

        let groups = environment
            .users()
            .groups(base.as_deref())
            .await
            .map_err(|e| Rejection::new(Context::list_groups(base.clone()), e))?;

        json(&groups)
    }
}

pub async fn retrieve_group(environment: Environment, name: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::retrieve_group(name.clone()), e);

        let group = environment.users().group(&name).await.map_err(error_handler)?;

        json(&group)
    }
}

pub async fn health(_environment: Environment) -> RouteResult {
    timed! {
        json(&SuccessResponse::Health { status: "ok" })
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, BackendError> {
    serde_json::from_slice(body).map_err(BackendError::MalformedBody)
}

fn format_server_timing(seconds: Duration) -> String {
    format!("handler;dur={}", seconds.as_secs_f64() * 1000.0)
}
