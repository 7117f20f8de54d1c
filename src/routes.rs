use std::sync::Arc;

use log::{error, info, Logger};
use warp::http::StatusCode;
use warp::reject;
use warp::reply::{json, with_status, Json, Reply, WithStatus};
use warp::Filter;

use crate::environment::Environment;
use crate::errors::BackendError;

pub mod admin;
mod handlers;
mod query;
mod rejection;
mod response;

pub use internal::*;

/// The largest request body to accept. A batch of a few hundred
/// users fits comfortably.
const MAX_CONTENT_LENGTH: u64 = 256 * 1024;

/// Every public route, with backend errors rendered as JSON.
pub fn make_api_routes(
    environment: Environment,
) -> impl Filter<Extract = (impl Reply,), Error = reject::Rejection> + Clone {
    let logger = environment.logger.clone();

    make_create_user_route(environment.clone())
        .or(make_list_users_route(environment.clone()))
        .or(make_retrieve_user_route(environment.clone()))
        .or(make_update_user_route(environment.clone()))
        .or(make_list_groups_route(environment.clone()))
        .or(make_retrieve_group_route(environment.clone()))
        .or(make_health_route(environment))
        .recover(move |r| format_rejection(logger.clone(), r))
}

pub async fn format_rejection(
    logger: Arc<Logger>,
    rej: reject::Rejection,
) -> Result<WithStatus<Json>, reject::Rejection> {
    if let Some(r) = rej.find::<rejection::Rejection>() {
        let status = status_code_for(&r.error);

        if status.is_server_error() {
            error!(logger, "Backend error"; "context" => ?r.context, "error" => ?r.error, "status" => %status, "message" => %r.error);
        } else {
            info!(logger, "Rejected request"; "context" => ?r.context, "status" => %status, "message" => %r.error);
        }

        return Ok(with_status(json(&r.flatten(status)), status));
    }

    Err(rej)
}

fn status_code_for(e: &BackendError) -> StatusCode {
    use BackendError::*;

    match e {
        MalformedBody(..)
        | InvalidId(..)
        | InvalidCategory(..)
        | NameRequired
        | InvalidEmail(..)
        | EmailAlreadyExists
        | InvalidDateOfBirth(..)
        | DateOfBirthInFuture => StatusCode::BAD_REQUEST,
        UserNotFound(..) | GroupNotFound(..) => StatusCode::NOT_FOUND,
        RetriesExhausted { .. }
        | GroupFull { .. }
        | AllocationConflict { .. }
        | TransactionAborted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Sqlx { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

mod internal {
    use warp::body::{bytes, content_length_limit};
    use warp::filters::BoxedFilter;
    use warp::path::end;
    use warp::Filter;
    use warp::Reply;
    use warp::{get as g, patch, path as p, path::param as par, post, put, query};

    use super::{handlers, query as q, MAX_CONTENT_LENGTH};
    use crate::environment::Environment;
    use crate::urls::API_PREFIX;

    type Route = BoxedFilter<(Box<dyn Reply>,)>;

    macro_rules! route_filter {
    ($route_variable:ident; $first:expr) => (let $route_variable = $route_variable.and($first););
    ($route_variable:ident; $first:expr, $($rest:expr),+) => (
        let $route_variable = $route_variable.and($first);
        route_filter!($route_variable; $($rest),+);
    )
}

    macro_rules! route {
    ($name:ident => $handler:ident, $route_variable:ident; $($filters:expr),+) => (
        pub fn $name(environment: Environment) -> Route {
            let $route_variable = warp::any()
                .map(move || environment.clone())
                .and(p(API_PREFIX[0]))
                .and(p(API_PREFIX[1]));

            route_filter!($route_variable; $($filters),+);

            $route_variable.and_then(handlers::$handler)
                .boxed()
        }
    );
}

    route!(make_create_user_route => create_users, rt; p("users"), end(), post(), content_length_limit(MAX_CONTENT_LENGTH), bytes());
    route!(make_list_users_route => list_users, rt; p("users"), end(), g(), query::<q::UserQuery>());
    route!(make_retrieve_user_route => retrieve_user, rt; p("users"), par::<String>(), end(), g());
    route!(make_update_user_route => update_user, rt; p("users"), par::<String>(), end(), put().or(patch()).unify(), content_length_limit(MAX_CONTENT_LENGTH), bytes());
    route!(make_list_groups_route => list_groups, rt; p("groups"), end(), g(), query::<q::GroupQuery>());
    route!(make_retrieve_group_route => retrieve_group, rt; p("groups"), par::<String>(), end(), g());

    /// Liveness for load balancers; lives outside the API prefix.
    pub fn make_health_route(environment: Environment) -> Route {
        warp::any()
            .map(move || environment.clone())
            .and(p("health"))
            .and(end())
            .and(g())
            .and_then(handlers::health)
            .boxed()
    }
}
