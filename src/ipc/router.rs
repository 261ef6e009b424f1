use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: [TryHandle; 13] = [
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::admin::try_handle,
    handlers::students::try_handle,
    handlers::subjects::try_handle,
    handlers::enrollments::try_handle,
    handlers::clearance::try_handle,
    handlers::grades::try_handle,
    handlers::settings::try_handle,
    handlers::faculty::try_handle,
    handlers::notifications::try_handle,
    handlers::programs::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(method = %req.method, id = %req.id, "request");
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
