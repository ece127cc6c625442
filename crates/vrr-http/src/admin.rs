//! The HTTP admin surface: REST endpoints over the Gateway Coordinator.
//!
//! Grounded on the upstream `pkg/rest/*.go` + `pkg/router/http.go`: one
//! route per resource, JSON in and out, a fixed `"success"` body on a
//! successful mutation, and a YAML-rendered route table at `/api/urls`.
//! Every route runs behind [`crate::auth::require_basic_auth`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use vrr_net::{Dnat, Gateway, Interface, Snat};

use crate::auth;

/// Builds the full admin router, with basic auth already applied.
pub fn build_router(gateway: Arc<Gateway>, token: Arc<String>) -> Router {
    Router::new()
        .route("/api/urls", get(list_urls))
        .route(
            "/api/interface",
            get(list_interface).post(add_interface).delete(del_interface),
        )
        .route("/api/vlan", get(list_interface).post(add_vlan).delete(del_vlan))
        .route("/api/forward", get(list_forward))
        .route("/api/snat", get(list_snat).post(add_snat).delete(del_snat))
        .route("/api/dnat", get(list_dnat).post(add_dnat).delete(del_dnat))
        .fallback(not_found)
        .with_state(gateway)
        .layer(axum::middleware::from_fn_with_state(
            token,
            auth::require_basic_auth,
        ))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Oops!").into_response()
}

fn success() -> Response {
    Json("success").into_response()
}

fn bad_request(err: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

/// The complete admin route table, rendered at `/api/urls` the way the
/// upstream server renders its `mux.Router.Walk` output — hardcoded here
/// since axum has no route-introspection API to walk at runtime.
const ROUTE_TABLE: &[(&str, &str)] = &[
    ("GET", "/api/urls"),
    ("GET", "/api/interface"),
    ("POST", "/api/interface"),
    ("DELETE", "/api/interface"),
    ("GET", "/api/vlan"),
    ("POST", "/api/vlan"),
    ("DELETE", "/api/vlan"),
    ("GET", "/api/forward"),
    ("GET", "/api/snat"),
    ("POST", "/api/snat"),
    ("DELETE", "/api/snat"),
    ("GET", "/api/dnat"),
    ("POST", "/api/dnat"),
    ("DELETE", "/api/dnat"),
];

async fn list_urls() -> Response {
    let lines: Vec<String> = ROUTE_TABLE
        .iter()
        .map(|(method, path)| format!("{:<6} {}", method, path))
        .collect();
    match serde_yaml::to_string(&lines) {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn list_interface(State(gateway): State<Arc<Gateway>>) -> Response {
    match gateway.list_interface().await {
        Ok(items) => Json(items).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn add_interface(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<Interface>,
) -> Response {
    match gateway.add_interface(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn del_interface(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<Interface>,
) -> Response {
    match gateway.del_interface(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn add_vlan(State(gateway): State<Arc<Gateway>>, Json(body): Json<Interface>) -> Response {
    match gateway.add_vlan(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn del_vlan(State(gateway): State<Arc<Gateway>>, Json(body): Json<Interface>) -> Response {
    match gateway.del_vlan(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn list_forward(State(gateway): State<Arc<Gateway>>) -> Response {
    match gateway.list_forward().await {
        Ok(items) => Json(items).into_response(),
        Err(e) => bad_request(e),
    }
}

/// The upstream handler for this route responds with a bare JSON null
/// too (`pkg/rest/nat.go`'s `List` is a stub); SNAT/DNAT rules live only
/// as OVS flow state, never mirrored into the coordinator's in-memory
/// map, so there is nothing else to report here.
async fn list_snat() -> Response {
    Json(serde_json::Value::Null).into_response()
}

async fn add_snat(State(gateway): State<Arc<Gateway>>, Json(body): Json<Snat>) -> Response {
    match gateway.add_snat(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn del_snat(State(gateway): State<Arc<Gateway>>, Json(body): Json<Snat>) -> Response {
    match gateway.del_snat(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn list_dnat() -> Response {
    Json(serde_json::Value::Null).into_response()
}

async fn add_dnat(State(gateway): State<Arc<Gateway>>, Json(body): Json<Dnat>) -> Response {
    match gateway.add_dnat(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}

async fn del_dnat(State(gateway): State<Arc<Gateway>>, Json(body): Json<Dnat>) -> Response {
    match gateway.del_dnat(&body).await {
        Ok(()) => success(),
        Err(e) => bad_request(e),
    }
}
