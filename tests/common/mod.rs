//! Local stand-in for the inventory REST API, served with axum.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
pub struct FakeNetbox {
    pub devices: Vec<Value>,
    pub sites: Vec<Value>,
    pub circuits: Vec<Value>,
    /// Devices per page on the unfiltered device listing.
    pub page_size: usize,
    /// Number of device requests to answer with 503 before serving.
    pub failures: AtomicUsize,
    pub device_hits: AtomicUsize,
    pub tokens: Mutex<Vec<String>>,
    pub addr: Mutex<Option<SocketAddr>>,
}

pub fn device(id: u64, name: &str, address: &str, slug: &str, site_id: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "primary_ip": { "address": address },
        "primary_ip4": { "address": address },
        "device_type": { "slug": slug, "model": "FortiGate" },
        "site": { "id": site_id, "name": format!("site-{site_id}") },
        "status": { "value": "active" },
    })
}

pub fn site(id: u64, speed: Value) -> Value {
    json!({ "id": id, "custom_fields": { "cf_speed": speed } })
}

pub fn circuit(id: u64, site_id: u64, speed: Value) -> Value {
    json!({
        "id": id,
        "custom_fields": { "cf_site": { "id": site_id }, "cf_speed": speed },
    })
}

impl FakeNetbox {
    pub fn new(devices: Vec<Value>) -> Self {
        Self {
            devices,
            page_size: 100,
            ..Self::default()
        }
    }

    /// Serve on an ephemeral local port and return the base URL.
    pub async fn serve(self) -> (String, Arc<Self>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        *self.addr.lock().unwrap() = Some(addr);

        let state = Arc::new(self);
        let app = Router::new()
            .route("/api/dcim/devices/", get(devices))
            .route("/api/dcim/sites/", get(sites))
            .route("/api/circuits/circuits/", get(circuits))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), state)
    }
}

fn page(results: Vec<Value>, next: Option<String>) -> Json<Value> {
    Json(json!({ "count": results.len(), "next": next, "previous": null, "results": results }))
}

async fn devices(
    State(nb): State<Arc<FakeNetbox>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    nb.device_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        nb.tokens.lock().unwrap().push(auth.to_string());
    }

    let remaining = nb.failures.load(Ordering::SeqCst);
    if remaining > 0 {
        nb.failures.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    if let Some(name) = params.get("name") {
        let found = nb.devices.iter().filter(|d| d["name"] == name.as_str()).cloned().collect();
        return page(found, None).into_response();
    }
    if let Some(ip) = params.get("primary_ip4") {
        let found = nb
            .devices
            .iter()
            .filter(|d| d["primary_ip4"]["address"] == ip.as_str())
            .cloned()
            .collect();
        return page(found, None).into_response();
    }

    let offset: usize = params.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
    let end = (offset + nb.page_size).min(nb.devices.len());
    let results = nb.devices[offset.min(end)..end].to_vec();
    let next = (end < nb.devices.len()).then(|| {
        let addr = nb.addr.lock().unwrap().unwrap();
        format!("http://{addr}/api/dcim/devices/?limit={}&offset={end}", nb.page_size)
    });
    page(results, next).into_response()
}

async fn sites(
    State(nb): State<Arc<FakeNetbox>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let id: Option<u64> = params.get("id").and_then(|v| v.parse().ok());
    let found = nb
        .sites
        .iter()
        .filter(|s| id.is_none() || s["id"].as_u64() == id)
        .cloned()
        .collect();
    page(found, None)
}

async fn circuits(State(nb): State<Arc<FakeNetbox>>) -> Json<Value> {
    page(nb.circuits.clone(), None)
}
