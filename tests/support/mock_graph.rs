use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const ITEM_ID: &str = "item-1";
pub const TENANT: &str = "tenant-1";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

#[derive(Clone)]
pub struct MockOptions {
    pub worksheets: Value,
    pub repaired: Vec<u8>,
    pub token_response: Value,
    pub patch_status: StatusCode,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            worksheets: json!({ "value": [{ "id": "sheet-1", "name": "Sheet1" }] }),
            repaired: b"repaired workbook bytes".to_vec(),
            token_response: json!({
                "access_token": "fresh-token",
                "refresh_token": "rt-2",
                "expires_in": 3600
            }),
            patch_status: StatusCode::OK,
        }
    }
}

#[derive(Clone)]
struct MockState {
    base: String,
    options: MockOptions,
    log: Arc<Mutex<Vec<Recorded>>>,
}

/// In-process stand-in for Microsoft Graph and the token endpoint.
pub struct MockGraph {
    pub base: String,
    log: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl MockGraph {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let base = format!("http://{}", listener.local_addr().expect("mock addr"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            base: base.clone(),
            options,
            log: log.clone(),
        };
        let app = Router::new().fallback(handle).with_state(state);
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock");
        });
        Self { base, log, task }
    }

    pub fn graph_url(&self) -> String {
        format!("{}/v1.0", self.base)
    }

    pub fn download_url(&self) -> String {
        format!("{}/download", self.base)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    pub fn graph_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| !r.path.ends_with("/oauth2/v2.0/token"))
            .collect()
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = uri.path().to_string();
    state.log.lock().push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body: body.to_vec(),
    });

    let item_path = format!("/v1.0/me/drive/items/{ITEM_ID}");
    let token_path = format!("/{TENANT}/oauth2/v2.0/token");
    match method.as_str() {
        "PUT" if path.starts_with("/v1.0/me/drive/root:/") && path.ends_with(":/content") => {
            Json(json!({ "id": ITEM_ID, "name": "report.xlsm" })).into_response()
        }
        "GET" if path == format!("{item_path}/workbook/worksheets") => {
            Json(state.options.worksheets.clone()).into_response()
        }
        "PATCH" if path.starts_with(&item_path) && path.contains("/range(") => (
            state.options.patch_status,
            Json(json!({ "address": "Sheet1!XFD1048576" })),
        )
            .into_response(),
        "GET" if path == item_path => Json(json!({
            "id": ITEM_ID,
            "@microsoft.graph.downloadUrl": format!("{}/download", state.base)
        }))
        .into_response(),
        "GET" if path == "/download" => state.options.repaired.clone().into_response(),
        "POST" if path == token_path => {
            Json(state.options.token_response.clone()).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
