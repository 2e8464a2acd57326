//! One-shot loopback listener for the OAuth redirect.
//!
//! The listener is bound before the browser is opened so a port conflict is
//! reported up front. The first request to arrive fulfils a oneshot channel;
//! the server is then shut down gracefully.

use crate::errors::FixError;
use axum::Router;
use axum::extract::State;
use axum::http::{Uri, header};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const RETURN_MESSAGE: &str = "Please return to the application.";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type RedirectSlot = Arc<Mutex<Option<oneshot::Sender<Uri>>>>;

/// Query parameters of the redirect, first value per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    pub fn from_uri(uri: &Uri) -> Self {
        let mut params = HashMap::new();
        let Some(query) = uri.query() else {
            return Self(params);
        };
        if let Ok(url) = Url::parse(&format!("http://localhost/?{query}")) {
            for (key, value) in url.query_pairs() {
                params
                    .entry(key.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
        }
        Self(params)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.get("code")
    }

    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    pub fn error(&self) -> Option<&str> {
        self.get("error")
    }

    pub fn error_description(&self) -> Option<&str> {
        self.get("error_description")
    }
}

pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CallbackListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, FixError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| FixError::CallbackBind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| FixError::CallbackBind { addr, source })?;
        tracing::debug!(%local_addr, "redirect listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until one request arrives or `timeout` elapses, then close.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackParams, FixError> {
        let (redirect_tx, redirect_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: RedirectSlot = Arc::new(Mutex::new(Some(redirect_tx)));

        let app = Router::new().fallback(handle_redirect).with_state(slot);
        let mut server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = tokio::time::timeout(timeout, redirect_rx).await;

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Err(error))) => tracing::warn!("redirect listener error: {error}"),
            Ok(Err(error)) => tracing::warn!("redirect listener task failed: {error}"),
            Err(_) => {
                tracing::debug!("redirect listener still draining connections; aborting");
                server.abort();
                let _ = server.await;
            }
            Ok(Ok(Ok(()))) => {}
        }

        match outcome {
            Ok(Ok(uri)) => Ok(CallbackParams::from_uri(&uri)),
            Ok(Err(_)) => Err(FixError::CallbackClosed),
            Err(_) => Err(FixError::CallbackTimeout(timeout)),
        }
    }
}

async fn handle_redirect(State(slot): State<RedirectSlot>, uri: Uri) -> impl IntoResponse {
    if let Some(sender) = slot.lock().take() {
        let _ = sender.send(uri);
    }
    ([(header::CONNECTION, "close")], RETURN_MESSAGE)
}
