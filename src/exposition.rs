//! HTTP exposition of a registry.
//!
//! [`Exposition`] owns a small tokio runtime that is built on the first call to
//! [`Exposition::serve`] and shut down in the background when dropped. Each
//! `serve` binds its socket on the calling thread, so a bind failure is
//! returned to the caller, and then hands the listener to an axum server
//! running on the runtime. The call returns as soon as the server task is
//! spawned.
//!
//! ```text
//!   serve(addr, path)
//!        │ std::net::TcpListener::bind   (errors returned here)
//!        ▼
//!   tokio runtime  ({prefix}-expo-NNNN threads)
//!        │ axum::serve
//!        ▼
//!   GET {path} -> TextEncoder(registry.gather())
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

/// Background listeners serving the text exposition format.
pub struct Exposition {
    thread_prefix: Arc<str>,
    threads: usize,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    listeners: Mutex<Vec<SocketAddr>>,
}

impl Exposition {
    pub fn new(thread_prefix: &str, threads: usize) -> Self {
        Self {
            thread_prefix: thread_prefix.into(),
            threads: threads.max(1),
            runtime: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Serve `registry` at `path` on `addr`.
    ///
    /// `addr` accepts anything `std::net::TcpListener::bind` does, plus the
    /// `:port` shorthand for all interfaces. `path` gets a leading `/` if it
    /// lacks one. Returns the bound address, which tells the caller the port
    /// chosen for `:0`.
    pub fn serve(&self, addr: &str, path: &str, registry: Registry) -> Result<SocketAddr> {
        let path = normalize_path(path)?;
        let bind_addr = normalize_addr(addr);

        let std_listener =
            std::net::TcpListener::bind(bind_addr.as_str()).map_err(|source| BridgeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|source| BridgeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|source| BridgeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        let app = Router::new()
            .route(&path, get(render_metrics))
            .with_state(registry);

        let mut guard = self.runtime.lock();
        if guard.is_none() {
            *guard = Some(self.build_runtime()?);
        }
        let runtime = guard.as_ref().ok_or_else(|| {
            BridgeError::Runtime(std::io::Error::other("exposition runtime missing"))
        })?;

        let listener = {
            let _guard = runtime.enter();
            tokio::net::TcpListener::from_std(std_listener).map_err(|source| {
                BridgeError::Bind {
                    addr: bind_addr.clone(),
                    source,
                }
            })?
        };

        runtime.spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(%e, %local_addr, "exposition listener stopped");
            }
        });

        self.listeners.lock().push(local_addr);
        info!(%local_addr, %path, "exposition listener started");
        Ok(local_addr)
    }

    /// Addresses of the listeners started so far.
    pub fn listeners(&self) -> Vec<SocketAddr> {
        self.listeners.lock().clone()
    }

    fn build_runtime(&self) -> Result<tokio::runtime::Runtime> {
        let thread_counter = Arc::new(AtomicUsize::new(0));
        let name_prefix = Arc::clone(&self.thread_prefix);
        let start_prefix = Arc::clone(&self.thread_prefix);

        debug!(threads = self.threads, prefix = %self.thread_prefix, "building exposition runtime");
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.threads)
            .thread_name_fn(move || {
                let id = thread_counter.fetch_add(1, Ordering::SeqCst);
                format!("{}-expo-{:04}", name_prefix, id)
            })
            .on_thread_start(move || {
                debug!(%start_prefix, "exposition thread starting");
            })
            .enable_all()
            .build()
            .map_err(BridgeError::Runtime)
    }
}

impl Drop for Exposition {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.lock().take() {
            // Never block the thread tearing the bridge down
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Exposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exposition")
            .field("thread_prefix", &self.thread_prefix)
            .field("threads", &self.threads)
            .field("listeners", &*self.listeners.lock())
            .finish()
    }
}

async fn render_metrics(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(%e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Expand `:port` to `0.0.0.0:port`.
fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim();
    // Router syntax characters would be read as captures or wildcards
    let malformed = path
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '*' | ':' | '{' | '}'));
    if path.is_empty() || malformed {
        return Err(BridgeError::InvalidPath(path.to_string()));
    }
    if path.starts_with('/') {
        Ok(path.to_string())
    } else {
        Ok(format!("/{path}"))
    }
}
