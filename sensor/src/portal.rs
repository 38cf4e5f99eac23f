use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    runtime::Handle,
    sync::{mpsc, oneshot},
};
use tracing::{info, warn};

use co2_common::{
    error::PortalError,
    link::{PortalEvent, ProvisioningResult, Provisioner},
};

use crate::form::{PortalSubmission, ProvisionResponse, CAPTIVE_PATHS, MAX_FORM_BODY, PORTAL_HTML};

#[derive(Clone)]
struct PortalState {
    ap_ssid: Arc<str>,
    results: mpsc::UnboundedSender<ProvisioningResult>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Setup page served over the host network in place of a soft access point.
pub struct HttpPortal {
    port: u16,
    results: Option<mpsc::UnboundedReceiver<ProvisioningResult>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl HttpPortal {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            results: None,
            shutdown: None,
        }
    }
}

impl Provisioner for HttpPortal {
    fn start(&mut self, ap_ssid: &str, password: &str) -> Result<(), PortalError> {
        self.stop();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener =
            tokio::task::block_in_place(|| Handle::current().block_on(TcpListener::bind(addr)))
                .map_err(|err| PortalError::Start(format!("failed to bind {addr}: {err}")))?;

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(PortalState {
            ap_ssid: Arc::from(ap_ssid),
            results: results_tx,
        });

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                warn!("config portal server failed: {err}");
            }
        });

        info!("config portal `{ap_ssid}` listening on http://{addr} (access point password `{password}`)");
        self.results = Some(results_rx);
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    fn poll(&mut self) -> Option<PortalEvent> {
        self.results
            .as_mut()?
            .try_recv()
            .ok()
            .map(PortalEvent::Completed)
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            info!("config portal closed");
        }
        self.results = None;
    }
}

fn router(state: PortalState) -> Router {
    let mut app = Router::new();
    for path in CAPTIVE_PATHS {
        app = app.route(path, get(handle_page));
    }
    app.route("/api/provision", post(handle_provision))
        .layer(DefaultBodyLimit::max(MAX_FORM_BODY))
        .with_state(state)
}

async fn handle_page(State(state): State<PortalState>) -> impl IntoResponse {
    Html(PORTAL_HTML.replace("SMOCA CO2 Sensor</h1>", &format!("{}</h1>", state.ap_ssid)))
}

async fn handle_provision(
    State(state): State<PortalState>,
    Json(submission): Json<PortalSubmission>,
) -> impl IntoResponse {
    if let Err(message) = submission.validate() {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let result = submission.into_result();
    let networks = result.networks.len();
    if state.results.send(result).is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "config portal is closing");
    }

    info!("config portal received {networks} network(s)");
    Json(ProvisionResponse {
        accepted: true,
        networks,
    })
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
