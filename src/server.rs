use crate::gateway::{Gateway, Reply};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for the shim
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a JSON response - infallible with static header
fn json_response(body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with static header")
}

fn empty_response() -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::new()))
}

/// Fault replies stay HTTP 200 and carry the platform's fault status header
fn fault_response(header: &str, value: &str, body: String) -> Response<Full<Bytes>> {
    let body = Bytes::from(body);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; charset=utf-8")
        .header(header, value)
        .body(Full::new(body.clone()))
        .unwrap_or_else(|e| {
            error!(header, error = %e, "Invalid fault status header, sending fault without it");
            Response::new(Full::new(body))
        })
}

/// Convert a gateway reply into the HTTP response written to the client
pub fn reply_to_response(gateway: &Gateway, reply: Reply) -> Response<Full<Bytes>> {
    match reply {
        Reply::Probe => empty_response(),
        Reply::Response(envelope) => json_response(envelope.to_json()),
        Reply::Fault(fault) => {
            let platform = gateway.platform();
            fault_response(
                &platform.fault_status_header,
                &platform.fault_status_value,
                fault.to_string(),
            )
        }
    }
}

/// HTTP front end for the command gateway
pub struct ShimServer {
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ShimServer {
    /// Bind the listener; use port 0 for an ephemeral port
    pub async fn bind(
        bind_addr: SocketAddr,
        gateway: Arc<Gateway>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            gateway,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, "Command endpoint listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, gateway).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Command endpoint shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, gateway: Arc<Gateway>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let gateway = Arc::clone(&gateway);
        async move { handle_request(req, gateway).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let control = req
        .headers()
        .get(gateway.platform().control_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    debug!(method = %req.method(), path = %req.uri().path(), "Inbound request");

    // Probes are answered without reading the body
    if gateway.is_probe(control.as_deref()) {
        return Ok(reply_to_response(&gateway, Reply::Probe));
    }

    let reply = match req.into_body().collect().await {
        Ok(collected) => gateway.handle(control.as_deref(), &collected.to_bytes()).await,
        Err(e) => Reply::from_error(crate::error::ShimError::ReadBody(e.to_string())),
    };

    Ok(reply_to_response(&gateway, reply))
}
