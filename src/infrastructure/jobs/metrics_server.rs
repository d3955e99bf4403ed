use super::sync_metrics::SyncMetricsRecorder;
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tokio::task::JoinHandle;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

fn metrics_response(recorder: &SyncMetricsRecorder) -> Response<std::io::Cursor<Vec<u8>>> {
    match recorder.encode() {
        Ok(body) => {
            let response = Response::from_data(body).with_status_code(StatusCode(200));
            match Header::from_bytes("Content-Type", CONTENT_TYPE) {
                Ok(header) => response.with_header(header),
                Err(()) => response,
            }
        }
        Err(err) => {
            tracing::error!(
                target: "popularity::metrics",
                error = %err,
                "failed to encode metrics payload"
            );
            Response::from_string("failed to encode metrics").with_status_code(StatusCode(500))
        }
    }
}

pub fn spawn_prometheus_exporter(
    port: u16,
    recorder: Arc<SyncMetricsRecorder>,
) -> JoinHandle<()> {
    let address = format!("127.0.0.1:{port}");
    tokio::task::spawn_blocking(move || match Server::http(&address) {
        Ok(server) => {
            tracing::info!(
                target: "popularity::metrics",
                port,
                "prometheus exporter listening"
            );
            for request in server.incoming_requests() {
                let response = if request.method() == &Method::Get && request.url() == "/metrics" {
                    metrics_response(&recorder)
                } else {
                    Response::from_string("not found").with_status_code(StatusCode(404))
                };

                if let Err(err) = request.respond(response) {
                    tracing::warn!(
                        target: "popularity::metrics",
                        error = %err,
                        "failed to respond to metrics request"
                    );
                }
            }
        }
        Err(err) => {
            tracing::error!(
                target: "popularity::metrics",
                port,
                error = %err,
                "failed to bind prometheus exporter"
            );
        }
    })
}
