use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tapline::{
    CaptureConfig, LogRecord, MultiSink, RecordSink, RequestCaptureLayer, SinkError, TracingSink,
};
use tokio::{net::TcpListener, time::sleep};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sink that keeps the last few records in memory so `/records` can show them
#[derive(Debug, Clone, Default)]
struct RecentRecords {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

const KEEP_RECORDS: usize = 50;

impl RecordSink for RecentRecords {
    async fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| SinkError::Unavailable("record store poisoned".to_owned()))?;
        if records.len() == KEEP_RECORDS {
            records.remove(0);
        }
        records.push(record);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Employee {
    #[serde(rename = "ID")]
    id: u32,
    name: String,
    title: String,
}

async fn employee_handler(Path(id): Path<u32>) -> Result<Json<Employee>, StatusCode> {
    sleep(Duration::from_millis(20)).await; // Simulate a database lookup
    match id {
        1..=10 => Ok(Json(Employee {
            id,
            name: format!("Employee {id}"),
            title: "Engineer".to_owned(),
        })),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap_or_default()
}

async fn panic_handler() -> &'static str {
    panic!("something went badly wrong")
}

async fn records_handler(State(recent): State<RecentRecords>) -> impl IntoResponse {
    let records = recent
        .records
        .lock()
        .map(|r| r.clone())
        .unwrap_or_default();
    Json(serde_json::json!({
        "total_records": records.len(),
        "records": records
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tapline=debug")),
        )
        .init();

    info!("Starting capture demo server");

    let recent = RecentRecords::default();
    let sink = MultiSink::new().with(TracingSink).with(recent.clone());
    let config = CaptureConfig::from_env();

    let app = Router::new()
        .route("/api/employee/{id}", get(employee_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/panic", get(panic_handler))
        // Innermost first: panics become 500 responses before the capture layer sees them
        .layer(CatchPanicLayer::new())
        .layer(RequestCaptureLayer::new(config, sink))
        .layer(TraceLayer::new_for_http())
        .route("/records", get(records_handler))
        .with_state(recent);

    info!("Demo server endpoints:");
    info!("  GET  /api/employee/{{id}} - Employee lookup (1-10 exist)");
    info!("  POST /echo              - Echo request body");
    info!("  GET  /streaming         - Streaming response");
    info!("  GET  /panic             - Handler that panics");
    info!("  GET  /records           - Recently captured records (not itself captured)");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/api/employee/5");
    info!("  curl -X POST -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/panic");
    info!("  curl http://localhost:3000/records");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
