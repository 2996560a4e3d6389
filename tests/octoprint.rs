use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use printmgr_rs::config::OctoprintConfig;
use printmgr_rs::printers::octoprint::ApiVersion;
use printmgr_rs::printers::OctoprintPrinter;
use printmgr_rs::{Asset, CommandParams, DriverEvent, PrinterDriver};
use printmgr_shared::{DriverError, DriverState, JobState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What the fake OctoPrint instance knows and has been told.
#[derive(Default)]
struct Remote {
    api_enabled: bool,
    api_key: Option<String>,
    printing: bool,
    paused: bool,
    ignore_select: bool,
    selected: Option<String>,
    completion: f64,
    uploads: Vec<Upload>,
    jobs: Vec<String>,
    write_keys: Vec<Option<String>>,
    state_keys: Vec<String>,
}

#[derive(Debug, Clone)]
struct Upload {
    field: String,
    file_name: String,
    body: Vec<u8>,
}

type Shared = Arc<Mutex<Remote>>;

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn get_settings(State(remote): State<Shared>) -> Json<Value> {
    let remote = remote.lock();
    Json(json!({ "api": { "enabled": remote.api_enabled, "key": remote.api_key } }))
}

async fn post_settings(State(remote): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    let mut remote = remote.lock();
    remote.api_enabled = body["api"]["enabled"].as_bool().unwrap_or(false);
    remote.api_key = body["api"]["key"].as_str().map(str::to_string);
    StatusCode::OK
}

async fn get_state(
    State(remote): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut remote = remote.lock();
    if let Some(key) = query.get("apikey") {
        remote.state_keys.push(key.clone());
    }
    Json(json!({
        "state": { "flags": {
            "operational": true,
            "printing": remote.printing,
            "paused": remote.paused,
            "ready": !remote.printing && !remote.paused,
        }},
        "temperatures": { "tool0": { "actual": 210.5 }, "bed": { "actual": 60.0 } },
        "job": { "file": { "name": remote.selected }, "filename": remote.selected },
        "progress": { "completion": remote.completion },
    }))
}

async fn read_parts(mut multipart: Multipart) -> Vec<Upload> {
    let mut parts = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let body = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        parts.push(Upload {
            field: name,
            file_name,
            body,
        });
    }
    parts
}

async fn upload(State(remote): State<Shared>, headers: HeaderMap, multipart: Multipart) -> StatusCode {
    let parts = read_parts(multipart).await;
    let mut remote = remote.lock();
    remote.write_keys.push(api_key(&headers));
    remote.uploads.extend(parts);
    StatusCode::CREATED
}

async fn select(
    State(remote): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut remote = remote.lock();
    if body["command"] == "select" && !remote.ignore_select {
        remote.selected = Some(name);
    }
    StatusCode::NO_CONTENT
}

fn apply_job(remote: &mut Remote, command: &str) {
    remote.jobs.push(command.to_string());
    match command {
        "start" => remote.printing = true,
        "pause" => {
            remote.paused = !remote.paused;
            remote.printing = !remote.paused;
        }
        "cancel" => {
            remote.printing = false;
            remote.paused = false;
        }
        _ => {}
    }
}

async fn job(State(remote): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    let mut remote = remote.lock();
    remote.write_keys.push(api_key(&headers));
    let command = body["command"].as_str().unwrap_or_default().to_string();
    apply_job(&mut remote, &command);
    StatusCode::NO_CONTENT
}

async fn load_form(State(remote): State<Shared>, multipart: Multipart) -> StatusCode {
    let parts = read_parts(multipart).await;
    let name = parts
        .iter()
        .find(|p| p.field == "filename")
        .map(|p| String::from_utf8_lossy(&p.body).into_owned());
    remote.lock().selected = name;
    StatusCode::OK
}

async fn job_form(State(remote): State<Shared>, Form(body): Form<HashMap<String, String>>) -> StatusCode {
    let command = body.get("command").cloned().unwrap_or_default();
    apply_job(&mut remote.lock(), &command);
    StatusCode::OK
}

async fn serve(remote: Shared) -> String {
    let app = Router::new()
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/ajax/settings", get(get_settings).post(post_settings))
        .route("/api/state", get(get_state))
        .route("/api/files/local", post(upload))
        .route("/api/files/local/{name}", post(select))
        .route("/api/job", post(job))
        .route("/ajax/gcodefiles/upload", post(upload))
        .route("/ajax/gcodefiles/load", post(load_form))
        .route("/ajax/control/job", post(job_form))
        .with_state(remote);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(address: String, name: &str) -> OctoprintConfig {
    OctoprintConfig {
        address,
        name: name.to_string(),
        query_timeout_ms: 1000,
        heartbeat_ms: 20,
    }
}

async fn wait_for_state(printer: &OctoprintPrinter, state: DriverState) {
    for _ in 0..500 {
        if printer.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("printer never reached {}, still {}", state, printer.state());
}

fn model(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("cube.gcode");
    std::fs::write(&path, "G28\nG1 X10\n").unwrap();
    path
}

#[tokio::test]
async fn enables_the_api_and_runs_a_job() {
    let remote = Shared::default();
    let address = serve(remote.clone()).await;
    let printer = OctoprintPrinter::new(config(address, "octopi")).unwrap();
    assert_eq!(printer.api().version, ApiVersion::V1_1);
    wait_for_state(&printer, DriverState::Ready).await;

    let key = printer.api_key().unwrap();
    assert_eq!(key.len(), 32);
    {
        let remote = remote.lock();
        assert!(remote.api_enabled);
        assert_eq!(remote.api_key.as_deref(), Some(key.as_str()));
        assert_eq!(remote.state_keys.last(), Some(&key));
    }

    let dir = tempfile::tempdir().unwrap();
    let response = printer.loadmodel(Asset::file(model(dir.path()))).await;
    assert!(response.success);
    wait_for_state(&printer, DriverState::ModelLoaded).await;
    {
        let remote = remote.lock();
        let upload = remote.uploads.iter().find(|u| u.field == "file").unwrap();
        assert_eq!(upload.file_name, "cube.gcode");
        assert_eq!(upload.body, b"G28\nG1 X10\n");
        assert_eq!(remote.selected.as_deref(), Some("cube.gcode"));
        assert_eq!(remote.write_keys[0].as_deref(), Some(key.as_str()));
    }

    let response = printer.command(CommandParams::new("start")).await;
    assert!(response.success);
    assert_eq!(printer.state(), DriverState::Printing);

    assert_eq!(printer.pause().await.state, DriverState::Paused);
    assert!(printer.pause().await.success);
    assert_eq!(printer.resume().await.state, DriverState::Printing);
    assert!(printer.resume().await.success);
    assert_eq!(remote.lock().jobs, vec!["start", "pause", "pause"]);

    let status = printer.status().await;
    assert_eq!(status.state, DriverState::Printing);
    assert_eq!(status.sensors["extruder0"].temperature, Some(210.5));
    assert_eq!(status.job.name.as_deref(), Some("cube.gcode"));

    {
        let mut remote = remote.lock();
        remote.printing = false;
        remote.completion = 100.0;
    }
    let status = printer.status().await;
    assert_eq!(status.state, DriverState::Ready);
    assert_eq!(status.job.state, Some(JobState::Completed));
    assert!(printer.cancel().await.has_error(DriverError::BadState));

    printer.cleanup().await;
    assert_eq!(printer.state(), DriverState::Disconnected);
}

#[tokio::test]
async fn series_printers_use_form_endpoints() {
    let remote = Shared::default();
    {
        let mut remote = remote.lock();
        remote.api_enabled = true;
        remote.api_key = Some("secret".into());
    }
    let address = serve(remote.clone()).await;
    let printer = OctoprintPrinter::new(config(address, "Type A Series 1")).unwrap();
    assert_eq!(printer.api().version, ApiVersion::TypeA);
    wait_for_state(&printer, DriverState::Ready).await;
    assert_eq!(printer.api_key().as_deref(), Some("secret"));

    let dir = tempfile::tempdir().unwrap();
    printer.loadmodel(Asset::file(model(dir.path()))).await;
    wait_for_state(&printer, DriverState::ModelLoaded).await;
    assert!(remote.lock().uploads.iter().any(|u| u.field == "gcode_file"));

    assert!(printer.print().await.success);
    assert!(printer.cancel().await.success);
    assert_eq!(printer.state(), DriverState::Ready);
    assert_eq!(remote.lock().jobs, vec!["start", "cancel"]);
}

#[tokio::test]
async fn unselected_upload_fails_the_load() {
    let remote = Shared::default();
    remote.lock().ignore_select = true;
    let address = serve(remote.clone()).await;
    let printer = OctoprintPrinter::new(config(address, "octopi")).unwrap();
    wait_for_state(&printer, DriverState::Ready).await;
    let mut events = printer.subscribe();

    let dir = tempfile::tempdir().unwrap();
    assert!(printer.loadmodel(Asset::file(model(dir.path()))).await.success);
    wait_for_state(&printer, DriverState::Ready).await;
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DriverEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    assert_eq!(states, vec![DriverState::LoadingModel, DriverState::Ready]);
}

#[tokio::test]
async fn url_assets_are_rejected() {
    let remote = Shared::default();
    let address = serve(remote).await;
    let printer = OctoprintPrinter::new(config(address, "octopi")).unwrap();
    wait_for_state(&printer, DriverState::Ready).await;
    let response = printer
        .loadmodel(Asset::Url {
            url: "https://example.com/cube.gcode".into(),
        })
        .await;
    assert!(response.has_error(DriverError::BadAsset));
    assert_eq!(printer.state(), DriverState::Ready);
}

#[tokio::test]
async fn unreachable_server_fails_to_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let printer = OctoprintPrinter::new(config(address, "octopi")).unwrap();
    let mut events = printer.subscribe();
    wait_for_state(&printer, DriverState::Disconnected).await;
    let status = printer.status().await;
    assert_eq!(status.state, DriverState::Disconnected);
    let failed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await {
                Ok(DriverEvent::ConnectionFailed) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await;
    assert_eq!(failed, Ok(true));
}
