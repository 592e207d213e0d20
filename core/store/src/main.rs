//! Carline record store entrypoint.
//!
//! A small, single-writer service that owns the pickup record collection: a
//! socket listener, strict request validation, a JSON-file-backed collection,
//! and push-style watch streams so clients converge on the same state without
//! polling.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use carline_store_protocol::{
    parse_new_record, parse_record_id, parse_update, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod persist;
mod state;

use state::SharedState;

const SOCKET_NAME: &str = "store.sock";
const SOCKET_ENV: &str = "CARLINE_STORE_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const WRITE_TIMEOUT_SECS: u64 = 5;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match store_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve store socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare store socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind store socket");
            std::process::exit(1);
        }
    };

    let shared_state = match store_records_path() {
        Ok(records_path) => {
            let records = persist::load(&records_path);
            info!(
                records = records.len(),
                path = %records_path.display(),
                "Record collection loaded"
            );
            Arc::new(SharedState::new(records, Some(records_path)))
        }
        Err(err) => {
            warn!(error = %err, "Store file path unavailable; running memory-only");
            Arc::new(SharedState::new(Default::default(), None))
        }
    };

    info!(path = %socket_path.display(), "Carline record store started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept store connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("CARLINE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn store_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".carline").join(SOCKET_NAME))
}

fn store_records_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".carline").join("store").join("records.json"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Store request received");

    if request.protocol_version != PROTOCOL_VERSION {
        let response = Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
        let _ = write_response(&mut stream, response);
        return;
    }

    match request.method {
        Method::WatchCollection | Method::WatchRecord => handle_watch(stream, request, state),
        _ => {
            let response = handle_request(request, state);
            let _ = write_response(&mut stream, response);
        }
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: Arc<SharedState>) -> Response {
    match request.method {
        Method::GetHealth => {
            let records = state.record_count().unwrap_or(0);
            let data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "records": records,
            });
            Response::ok(request.id, data)
        }
        Method::CreateRecord => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "creation payload is required")
                }
            };
            let new = match parse_new_record(params) {
                Ok(new) => new,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match state.create_record(new) {
                Ok(record) => {
                    info!(
                        record_id = %record.id,
                        parent = %record.parent_name,
                        status = %record.status.as_str(),
                        "Record created"
                    );
                    match serde_json::to_value(&record) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(err) => Response::error(
                            request.id,
                            "serialization_error",
                            format!("Failed to serialize record: {}", err),
                        ),
                    }
                }
                Err(err) => Response::error(
                    request.id,
                    "create_error",
                    format!("Failed to create record: {}", err),
                ),
            }
        }
        Method::UpdateRecord => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "update payload is required")
                }
            };
            let update = match parse_update(params) {
                Ok(update) => update,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match state.update_record(&update.record_id, &update.patch) {
                Ok(Some(record)) => {
                    info!(
                        record_id = %record.id,
                        teacher_status = %record.teacher_status.as_str(),
                        "Record updated"
                    );
                    match serde_json::to_value(&record) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(err) => Response::error(
                            request.id,
                            "serialization_error",
                            format!("Failed to serialize record: {}", err),
                        ),
                    }
                }
                Ok(None) => Response::error(request.id, "not_found", "record does not exist"),
                Err(err) => Response::error(
                    request.id,
                    "update_error",
                    format!("Failed to update record: {}", err),
                ),
            }
        }
        Method::GetRecord => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "record_id is required")
                }
            };
            let parsed = match parse_record_id(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match state.get_record(&parsed.record_id) {
                Ok(record) => {
                    let data = serde_json::json!({
                        "found": record.is_some(),
                        "record": record,
                    });
                    Response::ok(request.id, data)
                }
                Err(err) => Response::error(
                    request.id,
                    "get_error",
                    format!("Failed to fetch record: {}", err),
                ),
            }
        }
        Method::ListRecords => match state.list_records() {
            Ok(records) => {
                debug!(records = records.len(), "Collection snapshot");
                match serde_json::to_value(&records) {
                    Ok(value) => Response::ok(request.id, serde_json::json!({ "records": value })),
                    Err(err) => Response::error(
                        request.id,
                        "serialization_error",
                        format!("Failed to serialize records: {}", err),
                    ),
                }
            }
            Err(err) => Response::error(
                request.id,
                "list_error",
                format!("Failed to list records: {}", err),
            ),
        },
        Method::DeleteRecord => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "record_id is required")
                }
            };
            let parsed = match parse_record_id(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match state.delete_record(&parsed.record_id) {
                Ok(removed) => {
                    if removed {
                        info!(record_id = %parsed.record_id, "Record archived");
                    }
                    Response::ok(request.id, serde_json::json!({ "removed": removed }))
                }
                Err(err) => Response::error(
                    request.id,
                    "delete_error",
                    format!("Failed to delete record: {}", err),
                ),
            }
        }
        Method::WatchCollection | Method::WatchRecord => Response::error(
            request.id,
            "invalid_params",
            "watch methods use a streaming connection",
        ),
    }
}

/// Turns the connection into a push stream: one Response line per snapshot
/// until the client hangs up. The registry prunes the channel on the first
/// missed send after that.
fn handle_watch(mut stream: UnixStream, request: Request, state: Arc<SharedState>) {
    let _ = stream.set_read_timeout(None);
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

    match request.method {
        Method::WatchCollection => {
            let receiver = match state.watch_collection() {
                Ok(receiver) => receiver,
                Err(err) => {
                    let response =
                        Response::error(request.id, "watch_error", format!("Failed to watch: {}", err));
                    let _ = write_response(&mut stream, response);
                    return;
                }
            };
            debug!(id = ?request.id, "Collection watch opened");

            while let Ok(snapshot) = receiver.recv() {
                let response = match serde_json::to_value(&snapshot) {
                    Ok(value) => {
                        Response::ok(request.id.clone(), serde_json::json!({ "records": value }))
                    }
                    Err(err) => Response::error(
                        request.id.clone(),
                        "serialization_error",
                        format!("Failed to serialize snapshot: {}", err),
                    ),
                };
                if write_response(&mut stream, response).is_err() {
                    debug!(id = ?request.id, "Collection watcher disconnected");
                    break;
                }
            }
        }
        Method::WatchRecord => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    let response =
                        Response::error(request.id, "invalid_params", "record_id is required");
                    let _ = write_response(&mut stream, response);
                    return;
                }
            };
            let parsed = match parse_record_id(params) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let response = Response::error_with_info(request.id, err);
                    let _ = write_response(&mut stream, response);
                    return;
                }
            };

            let receiver = match state.watch_record(&parsed.record_id) {
                Ok(receiver) => receiver,
                Err(err) => {
                    let response =
                        Response::error(request.id, "watch_error", format!("Failed to watch: {}", err));
                    let _ = write_response(&mut stream, response);
                    return;
                }
            };
            debug!(record_id = %parsed.record_id, "Record watch opened");

            while let Ok(snapshot) = receiver.recv() {
                let data = serde_json::json!({
                    "found": snapshot.is_some(),
                    "record": snapshot,
                });
                let response = Response::ok(request.id.clone(), data);
                if write_response(&mut stream, response).is_err() {
                    debug!(record_id = %parsed.record_id, "Record watcher disconnected");
                    break;
                }
            }
        }
        _ => {
            let response = Response::error(request.id, "invalid_params", "not a watch method");
            let _ = write_response(&mut stream, response);
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
