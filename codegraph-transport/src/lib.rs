//! Line-delimited JSON-RPC 2.0 stdio transport for codegraph (spec §6).
//!
//! Reads one request object per line from stdin, dispatches it through a
//! [`Conductor`](codegraph_core::Conductor), and writes one response object
//! per line to stdout. EOF on stdin is the only shutdown trigger (there's no
//! socket to hang up, so there's no second task to coordinate with via a
//! `Notify`/`oneshot` the way the teacher's `serve::run_serve_on_listener`
//! does for its `once` mode): the read loop simply exits and calls
//! [`Runtime::shutdown`], which tears every agent down in reverse
//! registration order and checkpoints the storage WAL (spec §6 "exit
//! codes").
//!
//! **Public API**: [`serve_stdio`].

pub mod bootstrap;
pub mod dispatch;
pub mod protocol;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use bootstrap::Runtime;
use protocol::{Request, Response, ResponseError};

/// Runs the stdio read/dispatch/write loop against `runtime` until EOF on
/// stdin. Returns once shutdown completes; the caller picks the process
/// exit code (spec §6: "0 normal shutdown; non-zero on unrecoverable
/// initialization error").
pub async fn serve_stdio(runtime: Runtime) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    info!("codegraph transport ready, reading line-delimited JSON-RPC from stdin");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&runtime, &line).await;
        let mut encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
            warn!("failed to serialize response: {e}");
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal serialization error"}}"#.to_string()
        });
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    runtime.shutdown().await;
    Ok(())
}

async fn handle_line(runtime: &Runtime, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Response::err(None, ResponseError::parse_error(format!("parse error: {e}"))),
    };

    if dispatch::TOOL_NAMES.iter().all(|&name| name != request.method) {
        return Response::err(request.id, ResponseError::method_not_found(&request.method));
    }

    match dispatch::dispatch(runtime, &request.method, request.params).await {
        Ok(result) => Response::ok(request.id, result),
        Err(err) => {
            warn!(method = %request.method, error = %err, "tool call failed");
            Response::err(request.id, ResponseError::from_engine_error(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_config::EngineConfig;

    async fn test_runtime() -> (Runtime, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.database.path = dir.path().join("codegraph.db");
        let runtime = bootstrap::build_runtime(&config).await.unwrap();
        (runtime, dir)
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let (runtime, _dir) = test_runtime().await;
        let resp = handle_line(&runtime, r#"{"jsonrpc":"2.0","id":1,"method":"not_a_tool"}"#).await;
        assert_eq!(resp.error.unwrap().code, protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_returns_parse_error() {
        let (runtime, _dir) = test_runtime().await;
        let resp = handle_line(&runtime, "not json at all").await;
        assert_eq!(resp.error.unwrap().code, protocol::PARSE_ERROR);
    }

    #[tokio::test]
    async fn get_metrics_round_trips_through_handle_line() {
        let (runtime, _dir) = test_runtime().await;
        let resp = handle_line(&runtime, r#"{"jsonrpc":"2.0","id":"m1","method":"get_metrics","params":{}}"#).await;
        assert!(resp.error.is_none());
        assert!(resp.result.unwrap().get("memory").is_some());
    }

    #[tokio::test]
    async fn query_tool_requires_query_param() {
        let (runtime, _dir) = test_runtime().await;
        let resp = handle_line(&runtime, r#"{"jsonrpc":"2.0","id":2,"method":"query","params":{}}"#).await;
        let error = resp.error.unwrap();
        let expected = ResponseError::from_engine_error(&codegraph_core::EngineError::invalid("x"));
        assert_eq!(error.code, expected.code);
    }
}
