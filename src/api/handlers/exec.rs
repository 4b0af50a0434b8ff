//! Exec endpoints: collected, streamed and interactive over WebSocket

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::container::executor;
use crate::error::Error;
use crate::models::{DataResponse, ExecRequest};
use crate::runtime::ExecSession;
use crate::AppState;

/// Run a command in a running container
pub async fn exec_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ExecRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let session = state.container_manager.exec(&id, &request, false).await?;

    if request.stream {
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(executor::stream(session)),
        )
            .into_response());
    }

    let result = executor::collect(session, state.config.lifecycle.exec_timeout()).await?;
    Ok(Json(DataResponse::new(result)).into_response())
}

/// Interactive exec. The container is checked before the upgrade so that
/// unknown or stopped containers get a plain HTTP error.
pub async fn exec_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let container = state.container_manager.inspect(&id).await?;
    if !container.is_running() {
        return Err(Error::conflict(format!("container {} is not running", container.name)).into());
    }

    info!(container_id = %container.id, "Interactive exec connected");
    Ok(ws.on_upgrade(move |socket| handle_exec_socket(socket, state, container.id)))
}

async fn handle_exec_socket(socket: WebSocket, state: Arc<AppState>, container_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // First text frame carries the exec request.
    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ExecRequest>(&text) {
                Ok(request) => break request,
                Err(e) => {
                    let _ = send_error(&mut sender, "VALIDATION_ERROR", &e.to_string()).await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    };

    let session = match state
        .container_manager
        .exec(&container_id, &request, true)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            let _ = send_error(&mut sender, e.kind().as_str(), &e.to_string()).await;
            return;
        }
    };

    let ExecSession {
        stdin,
        mut output,
        exit,
    } = session;

    let input = async move {
        while let Some(Ok(message)) = receiver.next().await {
            let data = match message {
                Message::Binary(data) => Bytes::from(data),
                Message::Text(text) => Bytes::from(text),
                Message::Close(_) => break,
                _ => continue,
            };
            let Some(stdin) = &stdin else { continue };
            if stdin.send(data).await.is_err() {
                break;
            }
        }
    };
    tokio::pin!(input);

    let finished = {
        let forward = async {
            while let Some(chunk) = output.recv().await {
                if sender.send(Message::Binary(chunk.to_vec())).await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::select! {
            finished = forward => finished,
            _ = &mut input => false,
        }
    };

    if !finished {
        // Client left; dropping the output channel ends the command.
        debug!(container_id = %container_id, "Interactive exec client disconnected");
        return;
    }

    let exit_code = exit.await.ok().flatten().unwrap_or(-1);
    let frame = json!({ "exit_code": exit_code }).to_string();
    if sender.send(Message::Text(frame)).await.is_err() {
        warn!(container_id = %container_id, "Could not deliver exec exit code");
    }
    let _ = sender.close().await;
    debug!(container_id = %container_id, exit_code, "Interactive exec finished");
}

async fn send_error<S>(sender: &mut S, kind: &str, message: &str) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let frame = json!({ "error": kind, "message": message }).to_string();
    sender.send(Message::Text(frame)).await?;
    sender.close().await
}
