//! Exec session consumers

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ExecResult;
use crate::runtime::ExecSession;

/// Wait for the command to finish and gather its combined output.
///
/// On timeout the session is dropped, which kills the command.
pub async fn collect(session: ExecSession, limit: Duration) -> Result<ExecResult> {
    let ExecSession {
        stdin,
        mut output,
        exit,
    } = session;
    drop(stdin);

    let gathered = timeout(limit, async move {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = output.recv().await {
            buffer.extend_from_slice(&chunk);
        }
        let exit_code = exit.await.ok().flatten();
        (buffer.freeze(), exit_code)
    })
    .await;

    match gathered {
        Ok((buffer, exit_code)) => {
            debug!(bytes = buffer.len(), exit_code = ?exit_code, "Exec finished");
            Ok(ExecResult {
                output: String::from_utf8_lossy(&buffer).into_owned(),
                exit_code: exit_code.unwrap_or(-1),
            })
        }
        Err(_) => {
            warn!(limit_secs = limit.as_secs(), "Exec exceeded its time limit");
            Err(Error::RuntimeTimeout(format!(
                "exec did not finish within {}s",
                limit.as_secs()
            )))
        }
    }
}

/// Output of a session as a body stream; dropping it cancels the command
pub fn stream(session: ExecSession) -> impl Stream<Item = io::Result<Bytes>> {
    ReceiverStream::new(session.output).map(Ok::<_, io::Error>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, oneshot};

    fn session(chunks: Vec<&'static str>, exit_code: Option<i32>) -> ExecSession {
        let (out_tx, output) = mpsc::channel(8);
        let (exit_tx, exit) = oneshot::channel();
        tokio::spawn(async move {
            for chunk in chunks {
                out_tx.send(Bytes::from_static(chunk.as_bytes())).await.unwrap();
            }
            drop(out_tx);
            let _ = exit_tx.send(exit_code);
        });
        ExecSession {
            stdin: None,
            output,
            exit,
        }
    }

    #[tokio::test]
    async fn test_collect_joins_output_and_exit_code() {
        let result = collect(session(vec!["hello ", "world\n"], Some(3)), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.output, "hello world\n");
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_collect_unknown_exit_is_minus_one() {
        let result = collect(session(vec![], None), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_collect_times_out() {
        let (_out_tx, output) = mpsc::channel::<Bytes>(1);
        let (_exit_tx, exit) = oneshot::channel();
        let hung = ExecSession {
            stdin: None,
            output,
            exit,
        };
        let result = collect(hung, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::RuntimeTimeout(_))));
    }

    #[tokio::test]
    async fn test_stream_yields_chunks() {
        let chunks: Vec<_> = stream(session(vec!["a", "b"], Some(0))).collect().await;
        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(joined, b"ab");
    }
}
