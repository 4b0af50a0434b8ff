//! Following a container's log file

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::store::ResourceStore;

use super::state::Transition;

pub type LogStream = ReceiverStream<io::Result<Bytes>>;

const CHUNK_SIZE: usize = 8 * 1024;

/// Stream the log from its beginning.
///
/// Without `follow` the stream ends at the current end of file. With it the
/// stream keeps polling for new output while the container runs (or is about
/// to) and ends after a final read once it is no longer live. Dropping the
/// stream stops the pump.
pub fn follow(
    store: Arc<ResourceStore>,
    container_id: String,
    path: PathBuf,
    follow: bool,
    poll: Duration,
) -> LogStream {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut file = None;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            // The file may not exist before the first start.
            if file.is_none() {
                match tokio::fs::File::open(&path).await {
                    Ok(f) => file = Some(f),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            // Decided before draining so output written just before exit is kept.
            let live = follow && is_live(&store, &container_id).await;

            if let Some(f) = file.as_mut() {
                loop {
                    match f.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if !live {
                break;
            }

            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(poll) => {}
            }
        }

        debug!(container_id = %container_id, "Log stream finished");
    });

    ReceiverStream::new(rx)
}

async fn is_live(store: &ResourceStore, container_id: &str) -> bool {
    match store.get(container_id).await {
        Ok(c) => c.is_running() || c.transition == Some(Transition::Starting),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use crate::container::{Container, ContainerStatus};

    async fn collect(stream: LogStream) -> String {
        let chunks: Vec<_> = stream.collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_without_follow_reads_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let store = Arc::new(ResourceStore::in_memory());
        let stream = follow(store, "c".into(), path, false, Duration::from_millis(10));
        assert_eq!(collect(stream).await, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResourceStore::in_memory());
        let stream = follow(
            store,
            "c".into(),
            dir.path().join("none.log"),
            true,
            Duration::from_millis(10),
        );
        assert_eq!(collect(stream).await, "");
    }

    #[tokio::test]
    async fn test_follow_ends_when_container_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.log");
        std::fs::write(&path, "boot\n").unwrap();

        let store = Arc::new(ResourceStore::in_memory());
        let mut container = Container::new("web".into(), "nginx".into(), "nginx".into());
        container.set_status(ContainerStatus::Running).unwrap();
        container.pid = Some(1);
        let id = container.id.clone();
        store.put(container).await.unwrap();

        let stream = follow(store.clone(), id.clone(), path.clone(), true, Duration::from_millis(10));
        let reader = tokio::spawn(collect(stream));

        tokio::time::sleep(Duration::from_millis(40)).await;
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"serving\n").unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        store
            .update(&id, |c| c.set_status(ContainerStatus::Stopped))
            .await
            .unwrap();

        let output = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("stream should end after stop")
            .unwrap();
        assert_eq!(output, "boot\nserving\n");
    }
}
