//! Observation Source
//!
//! Feeds raw resource-timing entries into the engine's inbound channel.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use super::traffic::ResourceTiming;

#[async_trait]
pub trait ObservationSource: Send {
    /// Push entries until the input ends or the receiver is gone.
    /// Returns the number of entries delivered.
    async fn run(self: Box<Self>, tx: mpsc::Sender<ResourceTiming>) -> usize;
}

/// One JSON entry per line from any async reader (stdin, a socket, a file)
pub struct JsonLinesSource<R> {
    reader: R,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> ObservationSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn run(self: Box<Self>, tx: mpsc::Sender<ResourceTiming>) -> usize {
        let mut lines = self.reader.lines();
        let mut delivered = 0;
        let mut line_no = 0usize;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::error!("[TrafficMonitor] Observation feed read error: {}", e);
                    break;
                }
            };
            line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<ResourceTiming>(trimmed) {
                Ok(entry) => {
                    if tx.send(entry).await.is_err() {
                        break;
                    }
                    delivered += 1;
                }
                Err(e) => {
                    log::warn!("[TrafficMonitor] Skipping malformed entry on line {}: {}", line_no, e);
                }
            }
        }

        log::info!("[TrafficMonitor] Observation feed ended after {} entries", delivered);
        delivered
    }
}

/// Spawn a source onto the runtime
pub fn spawn_source(
    source: Box<dyn ObservationSource>,
    tx: mpsc::Sender<ResourceTiming>,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(source.run(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_entries_and_skips_garbage() {
        let input = concat!(
            r#"{"name":"https://a.io/x.js","startTime":1.0,"initiatorType":"script"}"#, "\n",
            "not json\n",
            "\n",
            r#"{"name":"https://b.io/y","startTime":2.5,"duration":80,"transferSize":1200,"initiatorType":"fetch"}"#, "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let source = Box::new(JsonLinesSource::new(BufReader::new(input.as_bytes())));

        let delivered = spawn_source(source, tx).await.unwrap();
        assert_eq!(delivered, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "https://a.io/x.js");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.transfer_bytes(), 1200);
        assert!(rx.recv().await.is_none());
    }
}
