//! Newline-delimited JSON channel
//!
//! Each envelope is one JSON object followed by `\n`. Blank lines are
//! skipped. A line that is not a valid envelope yields
//! [`TransportError::Codec`] and leaves the stream usable.

use async_trait::async_trait;
use courier_core::{Envelope, TransportError, TransportResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

/// Envelope channel over a byte stream pair
pub struct JsonLinesChannel<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<Option<BufWriter<W>>>,
}

impl<R, W> JsonLinesChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a reader and a writer
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Some(BufWriter::new(writer))),
        }
    }
}

impl JsonLinesChannel<tokio::io::Stdin, tokio::io::Stdout> {
    /// Use the process's stdin/stdout as the channel
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> crate::Channel for JsonLinesChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send_raw(&self, envelope: Envelope) -> TransportResult<()> {
        let mut frame = serde_json::to_vec(&envelope)?;
        frame.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Option<Envelope>> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return match serde_json::from_str(trimmed) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(err) => {
                    tracing::debug!(len = trimmed.len(), "undecodable frame");
                    Err(err.into())
                }
            };
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
            tracing::debug!("json-lines writer closed");
        }
        Ok(())
    }

    fn channel_type(&self) -> &'static str {
        "json-lines"
    }
}
