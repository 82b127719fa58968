//! Bridges the synchronous [`std::io::Write`] side every [`crate::Engine`]
//! writes a backup into onto the async byte stream the object store
//! adapter consumes. Engine-agnostic: the orchestrator wraps whichever
//! engine is configured with one [`ChannelSink`] per backup, optionally
//! behind a crypto writer, and streams the paired receiving half
//! straight into `dbguard_backends::Backend::put_stream`. A
//! [`ChannelSink`] is only ever written to from inside
//! `tokio::task::spawn_blocking`, where `blocking_send` is legal.

use std::io::{self, Write};

use bytes::Bytes;
use dbguard_backends::ByteStream;
use futures::StreamExt;
use tokio::sync::mpsc::{self, Sender};
use tokio_stream::wrappers::ReceiverStream;

const CHANNEL_CAPACITY: usize = 4;

/// The write half of the backup pipe. Every chunk handed to `write`
/// becomes one `Bytes` item on the channel; dropping the sink (when
/// the archive writer is closed) closes the channel, which surfaces as
/// EOF to whatever is draining [`channel_stream`].
pub struct ChannelSink {
    tx: Sender<Bytes>,
}

impl ChannelSink {
    pub fn new() -> (Self, ByteStream) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = ReceiverStream::new(rx).map(Ok::<_, io::Error>);
        (Self { tx }, Box::pin(stream))
    }
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "backup upload side closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_from_a_blocking_task_arrive_on_the_stream() {
        let (mut sink, mut stream) = ChannelSink::new();

        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(b"hello ").unwrap();
            sink.write_all(b"world").unwrap();
        });

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        writer.await.unwrap();
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_sink() {
        let (mut sink, stream) = ChannelSink::new();
        drop(stream);

        let result = tokio::task::spawn_blocking(move || sink.write_all(b"x")).await.unwrap();
        assert!(result.is_err());
    }
}
