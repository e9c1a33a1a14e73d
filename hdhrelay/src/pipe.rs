//! Byte pump between one tuner stream and one Icecast connection.

use crate::error::RelayError;
use crate::sink::StreamSink;
use crate::source::StreamSource;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Terminal status of a [`RelayPipe::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeOutcome {
    /// The stop token fired
    StoppedCleanly,
    SourceFailed(RelayError),
    SinkFailed(RelayError),
}

impl PipeOutcome {
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            Self::StoppedCleanly => None,
            Self::SourceFailed(err) | Self::SinkFailed(err) => Some(err),
        }
    }
}

/// Copies bytes in receipt order through a bounded buffer.
///
/// The reader and the writer run concurrently inside the caller's task.
/// When the buffer is full the reader waits, so a slow sink throttles the
/// tuner instead of growing memory.
#[derive(Debug, Clone, Copy)]
pub struct RelayPipe {
    buffer_chunks: usize,
}

impl RelayPipe {
    pub fn new(buffer_chunks: usize) -> Self {
        Self {
            buffer_chunks: buffer_chunks.max(1),
        }
    }

    /// Runs until `stop` fires or either side fails, then closes both ends.
    ///
    /// When the tuner ends or fails, chunks already buffered are still
    /// written before the source failure is reported. The end of a live
    /// stream is itself a failure: a channel is never expected to end.
    pub async fn run(
        &self,
        mut source: Box<dyn StreamSource>,
        mut sink: Box<dyn StreamSink>,
        stop: CancellationToken,
    ) -> PipeOutcome {
        let mut relayed: u64 = 0;
        let (tx, mut rx) = mpsc::channel::<Bytes>(self.buffer_chunks);

        let outcome = {
            let source = &mut source;
            let sink = &mut sink;
            let relayed = &mut relayed;

            let reader = async move {
                // owned here so the channel closes as soon as reading stops
                let tx = tx;
                loop {
                    match source.read().await {
                        Ok(Some(chunk)) => {
                            if tx.send(chunk).await.is_err() {
                                // writer already gave up
                                return None;
                            }
                        }
                        Ok(None) => return Some(RelayError::source_read("tuner stream ended")),
                        Err(err) => return Some(err),
                    }
                }
            };

            let writer = async move {
                while let Some(chunk) = rx.recv().await {
                    sink.write(&chunk).await?;
                    *relayed += chunk.len() as u64;
                }
                Ok::<(), RelayError>(())
            };

            tokio::pin!(reader, writer);
            let mut source_error: Option<RelayError> = None;
            let mut reader_done = false;

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break PipeOutcome::StoppedCleanly,
                    result = &mut writer => {
                        break match result {
                            Err(err) => PipeOutcome::SinkFailed(err),
                            // the reader finished and the buffer is drained
                            Ok(()) => PipeOutcome::SourceFailed(
                                source_error
                                    .take()
                                    .unwrap_or_else(|| RelayError::source_read("tuner stream ended")),
                            ),
                        };
                    }
                    failure = &mut reader, if !reader_done => {
                        reader_done = true;
                        debug!("tuner side finished, draining buffer");
                        source_error = failure;
                    }
                }
            }
        };

        source.close().await;
        sink.close().await;

        info!(
            bytes = relayed,
            outcome = ?outcome,
            "Relay pipe finished"
        );
        outcome
    }
}
