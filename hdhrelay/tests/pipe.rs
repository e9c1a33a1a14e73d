use async_trait::async_trait;
use bytes::Bytes;
use hdhrelay::{PipeOutcome, RelayError, RelayPipe, Result, StreamSink, StreamSource};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Plays a fixed list of chunks, then either ends, fails or blocks.
struct ListSource {
    chunks: VecDeque<Bytes>,
    tail: Tail,
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

enum Tail {
    End,
    Fail,
    Block,
}

impl ListSource {
    fn new(chunks: &[&'static str], tail: Tail) -> Self {
        Self {
            chunks: chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
            tail,
            reads: Arc::default(),
            closed: Arc::default(),
        }
    }
}

#[async_trait]
impl StreamSource for ListSource {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.tail {
            Tail::End => Ok(None),
            Tail::Fail => Err(RelayError::source_read("connection reset")),
            Tail::Block => std::future::pending().await,
        }
    }

    fn content_type(&self) -> Option<&str> {
        None
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    received: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    delay: Option<Duration>,
    fail_on_write: Option<usize>,
    writes: usize,
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes += 1;
        if self.fail_on_write == Some(self.writes) {
            return Err(RelayError::sink_write("broken pipe"));
        }
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        self.received.lock().extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_bytes_arrive_in_order_before_source_failure() {
    let source = ListSource::new(&["a", "bb", "ccc", "dddd"], Tail::End);
    let source_closed = Arc::clone(&source.closed);
    let sink = RecordingSink::default();
    let received = Arc::clone(&sink.received);
    let sink_closed = Arc::clone(&sink.closed);

    let outcome = RelayPipe::new(2)
        .run(Box::new(source), Box::new(sink), CancellationToken::new())
        .await;

    assert!(matches!(outcome, PipeOutcome::SourceFailed(RelayError::SourceRead(_))));
    assert_eq!(received.lock().as_slice(), b"abbcccdddd");
    assert!(source_closed.load(Ordering::SeqCst));
    assert!(sink_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_source_error_is_reported_after_drain() {
    let source = ListSource::new(&["x", "y"], Tail::Fail);
    let sink = RecordingSink::default();
    let received = Arc::clone(&sink.received);

    let outcome = RelayPipe::new(8)
        .run(Box::new(source), Box::new(sink), CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        PipeOutcome::SourceFailed(RelayError::source_read("connection reset"))
    );
    assert_eq!(received.lock().as_slice(), b"xy");
}

#[tokio::test]
async fn test_sink_failure_ends_the_pipe() {
    let source = ListSource::new(&["1", "2", "3"], Tail::Block);
    let source_closed = Arc::clone(&source.closed);
    let sink = RecordingSink {
        fail_on_write: Some(2),
        ..Default::default()
    };
    let received = Arc::clone(&sink.received);

    let outcome = RelayPipe::new(4)
        .run(Box::new(source), Box::new(sink), CancellationToken::new())
        .await;

    assert_eq!(outcome, PipeOutcome::SinkFailed(RelayError::sink_write("broken pipe")));
    assert_eq!(outcome.error().map(RelayError::kind), Some(hdhrelay::ErrorKind::SinkWrite));
    assert_eq!(received.lock().as_slice(), b"1");
    assert!(source_closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_stop_token_ends_cleanly() {
    let source = ListSource::new(&["live"], Tail::Block);
    let source_closed = Arc::clone(&source.closed);
    let sink = RecordingSink::default();
    let sink_closed = Arc::clone(&sink.closed);
    let received = Arc::clone(&sink.received);

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let outcome = RelayPipe::new(4)
        .run(Box::new(source), Box::new(sink), stop)
        .await;

    assert_eq!(outcome, PipeOutcome::StoppedCleanly);
    assert_eq!(outcome.error(), None);
    assert_eq!(received.lock().as_slice(), b"live");
    assert!(source_closed.load(Ordering::SeqCst));
    assert!(sink_closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_throttles_reads() {
    let chunks: Vec<&'static str> = std::iter::repeat("chunk").take(100).collect();
    let source = ListSource::new(&chunks, Tail::Block);
    let reads = Arc::clone(&source.reads);
    let sink = RecordingSink {
        delay: Some(Duration::from_secs(1)),
        ..Default::default()
    };

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(3500)).await;
        trigger.cancel();
    });

    let outcome = RelayPipe::new(4)
        .run(Box::new(source), Box::new(sink), stop)
        .await;

    assert_eq!(outcome, PipeOutcome::StoppedCleanly);
    // a few writes, a full buffer and one read waiting for room
    assert!(reads.load(Ordering::SeqCst) <= 12, "read {} chunks", reads.load(Ordering::SeqCst));
}
