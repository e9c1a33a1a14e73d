//! Scripted connectors for controller tests.
//!
//! Each connector plays a queue of plans, one per `open`. When the queue is
//! empty the connection behaves normally. Every open handle is counted so
//! tests can check that no two relays ever overlap.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hdhrelay::{
    RelayError, RelaySettings, Result, SinkConnector, SourceConnector, Station, StationRegistry,
    StreamInfo, StreamSink, StreamSource,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const CHUNK_INTERVAL: Duration = Duration::from_millis(20);

/// Routes logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn registry() -> StationRegistry {
    StationRegistry::with_stations([
        Station::new("700", "BBC Radio 1", "http://tuner.test/auto/v700"),
        Station::new("704", "BBC Radio 4", "http://tuner.test/auto/v704"),
        Station::new("710", "Jazz FM", "http://tuner.test/auto/v710"),
    ])
}

pub fn settings() -> RelaySettings {
    RelaySettings {
        connect_timeout: Duration::from_secs(10),
        read_timeout: Duration::from_secs(15),
        write_timeout: Duration::from_secs(15),
        buffer_chunks: 8,
        stop_grace: Duration::from_secs(5),
        ..RelaySettings::default()
    }
}

/// Counts live handles and remembers the highest count seen
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn acquire(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub enum SourcePlan {
    /// `open` fails with this error
    Fail(RelayError),
    /// `open` takes this long, then streams
    Slow(Duration),
    /// Streams until the token fires, then reports end of stream
    EndsOn(CancellationToken),
    /// Streams normally, but `close` never returns
    WedgedClose,
}

#[derive(Default)]
pub struct ScriptedSource {
    plans: Mutex<HashMap<String, VecDeque<SourcePlan>>>,
    opened: Mutex<Vec<String>>,
    pub gauge: Arc<Gauge>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn plan(&self, station_id: &str, plan: SourcePlan) {
        self.plans
            .lock()
            .entry(station_id.to_string())
            .or_default()
            .push_back(plan);
    }

    /// Station ids in the order they were opened
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self, station_id: &str) -> usize {
        self.opened.lock().iter().filter(|id| *id == station_id).count()
    }
}

#[async_trait]
impl SourceConnector for ScriptedSource {
    async fn open(&self, station: &Station) -> Result<Box<dyn StreamSource>> {
        self.opened.lock().push(station.id.clone());
        let plan = self
            .plans
            .lock()
            .get_mut(&station.id)
            .and_then(VecDeque::pop_front);

        let mut stream = FakeStream {
            label: station.id.clone(),
            ends_on: None,
            wedged: false,
            _guard: None,
        };
        match plan {
            Some(SourcePlan::Fail(err)) => return Err(err),
            Some(SourcePlan::Slow(delay)) => sleep(delay).await,
            Some(SourcePlan::EndsOn(token)) => stream.ends_on = Some(token),
            Some(SourcePlan::WedgedClose) => stream.wedged = true,
            None => {}
        }
        stream._guard = Some(self.gauge.acquire());
        Ok(Box::new(stream))
    }
}

struct FakeStream {
    label: String,
    ends_on: Option<CancellationToken>,
    wedged: bool,
    _guard: Option<GaugeGuard>,
}

#[async_trait]
impl StreamSource for FakeStream {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        match &self.ends_on {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Ok(None),
                    _ = sleep(CHUNK_INTERVAL) => Ok(Some(Bytes::from(self.label.clone()))),
                }
            }
            None => {
                sleep(CHUNK_INTERVAL).await;
                Ok(Some(Bytes::from(self.label.clone())))
            }
        }
    }

    fn content_type(&self) -> Option<&str> {
        Some("audio/aac")
    }

    async fn close(&mut self) {
        if self.wedged {
            std::future::pending::<()>().await;
        }
    }
}

pub enum SinkPlan {
    Reject(RelayError),
    /// Accepts, then fails the first write after this many bytes
    BreaksAfter(usize),
}

#[derive(Default)]
pub struct ScriptedSink {
    plans: Mutex<VecDeque<SinkPlan>>,
    announced: Mutex<Vec<StreamInfo>>,
    written: Arc<Mutex<Vec<u8>>>,
    pub gauge: Arc<Gauge>,
}

impl ScriptedSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn plan(&self, plan: SinkPlan) {
        self.plans.lock().push_back(plan);
    }

    /// Stream descriptions in the order the mount was opened
    pub fn announced(&self) -> Vec<StreamInfo> {
        self.announced.lock().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl SinkConnector for ScriptedSink {
    async fn open(&self, info: &StreamInfo) -> Result<Box<dyn StreamSink>> {
        self.announced.lock().push(info.clone());
        let mut budget = None;
        match self.plans.lock().pop_front() {
            Some(SinkPlan::Reject(err)) => return Err(err),
            Some(SinkPlan::BreaksAfter(bytes)) => budget = Some(bytes),
            None => {}
        }
        Ok(Box::new(FakeMount {
            budget,
            written: Arc::clone(&self.written),
            _guard: self.gauge.acquire(),
        }))
    }
}

struct FakeMount {
    budget: Option<usize>,
    written: Arc<Mutex<Vec<u8>>>,
    _guard: GaugeGuard,
}

#[async_trait]
impl StreamSink for FakeMount {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(budget) = self.budget.as_mut() {
            if *budget < bytes.len() {
                return Err(RelayError::sink_write("broken pipe"));
            }
            *budget -= bytes.len();
        }
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) {}
}
