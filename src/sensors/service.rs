use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{decoder, models::SensorRecord};
use crate::{
    diagnostics::DiagnosticSink,
    influx::{InfluxClient, InfluxError},
};

// ---------------------------------------------------------------------------
// Query range
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("range start {start} is after end {end}")]
pub struct InvalidRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inclusive `[start, end]` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl QueryRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Resolves when the caller gives up on a query.
pub struct Cancellation(Pin<Box<dyn Future<Output = ()> + Send>>);

impl Cancellation {
    pub fn new(signal: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(Box::pin(signal))
    }

    pub fn never() -> Self {
        Self::new(std::future::pending())
    }

    /// Deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self::new(tokio::time::sleep(limit))
    }
}

impl Future for Cancellation {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.0.as_mut().poll(cx)
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cancellation")
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("sensor query failed")]
    QueryFailed(#[from] InfluxError),

    #[error("sensor query was cancelled")]
    Cancelled,
}

#[async_trait]
pub trait TimeSeriesReader: Send + Sync {
    /// Records in `range`, one per distinct timestamp, ascending.
    ///
    /// Bad rows are reported as diagnostics and skipped. When `cancel`
    /// resolves first the in-flight request is dropped and nothing partial
    /// is returned.
    async fn query(
        &self,
        range: QueryRange,
        cancel: Cancellation,
    ) -> Result<Vec<SensorRecord>, ReaderError>;
}

pub struct SensorService {
    influx: InfluxClient,
    sink: Arc<dyn DiagnosticSink>,
}

impl SensorService {
    pub fn new(influx: InfluxClient, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { influx, sink }
    }
}

#[async_trait]
impl TimeSeriesReader for SensorService {
    async fn query(
        &self,
        range: QueryRange,
        cancel: Cancellation,
    ) -> Result<Vec<SensorRecord>, ReaderError> {
        let flux = self.influx.range_query(range.start(), range.end());
        debug!(start = %range.start(), end = %range.end(), "Querying sensor data");

        let rows = tokio::select! {
            biased;
            _ = cancel => return Err(ReaderError::Cancelled),
            rows = self.influx.query(&flux) => rows?,
        };

        let decoded = decoder::decode(&rows, self.influx.measurement());
        let rejected = decoded.diagnostics.len();
        for event in decoded.diagnostics {
            self.sink.emit(event);
        }

        info!(
            rows = rows.len(),
            records = decoded.records.len(),
            rejected,
            "Sensor data decoded"
        );
        Ok(decoded.records)
    }
}
