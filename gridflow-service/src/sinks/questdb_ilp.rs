use std::{marker::PhantomData, net::SocketAddr, time::Duration};

use futures::StreamExt;
use gridflow_client::domain::{DailySummary, LocationOrigin, UsageFact};
use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::pipeline::{PipelineError, Sink};

/// ILP requires commas, spaces and equals signs in identifiers and tag
/// values to be backslash-escaped.
fn escape_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        if matches!(ch, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// One ILP line: `measurement,tags fields timestamp`.
///
/// Tags must all be added before the first field.
struct IlpLine<'a> {
    out: &'a mut String,
    fields: usize,
}

impl<'a> IlpLine<'a> {
    fn new(out: &'a mut String, measurement: &str) -> Self {
        escape_into(measurement, out);
        Self { out, fields: 0 }
    }

    fn tag(mut self, key: &str, value: &str) -> Self {
        self.out.push(',');
        escape_into(key, self.out);
        self.out.push('=');
        escape_into(value, self.out);
        self
    }

    fn opt_tag(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.tag(key, v),
            None => self,
        }
    }

    fn field(mut self, key: &str, value: impl std::fmt::Display, suffix: &str) -> Self {
        self.out.push(if self.fields == 0 { ' ' } else { ',' });
        self.fields += 1;
        escape_into(key, self.out);
        self.out.push('=');
        self.out.push_str(&value.to_string());
        self.out.push_str(suffix);
        self
    }

    fn float(self, key: &str, value: f64) -> Self {
        self.field(key, value, "")
    }

    fn int(self, key: &str, value: i64) -> Self {
        self.field(key, value, "i")
    }

    fn boolean(self, key: &str, value: bool) -> Self {
        self.field(key, if value { 't' } else { 'f' }, "")
    }

    /// Timestamp column, in microseconds.
    fn timestamp(self, key: &str, ts: OffsetDateTime) -> Self {
        self.field(key, ts.unix_timestamp_nanos() / 1_000, "t")
    }

    /// Designated timestamp, in nanoseconds.
    fn at(mut self, ts: OffsetDateTime) {
        self.out.push(' ');
        self.out.push_str(&ts.unix_timestamp_nanos().to_string());
    }
}

/// Deterministic row identity, published as the `event_id` tag so QuestDB
/// dedup keys make re-publishing a run idempotent.
struct EventId(blake3::Hasher);

impl EventId {
    fn new(ts: OffsetDateTime) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(&ts.unix_timestamp_nanos().to_le_bytes());
        Self(h)
    }

    fn text(mut self, s: &str) -> Self {
        self.0.update(&(s.len() as u64).to_le_bytes());
        self.0.update(s.as_bytes());
        self
    }

    fn opt_text(mut self, s: Option<&str>) -> Self {
        match s {
            Some(v) => {
                self.0.update(&[1]);
                self.text(v)
            }
            None => {
                self.0.update(&[0]);
                self
            }
        }
    }

    fn num(mut self, v: f64) -> Self {
        self.0.update(&v.to_bits().to_le_bytes());
        self
    }

    fn opt_num(mut self, v: Option<f64>) -> Self {
        match v {
            Some(x) => {
                self.0.update(&[1]);
                self.num(x)
            }
            None => {
                self.0.update(&[0]);
                self
            }
        }
    }

    fn count(mut self, v: u64) -> Self {
        self.0.update(&v.to_le_bytes());
        self
    }

    fn finish(self) -> String {
        self.0.finalize().to_hex().to_string()
    }
}

fn origin_str(origin: LocationOrigin) -> &'static str {
    match origin {
        LocationOrigin::Source => "source",
        LocationOrigin::Meter => "meter",
        LocationOrigin::Unresolved => "unresolved",
    }
}

/// A row that can be published over ILP.
pub trait IlpEncode {
    const TABLE: &'static str;

    /// Designated timestamp; rows without one are not published.
    fn designated_ts(&self) -> Option<OffsetDateTime>;

    fn write_ilp_line(&self, ts: OffsetDateTime, out: &mut String);
}

impl IlpEncode for UsageFact {
    const TABLE: &'static str = "usage_interval";

    fn designated_ts(&self) -> Option<OffsetDateTime> {
        self.reading.interval_start.parsed()
    }

    fn write_ilp_line(&self, ts: OffsetDateTime, out: &mut String) {
        let r = &self.reading;
        let location = r.location_id.as_ref().map(|l| l.as_str());
        let meter = r.meter_id.as_ref().map(|m| m.as_str());

        let event_id = EventId::new(ts)
            .text(r.source_id.as_str())
            .opt_text(location)
            .opt_text(meter)
            .opt_text(r.channel.as_deref())
            .opt_num(r.value)
            .opt_text(r.quality.as_deref())
            .finish();

        let mut line = IlpLine::new(out, Self::TABLE)
            .tag("event_id", &event_id)
            .tag("source_id", r.source_id.as_str())
            .opt_tag("location_id", location)
            .opt_tag("meter_id", meter)
            .opt_tag("channel", r.channel.as_deref())
            .opt_tag("quality", r.quality.as_deref())
            .tag("location_origin", origin_str(r.location_origin));
        if let Some(v) = r.value {
            line = line.float("value", v);
        }
        if let Some(secs) = r.duration_seconds {
            line = line.int("duration_seconds", secs);
        }
        line.boolean("linked", self.linked).at(ts);
    }
}

impl IlpEncode for DailySummary {
    const TABLE: &'static str = "daily_usage_summary";

    fn designated_ts(&self) -> Option<OffsetDateTime> {
        Some(self.bucket_start)
    }

    fn write_ilp_line(&self, ts: OffsetDateTime, out: &mut String) {
        let event_id = EventId::new(self.bucket_start)
            .text(self.source_id.as_str())
            .text(self.location_id.as_str())
            .num(self.total_usage)
            .count(self.interval_count)
            .num(self.peak_value)
            .num(self.pit_value)
            .finish();

        IlpLine::new(out, Self::TABLE)
            .tag("event_id", &event_id)
            .tag("source_id", self.source_id.as_str())
            .tag("location_id", self.location_id.as_str())
            .float("total_usage", self.total_usage)
            .int("interval_count", i64::try_from(self.interval_count).unwrap_or(i64::MAX))
            .float("peak_value", self.peak_value)
            .timestamp("peak_ts", self.peak_ts)
            .float("pit_value", self.pit_value)
            .timestamp("pit_ts", self.pit_ts)
            .timestamp("bucket_end", self.bucket_end)
            .at(ts);
    }
}

/// Retry settings for one ILP connection.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Attempt `n` waits `n * backoff` before reconnecting.
    pub backoff: Duration,
}

struct IlpConnection {
    addr: SocketAddr,
    stream: TcpStream,
}

impl IlpConnection {
    async fn open(addr: SocketAddr) -> Result<Self, PipelineError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PipelineError::Sink(format!("connecting to QuestDB ILP at {addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(Self { addr, stream })
    }

    /// Writes `payload`, reconnecting with linear backoff on failure.
    async fn send(&mut self, table: &'static str, payload: &[u8], retry: RetryPolicy) -> Result<(), PipelineError> {
        let mut attempt = 0u32;
        while let Err(e) = self.stream.write_all(payload).await {
            if attempt >= retry.max_retries {
                metrics::counter!("gridflow_ilp_errors_total", "table" => table).increment(1);
                tracing::error!(table, error = %e, attempt, "ILP write failed");
                return Err(PipelineError::Sink(format!("ILP write to {table} failed: {e}")));
            }
            attempt += 1;
            metrics::counter!("gridflow_ilp_retries_total", "table" => table).increment(1);
            tracing::warn!(table, error = %e, attempt, "ILP write failed, reconnecting");

            tokio::time::sleep(retry.backoff * attempt).await;
            *self = Self::open(self.addr).await?;
        }
        metrics::counter!("gridflow_ilp_bytes_total", "table" => table).increment(payload.len() as u64);
        Ok(())
    }
}

/// Batched ILP/TCP publisher for one table.
pub struct QuestDbIlpSink<T> {
    addr: SocketAddr,
    batch_size: usize,
    retry: RetryPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QuestDbIlpSink<T> {
    pub fn new(addr: SocketAddr, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            addr,
            batch_size: batch_size.max(1),
            retry,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for QuestDbIlpSink<T>
where
    T: IlpEncode + Send + Sync + 'static,
{
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = T> + Send + Unpin + 'static,
    {
        let mut conn = IlpConnection::open(self.addr).await?;
        let mut payload = String::new();
        let mut pending = 0usize;
        let (mut published, mut skipped) = (0u64, 0u64);

        while let Some(row) = input.next().await {
            let Some(ts) = row.designated_ts() else {
                skipped += 1;
                continue;
            };
            row.write_ilp_line(ts, &mut payload);
            payload.push('\n');
            pending += 1;

            if pending == self.batch_size {
                conn.send(T::TABLE, payload.as_bytes(), self.retry).await?;
                published += pending as u64;
                payload.clear();
                pending = 0;
            }
        }
        if pending > 0 {
            conn.send(T::TABLE, payload.as_bytes(), self.retry).await?;
            published += pending as u64;
        }
        let _ = conn.stream.shutdown().await;

        metrics::counter!("gridflow_ilp_published_rows_total", "table" => T::TABLE).increment(published);
        if skipped > 0 {
            metrics::counter!("gridflow_ilp_skipped_rows_total", "table" => T::TABLE).increment(skipped);
            tracing::warn!(table = T::TABLE, skipped, "rows without a designated timestamp not published");
        }
        tracing::info!(table = T::TABLE, published, "ILP publish finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_client::domain::{IntervalReading, LocationId, MeterId, SourceId, SourceTimestamp};
    use time::macros::{date, datetime};
    use tokio::{io::AsyncReadExt, net::TcpListener};

    fn fact(start: SourceTimestamp) -> UsageFact {
        UsageFact {
            reading: IntervalReading {
                source_id: SourceId::new("UTILITY 2"),
                location_id: LocationId::parse("P,1"),
                location_origin: LocationOrigin::Meter,
                meter_id: MeterId::parse("1042"),
                interval_start: start,
                interval_end: None,
                duration_seconds: Some(900),
                value: Some(1.25),
                quality: None,
                channel: Some("E".to_string()),
                last_update_time: SourceTimestamp::Missing,
                exported_at: SourceTimestamp::Missing,
            },
            linked: true,
            meter_matched: true,
            location_matched: false,
            serial_number: None,
            meter_type: None,
            meter_category: None,
            meter_status: None,
            service_point_number: None,
            house_num: None,
            street: None,
            house_supp: None,
            city: None,
            zip: None,
            state: None,
        }
    }

    fn summary() -> DailySummary {
        DailySummary {
            source_id: SourceId::new("UTILITY1"),
            location_id: LocationId::parse("1").unwrap(),
            day: date!(2025 - 01 - 22),
            bucket_start: datetime!(2025-01-22 00:00 UTC),
            bucket_end: datetime!(2025-01-23 00:00 UTC),
            total_usage: 10.0,
            interval_count: 1,
            peak_value: 10.0,
            peak_ts: datetime!(2025-01-22 00:00 UTC),
            pit_value: 10.0,
            pit_ts: datetime!(2025-01-22 00:00 UTC),
        }
    }

    fn line_of<T: IlpEncode>(row: &T) -> String {
        let mut line = String::new();
        row.write_ilp_line(row.designated_ts().unwrap(), &mut line);
        line
    }

    #[test]
    fn identifiers_escape_commas_spaces_and_equals() {
        let mut out = String::new();
        escape_into("a b,c=d", &mut out);
        assert_eq!(out, "a\\ b\\,c\\=d");
    }

    #[test]
    fn event_id_is_deterministic_and_tracks_the_value() {
        let f = fact(SourceTimestamp::Parsed(datetime!(2025-01-22 00:00 UTC)));
        let a = line_of(&f);
        assert!(a.contains("event_id="));
        assert_eq!(a, line_of(&f));

        let mut other = f.clone();
        other.reading.value = Some(2.0);
        assert_ne!(a, line_of(&other));
    }

    #[test]
    fn usage_fact_line_includes_tags_fields_and_nanos() {
        let ts = datetime!(2025-01-22 00:00 UTC);
        let line = line_of(&fact(SourceTimestamp::Parsed(ts)));

        assert!(line.starts_with("usage_interval,"));
        assert!(line.contains("source_id=UTILITY\\ 2"));
        assert!(line.contains("location_id=P\\,1"));
        assert!(line.contains("meter_id=1042"));
        assert!(line.contains("location_origin=meter"));
        assert!(!line.contains("quality="));
        assert!(line.contains(" value=1.25,duration_seconds=900i,linked=t "));
        assert!(line.ends_with(" 1737504000000000000"));
    }

    #[test]
    fn daily_summary_line_carries_integer_count_and_timestamps() {
        let line = line_of(&summary());
        assert!(line.starts_with("daily_usage_summary,"));
        assert!(line.contains(" total_usage=10,interval_count=1i,"));
        assert!(line.contains("peak_ts=1737504000000000t"));
        assert!(line.ends_with(" 1737504000000000000"));
    }

    #[test]
    fn facts_without_a_parsed_start_have_no_designated_ts() {
        assert!(fact(SourceTimestamp::Unparseable("2025013".to_string()))
            .designated_ts()
            .is_none());
        assert!(fact(SourceTimestamp::Missing).designated_ts().is_none());
    }

    #[tokio::test]
    async fn sink_writes_lines_and_skips_undated_rows() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let rows = vec![
            fact(SourceTimestamp::Parsed(datetime!(2025-01-22 00:00 UTC))),
            fact(SourceTimestamp::Missing),
            fact(SourceTimestamp::Parsed(datetime!(2025-01-22 00:15 UTC))),
        ];
        let retry = RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };
        let sink = QuestDbIlpSink::<UsageFact>::new(addr, 1, retry);
        sink.run(futures::stream::iter(rows)).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.lines().count(), 2);
        assert!(received.lines().all(|l| l.starts_with("usage_interval,")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_sink_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let retry = RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };
        let sink = QuestDbIlpSink::<DailySummary>::new(addr, 10, retry);
        let err = sink.run(futures::stream::iter(vec![summary()])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sink(_)));
    }
}
