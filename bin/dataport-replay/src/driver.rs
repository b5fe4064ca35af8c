use std::{collections::HashMap, ops::AddAssign};

use anyhow::{anyhow, Context as _};
use bytes::BytesMut;
use dataport_core::{
    topology::StaticTopology, BatchAccumulator, BatchRecord, EndpointAddress, LifecycleMessage, RouteAction,
    RouterHandle, TransformRouter,
};
use dataport_event::ChangeEvent;
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{config::ReplayConfiguration, evaluator::FieldProjection, record::StreamRecord};

type ReplayRouter = RouterHandle<FieldProjection, StaticTopology>;

const PARTITION_BUFFER: usize = 256;
const OUTPUT_BUFFER: usize = 1024;
const ENCODE_BUFFER_CAPACITY: usize = 4096;

/// A line of replay output.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutputLine<'a> {
    Batch {
        endpoint: &'a EndpointAddress,
        record: &'a BatchRecord,
    },
    Lifecycle {
        message: &'a LifecycleMessage,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    pub events: u64,
    pub routed: u64,
    pub dropped: u64,
    pub failed: u64,
    pub lifecycle: u64,
    pub batches: u64,
}

impl AddAssign for ReplayStats {
    fn add_assign(&mut self, rhs: Self) {
        self.events += rhs.events;
        self.routed += rhs.routed;
        self.dropped += rhs.dropped;
        self.failed += rhs.failed;
        self.lifecycle += rhs.lifecycle;
        self.batches += rhs.batches;
    }
}

/// Replay driver.
///
/// Reads recorded events in order and hands each partition's events to a dedicated worker task, so that events within a
/// partition are routed in arrival order while partitions proceed independently. Every worker owns its own batch
/// accumulator. All output goes through a single writer task, one JSON document per line.
pub struct Driver {
    router: ReplayRouter,
    flush_every: usize,
}

impl Driver {
    /// Creates a new `Driver` from the given configuration.
    pub fn new(config: ReplayConfiguration) -> Self {
        let evaluator = FieldProjection::new(config.key_fields.clone());
        let topology = StaticTopology::from_configuration(&config.topology);
        if topology.is_empty() {
            warn!("No endpoints configured. Events will not resolve to any endpoint.");
        }

        let router = TransformRouter::from_configuration(&config.router, evaluator, topology);
        info!(
            source = %router.definition().source,
            instance_id = router.definition().instance_id,
            feed_version = %router.feed_version(),
            "Router ready."
        );

        Self {
            router: RouterHandle::new(router),
            flush_every: config.flush_every,
        }
    }

    /// Replays the events in `events_path`, writing the output to `writer`.
    ///
    /// Returns the writer once all output has been written and flushed.
    ///
    /// # Errors
    ///
    /// If the events file cannot be read, contains an invalid record, or the output cannot be written, an error will be
    /// returned.
    pub async fn run<W>(self, events_path: &str, writer: W) -> Result<W, anyhow::Error>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let file = File::open(events_path)
            .await
            .with_context(|| format!("Failed to open events file '{}'.", events_path))?;
        let mut lines = BufReader::new(file).lines();

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let writer_task = tokio::spawn(write_output(output_rx, writer));

        let mut partitions = HashMap::new();
        let mut workers = JoinSet::new();
        let mut line_number = 0usize;
        let mut read_result = Ok(());

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    read_result = Err(anyhow::Error::new(e).context("Failed to read events file."));
                    break;
                }
            };

            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let (partition_id, event) = match parse_line(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    read_result = Err(e.context(format!("Invalid record on line {}.", line_number)));
                    break;
                }
            };

            let sender = partitions.entry(partition_id).or_insert_with(|| {
                debug!(partition_id, "Starting partition worker.");
                let (tx, rx) = mpsc::channel(PARTITION_BUFFER);
                let worker = PartitionWorker {
                    partition_id,
                    router: self.router.clone(),
                    flush_every: self.flush_every,
                    output: output_tx.clone(),
                };
                workers.spawn(worker.run(rx));
                tx
            });

            if sender.send(event).await.is_err() {
                // The worker stopped early; its error is collected below.
                break;
            }
        }

        drop(partitions);
        drop(output_tx);

        let mut stats = ReplayStats::default();
        let mut worker_result = Ok(());
        while let Some(result) = workers.join_next().await {
            match result.context("Partition worker panicked.").and_then(|result| result) {
                Ok(partition_stats) => stats += partition_stats,
                Err(e) => worker_result = Err(e),
            }
        }

        let writer = writer_task.await.context("Output writer panicked.")??;

        read_result?;
        worker_result?;

        info!(
            events = stats.events,
            routed = stats.routed,
            dropped = stats.dropped,
            failed = stats.failed,
            lifecycle = stats.lifecycle,
            batches = stats.batches,
            "Replay complete."
        );

        Ok(writer)
    }
}

fn parse_line(line: &str) -> Result<(u16, ChangeEvent), anyhow::Error> {
    let record = StreamRecord::from_line(line)?;
    let partition_id = record.partition();
    Ok((partition_id, record.into_event()?))
}

struct PartitionWorker {
    partition_id: u16,
    router: ReplayRouter,
    flush_every: usize,
    output: mpsc::Sender<String>,
}

impl PartitionWorker {
    async fn run(self, mut events: mpsc::Receiver<ChangeEvent>) -> Result<ReplayStats, anyhow::Error> {
        let mut stats = ReplayStats::default();
        let mut batches = BatchAccumulator::new();
        let mut encode_buffer = BytesMut::with_capacity(ENCODE_BUFFER_CAPACITY);
        let mut since_flush = 0;

        while let Some(event) = events.recv().await {
            stats.events += 1;
            let router = self.router.load();

            if let Some(message) = router.control(&event) {
                // Keep output in stream order: anything routed before the control event goes out first.
                stats.batches += self.flush(&mut batches).await?;
                since_flush = 0;

                self.emit(&OutputLine::Lifecycle { message: &message }).await?;
                stats.lifecycle += 1;
                continue;
            }

            match router.route(&event, Some(&mut encode_buffer), &mut batches) {
                Ok(outcome) if outcome.action == RouteAction::Dropped => stats.dropped += 1,
                Ok(_) => stats.routed += 1,
                Err(e) => {
                    stats.failed += 1;
                    if !e.is_evaluation_failure() {
                        warn!(partition_id = self.partition_id, error = %e, "Skipping event.");
                    }
                }
            }

            since_flush += 1;
            if self.flush_every > 0 && since_flush >= self.flush_every {
                stats.batches += self.flush(&mut batches).await?;
                since_flush = 0;
            }
        }

        stats.batches += self.flush(&mut batches).await?;
        debug!(partition_id = self.partition_id, events = stats.events, "Partition worker finished.");

        Ok(stats)
    }

    async fn flush(&self, batches: &mut BatchAccumulator) -> Result<u64, anyhow::Error> {
        let records = batches.drain().collect::<Vec<_>>();
        for (endpoint, record) in &records {
            self.emit(&OutputLine::Batch { endpoint, record }).await?;
        }
        Ok(records.len() as u64)
    }

    async fn emit(&self, line: &OutputLine<'_>) -> Result<(), anyhow::Error> {
        let line = serde_json::to_string(line).context("Failed to serialize output.")?;
        self.output
            .send(line)
            .await
            .map_err(|_| anyhow!("Output writer stopped."))
    }
}

async fn write_output<W>(mut lines: mpsc::Receiver<String>, mut writer: W) -> Result<W, anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await.context("Failed to write output.")?;
        writer.write_all(b"\n").await.context("Failed to write output.")?;
    }
    writer.flush().await.context("Failed to flush output.")?;

    Ok(writer)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::{json, Value};

    use super::*;

    fn config(flush_every: usize) -> ReplayConfiguration {
        serde_json::from_value(json!({
            "definition": { "source": "orders", "instance_id": 7 },
            "topology": { "endpoints": [{ "address": "a:9104" }, { "address": "b:9104" }] },
            "key_fields": ["customer"],
            "flush_every": flush_every,
        }))
        .unwrap()
    }

    fn events_file(lines: &[Value]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    async fn replay(flush_every: usize, lines: &[Value]) -> Vec<Value> {
        let file = events_file(lines);
        let output = Driver::new(config(flush_every))
            .run(file.path().to_str().unwrap(), Vec::new())
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn partition_of(line: &Value) -> u64 {
        match line["kind"].as_str() {
            Some("batch") => line["record"]["partition_id"].as_u64().unwrap(),
            _ => line["message"]["partition_id"].as_u64().unwrap(),
        }
    }

    #[tokio::test]
    async fn replays_partitions_in_order() {
        let output = replay(
            0,
            &[
                json!({"opcode": "stream_begin", "partition": 0, "epoch": 1, "seqno": 0}),
                json!({"opcode": "mutation", "partition": 0, "seqno": 1, "key": "o-1", "value": {"customer": "ada"}}),
                json!({"opcode": "mutation", "partition": 1, "seqno": 1, "key": "o-2", "value": {"customer": "bob"}}),
                json!({"opcode": "deletion", "partition": 0, "seqno": 2, "key": "o-1"}),
                json!({"opcode": "stream_end", "partition": 0, "epoch": 1, "seqno": 3}),
            ],
        )
        .await;

        let p0 = output.iter().filter(|line| partition_of(line) == 0).collect::<Vec<_>>();
        let kinds = p0.iter().map(|line| line["kind"].as_str().unwrap()).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["lifecycle", "batch", "batch", "lifecycle"]);
        assert_eq!(p0[0]["message"]["entry"]["command"], "stream_begin");
        assert_eq!(p0[3]["message"]["entry"]["command"], "stream_end");

        // The deletion reaches both endpoints; the upsert only its owner.
        let entries = p0[1..3]
            .iter()
            .map(|line| line["record"]["entries"].as_array().unwrap().len())
            .sum::<usize>();
        assert_eq!(entries, 3);

        let p1 = output.iter().filter(|line| partition_of(line) == 1).collect::<Vec<_>>();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0]["record"]["source"], "orders");
        assert_eq!(p1[0]["record"]["entries"][0]["command"], "upsert");
        assert_eq!(p1[0]["record"]["entries"][0]["key"], r#"["bob"]"#);
        assert_eq!(p1[0]["record"]["entries"][0]["instance_id"], 7);
    }

    #[tokio::test]
    async fn flushes_every_n_events() {
        let output = replay(
            1,
            &[
                json!({"opcode": "mutation", "partition": 0, "seqno": 1, "key": "o-1", "value": {"customer": "ada"}}),
                json!({"opcode": "mutation", "partition": 0, "seqno": 2, "key": "o-1", "value": {"customer": "ada"}}),
            ],
        )
        .await;

        assert_eq!(output.len(), 2);
        assert!(output
            .iter()
            .all(|line| line["record"]["entries"].as_array().unwrap().len() == 1));
    }

    #[tokio::test]
    async fn non_matching_documents_are_broadcast() {
        let output = replay(
            0,
            &[json!({"opcode": "mutation", "partition": 0, "seqno": 1, "key": "o-1", "value": {"other": 1}})],
        )
        .await;

        assert_eq!(output.len(), 2);
        for line in &output {
            assert_eq!(line["record"]["entries"][0]["command"], "upsert_deletion");
        }
    }

    #[tokio::test]
    async fn invalid_record_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", json!({"opcode": "sync", "partition": 0})).unwrap();
        writeln!(file, "not json").unwrap();

        let err = Driver::new(config(0))
            .run(file.path().to_str().unwrap(), Vec::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
