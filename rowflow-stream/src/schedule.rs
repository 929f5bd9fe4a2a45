//! Pipeline composition and run scheduling

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use rowflow_core::{
    AsyncRowSource, ColumnOrdinalMapping, Error, MappingOrder, OrdinalMapper, Result, Row, RowPool,
    RowPoolStats, RowSource, RowTransform, Schema,
};
use rowflow_transforms::{Record, RecordTransformer, TransformerCache, TransformerOptions};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::channel::{channel, Capacity, ChannelOptions, ChannelReader};
use crate::pump::{offer, Offer, Pump, PumpOutcome, PumpReport};

/// Configuration for a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name used for channels and log events
    pub name: String,

    /// Capacity of the raw row channel behind the cursor
    pub buffer_size: usize,

    /// Capacity of the caller-visible channel; `None` is unbounded
    pub output_capacity: Option<usize>,

    /// Rent row storage from a pool shared by every run
    pub pool_rows: bool,

    /// Free buffers the pool keeps per row width
    pub max_pooled_per_width: usize,

    /// Fail typed pipelines whose record members have no column
    pub strict_mapping: bool,

    /// Order of the resolved column mapping
    pub mapping_order: MappingOrder,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "rowflow".to_string(),
            buffer_size: 128,
            output_capacity: None,
            pool_rows: true,
            max_pooled_per_width: 256,
            strict_mapping: false,
            mapping_order: MappingOrder::Requested,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration; absent keys take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no pipeline can run with
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("pipeline name must not be empty".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be at least 1".into()));
        }
        if self.output_capacity == Some(0) {
            return Err(Error::Config("output_capacity must be at least 1 when set".into()));
        }
        Ok(())
    }

    /// Capacity of the only channel of a single-stage pipeline
    fn single_stage_capacity(&self) -> Capacity {
        Capacity::Bounded(self.output_capacity.unwrap_or(self.buffer_size))
    }
}

/// Statistics from one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    /// Identifier recorded on the run's log span
    pub run_id: Uuid,

    /// Pipeline name
    pub name: String,

    /// Successful cursor advances
    pub rows_read: u64,

    /// Items accepted by the caller-visible channel
    pub items_delivered: u64,

    /// How the run ended
    pub outcome: PumpOutcome,

    /// Completion fault of the caller-visible channel, rendered
    pub fault: Option<String>,

    /// Wall time of the run
    pub elapsed: Duration,

    /// Row pool usage after the run, if rows are pooled
    pub pool: Option<RowPoolStats>,
}

impl PipelineStats {
    /// Render as JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Per-run bookkeeping shared by every pipeline shape
struct RunContext {
    run_id: Uuid,
    name: String,
    started: Instant,
    pool: Option<RowPool>,
}

impl RunContext {
    fn span(&self, mode: &'static str) -> tracing::Span {
        tracing::info_span!("rowflow.pipeline", run_id = %self.run_id, pipeline = %self.name, mode)
    }

    fn finish(self, rows_read: u64, items_delivered: u64, outcome: PumpOutcome) -> PipelineStats {
        let fault = outcome.completion_fault().map(|fault| fault.to_string());
        tracing::debug!(
            rows_read,
            items_delivered,
            outcome = outcome.label(),
            "pipeline finished"
        );
        PipelineStats {
            run_id: self.run_id,
            name: self.name,
            rows_read,
            items_delivered,
            outcome,
            fault,
            elapsed: self.started.elapsed(),
            pool: self.pool.map(|pool| pool.stats()),
        }
    }

    fn finish_pump(self, report: PumpReport) -> PipelineStats {
        self.finish(report.rows_read, report.items_written, report.outcome)
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current()
        .map_err(|_| Error::InvalidArgument("pipelines must be started inside a tokio runtime".into()))
}

fn outcome_from_fault(fault: Option<Error>) -> PumpOutcome {
    match fault {
        None => PumpOutcome::Exhausted,
        Some(Error::Cancelled) => PumpOutcome::Cancelled,
        Some(fault) => PumpOutcome::Faulted(fault),
    }
}

/// How the transform stage stopped reading raw rows
enum StageEnd {
    /// The raw channel was drained; the pump's completion is final
    Drained(PumpOutcome),
    /// The stage stopped on its own before the raw channel was drained
    Stopped(PumpOutcome),
}

/// Composes pumps, channels and record transformers into running pipelines
///
/// Every `stream_*` call starts one run on the current tokio runtime and
/// returns the caller's end immediately. The row source is moved into the
/// run, so it stays valid and unshared until the pump finishes.
pub struct RowPipeline {
    config: PipelineConfig,
    pool: Option<RowPool>,
    cache: TransformerCache,
}

impl RowPipeline {
    /// Create a pipeline from a validated configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pool = config.pool_rows.then(|| RowPool::new(config.max_pooled_per_width));
        Ok(Self {
            config,
            pool,
            cache: TransformerCache::new(),
        })
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Row pool shared by every run, if rows are pooled
    pub fn pool(&self) -> Option<&RowPool> {
        self.pool.as_ref()
    }

    /// Resolve the members of `T` against `schema` using the configured order and strictness
    pub fn resolve_mapping<T: Record>(&self, schema: &Schema, options: &TransformerOptions) -> Result<ColumnOrdinalMapping> {
        let members = T::members();
        OrdinalMapper::new(schema)
            .with_overrides(
                members
                    .iter()
                    .filter(|member| member.column.is_some())
                    .map(|member| (member.name, member.column_name())),
            )
            .with_overrides(options.overrides.clone())
            .order(self.config.mapping_order)
            .strict(self.config.strict_mapping || options.strict)
            .map(members.iter().map(|member| member.name))
    }

    /// Compiled transformer for `T` over `schema`, reused across runs
    pub fn transformer<T: Record>(&self, schema: &Schema, options: &TransformerOptions) -> Result<Arc<RecordTransformer<T>>> {
        let mapping = self.resolve_mapping::<T>(schema, options)?;
        let transformer = self.cache.get_or_build::<T>(&mapping)?;
        transformer.mapping().check_schema(schema)?;
        Ok(transformer)
    }

    fn pump<S: RowSource>(&self, source: S) -> Result<Pump<S>> {
        let pump = Pump::new(source)?;
        Ok(match &self.pool {
            Some(pool) => pump.with_pool(pool.clone()),
            None => pump,
        })
    }

    fn start_run(&self) -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            name: self.config.name.clone(),
            started: Instant::now(),
            pool: self.pool.clone(),
        }
    }

    fn channel_options(&self, suffix: &str, capacity: Capacity) -> ChannelOptions {
        ChannelOptions {
            capacity,
            name: format!("{}.{suffix}", self.config.name),
        }
    }

    fn spawn_single_stage<S, X>(
        &self,
        runtime: &Handle,
        mut pump: Pump<S, X>,
        mode: &'static str,
        cancel: CancellationToken,
    ) -> Result<PipelineHandle<X::Output>>
    where
        S: RowSource + 'static,
        X: RowTransform + 'static,
    {
        let (writer, reader) = channel(self.channel_options(mode, self.config.single_stage_capacity()))?;
        let run = self.start_run();
        let run_id = run.run_id;
        let span = run.span(mode);
        let pump_cancel = cancel.clone();

        let join = runtime.spawn_blocking(move || {
            let _entered = span.enter();
            let report = pump.run_blocking(&writer, &pump_cancel);
            run.finish_pump(report)
        });

        Ok(PipelineHandle::new(reader, PipelineTask { run_id, cancel, join }))
    }

    /// Stream raw rows from a blocking cursor
    ///
    /// The cursor loop runs on a blocking thread and suspends whenever the
    /// caller falls a channel's worth of rows behind.
    pub fn stream_rows<S>(&self, source: S, cancel: CancellationToken) -> Result<PipelineHandle<Row>>
    where
        S: RowSource + 'static,
    {
        let runtime = current_runtime()?;
        let pump = self.pump(source)?;
        self.spawn_single_stage(&runtime, pump, "rows", cancel)
    }

    /// Stream raw rows from a cursor with a non-blocking advance
    pub fn stream_rows_async<S>(&self, source: S, cancel: CancellationToken) -> Result<PipelineHandle<Row>>
    where
        S: AsyncRowSource + 'static,
    {
        let runtime = current_runtime()?;
        let mut pump = self.pump(source)?;
        let (writer, reader) = channel(self.channel_options("rows", self.config.single_stage_capacity()))?;
        let run = self.start_run();
        let run_id = run.run_id;
        let span = run.span("rows-async");
        let pump_cancel = cancel.clone();

        let join = runtime.spawn(
            async move {
                let report = pump.run(&writer, &pump_cancel).await;
                run.finish_pump(report)
            }
            .instrument(span),
        );

        Ok(PipelineHandle::new(reader, PipelineTask { run_id, cancel, join }))
    }

    /// Stream typed records, materializing inside the cursor loop
    ///
    /// A slow consumer holds up the cursor directly. Prefer
    /// [`stream_records`](Self::stream_records) unless that coupling is wanted.
    pub fn stream_records_unbuffered<T, S>(
        &self,
        source: S,
        options: &TransformerOptions,
        cancel: CancellationToken,
    ) -> Result<PipelineHandle<T>>
    where
        T: Record,
        S: RowSource + 'static,
    {
        let runtime = current_runtime()?;
        let pump = self.pump(source)?;
        let transformer = self.transformer::<T>(&pump.source().schema()?, options)?;
        self.spawn_single_stage(&runtime, pump.with_transform(transformer), "records-unbuffered", cancel)
    }

    /// Stream typed records through a raw row buffer
    ///
    /// The pump writes raw rows into a channel of `buffer_size` rows. A
    /// transform stage materializes them, dropping each row (and returning
    /// its pooled storage) before the record is forwarded to the caller's
    /// channel. Peak row storage stays bounded by the buffer size however
    /// large the output capacity is.
    ///
    /// The caller's channel completes only after the raw channel is drained
    /// and the pump has finished. When both stages fault, the earlier fault
    /// is the one reported.
    pub fn stream_records<T, S>(
        &self,
        source: S,
        options: &TransformerOptions,
        cancel: CancellationToken,
    ) -> Result<PipelineHandle<T>>
    where
        T: Record,
        S: RowSource + 'static,
    {
        let runtime = current_runtime()?;
        let mut pump = self.pump(source)?;
        let transformer = self.transformer::<T>(&pump.source().schema()?, options)?;

        let (raw_writer, raw_reader) =
            channel::<Row>(self.channel_options("raw", Capacity::Bounded(self.config.buffer_size)))?;
        let (out_writer, out_reader) =
            channel::<T>(self.channel_options("out", Capacity::from_option(self.config.output_capacity)))?;

        let run = self.start_run();
        let run_id = run.run_id;
        let span = run.span("records");
        let pump_cancel = cancel.child_token();
        let stage_cancel = cancel.clone();

        let join = runtime.spawn(
            async move {
                let pump_span = tracing::Span::current();
                let pump_task = {
                    let pump_cancel = pump_cancel.clone();
                    tokio::task::spawn_blocking(move || {
                        let _entered = pump_span.enter();
                        pump.run_blocking(&raw_writer, &pump_cancel)
                    })
                };

                let mut delivered = 0_u64;
                let end = loop {
                    let row = match raw_reader.read().await {
                        Ok(Some(row)) => row,
                        Ok(None) => break StageEnd::Drained(PumpOutcome::Exhausted),
                        Err(fault) => break StageEnd::Drained(outcome_from_fault(Some(fault))),
                    };
                    let record = match transformer.transform(row) {
                        Ok(record) => record,
                        Err(fault) => break StageEnd::Stopped(PumpOutcome::Faulted(fault)),
                    };
                    match offer(&out_writer, record, &stage_cancel).await {
                        Offer::Written => delivered += 1,
                        Offer::Closed => break StageEnd::Stopped(PumpOutcome::Abandoned),
                        Offer::Cancelled { written } => {
                            delivered += u64::from(written);
                            break StageEnd::Stopped(PumpOutcome::Cancelled);
                        }
                    }
                };

                let outcome = match end {
                    StageEnd::Drained(outcome) => outcome,
                    StageEnd::Stopped(outcome) => {
                        let earlier = raw_reader.completion_fault();
                        pump_cancel.cancel();
                        tracing::debug!(outcome = outcome.label(), "transform stage stopped early");
                        match earlier {
                            Some(fault) => outcome_from_fault(Some(fault)),
                            None => outcome,
                        }
                    }
                };
                drop(raw_reader);

                let (rows_read, outcome) = match pump_task.await {
                    Ok(report) => (report.rows_read, outcome),
                    Err(join_error) => {
                        let failed = Error::TaskFailed(format!("pump: {join_error}"));
                        let outcome = match outcome {
                            PumpOutcome::Exhausted | PumpOutcome::Faulted(Error::WriterDropped) => {
                                PumpOutcome::Faulted(failed)
                            }
                            other => other,
                        };
                        (0, outcome)
                    }
                };

                if let PumpOutcome::Faulted(fault) = &outcome {
                    tracing::warn!(error = %fault, "pipeline faulted");
                }
                out_writer.complete(outcome.completion_fault());
                run.finish(rows_read, delivered, outcome)
            }
            .instrument(span),
        );

        Ok(PipelineHandle::new(out_reader, PipelineTask { run_id, cancel, join }))
    }
}

impl Default for RowPipeline {
    fn default() -> Self {
        let config = PipelineConfig::default();
        let pool = Some(RowPool::new(config.max_pooled_per_width));
        Self {
            config,
            pool,
            cache: TransformerCache::new(),
        }
    }
}

impl fmt::Debug for RowPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowPipeline")
            .field("config", &self.config)
            .field("cached_transformers", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// The background side of a running pipeline
#[derive(Debug)]
pub struct PipelineTask {
    run_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<PipelineStats>,
}

impl PipelineTask {
    /// Run identifier
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Request cancellation; the run stops at the next row boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether every stage has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for every stage to finish
    pub async fn join(self) -> Result<PipelineStats> {
        self.join.await.map_err(|e| Error::TaskFailed(e.to_string()))
    }
}

/// Caller's end of a running pipeline
///
/// Dropping the handle, or its reader, abandons the run: the pump stops
/// at its next write and the unread items are discarded.
#[derive(Debug)]
pub struct PipelineHandle<T> {
    reader: ChannelReader<T>,
    task: PipelineTask,
}

impl<T> PipelineHandle<T> {
    fn new(reader: ChannelReader<T>, task: PipelineTask) -> Self {
        Self { reader, task }
    }

    /// Run identifier
    pub fn run_id(&self) -> Uuid {
        self.task.run_id
    }

    /// The caller-visible channel
    pub fn reader(&self) -> &ChannelReader<T> {
        &self.reader
    }

    /// Request cancellation; the run stops at the next row boundary
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Wait for the next item
    pub async fn next(&self) -> Result<Option<T>> {
        self.reader.read().await
    }

    /// Split into the reader and the background task
    pub fn into_parts(self) -> (ChannelReader<T>, PipelineTask) {
        (self.reader, self.task)
    }

    /// Stop reading and wait for the run to finish
    pub async fn join(self) -> Result<PipelineStats> {
        let (reader, task) = self.into_parts();
        drop(reader);
        task.join().await
    }

    /// Read every item, then wait for the run to finish
    ///
    /// Returns the completion fault instead of the items if the run faulted.
    pub async fn collect(self) -> Result<Vec<T>> {
        let (reader, task) = self.into_parts();
        let mut items = Vec::new();
        let drained = loop {
            match reader.read().await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break Ok(()),
                Err(fault) => break Err(fault),
            }
        };
        drop(reader);
        task.join().await?;
        drained.map(|()| items)
    }
}

impl<T: Send + 'static> PipelineHandle<T> {
    /// Consume the handle as a stream; the background task is detached
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        self.reader.into_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_readers::MemoryRowSource;
    use rowflow_core::Value;
    use test_case::test_case;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_size, 128);
        assert_eq!(config.output_capacity, None);
        assert_eq!(config.mapping_order, MappingOrder::Requested);
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = PipelineConfig::from_json(r#"{"name": "orders", "buffer_size": 8, "mapping_order": "ordinal"}"#)
            .unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.mapping_order, MappingOrder::Ordinal);
        assert!(config.pool_rows);
    }

    #[test_case(r#"{"buffer_size": 0}"# ; "zero buffer")]
    #[test_case(r#"{"output_capacity": 0}"# ; "zero output capacity")]
    #[test_case(r#"{"name": "  "}"# ; "blank name")]
    #[test_case(r#"{"buffer_size": "lots"}"# ; "malformed")]
    fn rejects_bad_config(json: &str) {
        assert!(matches!(PipelineConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn single_stage_capacity_prefers_output_capacity() {
        let mut config = PipelineConfig {
            buffer_size: 4,
            ..Default::default()
        };
        assert_eq!(config.single_stage_capacity(), Capacity::Bounded(4));
        config.output_capacity = Some(9);
        assert_eq!(config.single_stage_capacity(), Capacity::Bounded(9));
    }

    #[test]
    fn needs_a_runtime() {
        let source = MemoryRowSource::from_names(["a"], vec![vec![Value::Int64(1)]]).unwrap();
        let err = RowPipeline::default()
            .stream_rows(source, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn stats_serialize_with_run_id() {
        let source = MemoryRowSource::from_names(["a"], vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]).unwrap();
        let pipeline = RowPipeline::default();
        let handle = pipeline.stream_rows(source, CancellationToken::new()).unwrap();
        let run_id = handle.run_id();

        let (reader, task) = handle.into_parts();
        while reader.read().await.unwrap().is_some() {}
        let stats = task.join().await.unwrap();

        assert_eq!(stats.run_id, run_id);
        assert_eq!(stats.rows_read, 2);
        assert_eq!(stats.items_delivered, 2);
        let json = stats.to_json().unwrap();
        assert!(json.contains(&run_id.to_string()));
        assert!(json.contains("\"outcome\":\"exhausted\""));
    }
}
