//! The producer loop that moves rows from a cursor into a channel

use std::time::{Duration, Instant};

use rowflow_core::{AsyncRowSource, Error, PassThrough, Result, Row, RowPool, RowSource, RowTransform};
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelWriter, TryWriteError};

/// How a pump run ended
#[derive(Debug, Clone)]
pub enum PumpOutcome {
    /// The cursor ran out of rows
    Exhausted,
    /// The channel stopped accepting writes before the cursor ran out
    Abandoned,
    /// The cancellation token fired
    Cancelled,
    /// The cursor or the transform raised an error
    Faulted(Error),
}

impl PumpOutcome {
    /// Fault to complete the target channel with
    pub fn completion_fault(&self) -> Option<Error> {
        match self {
            PumpOutcome::Exhausted | PumpOutcome::Abandoned => None,
            PumpOutcome::Cancelled => Some(Error::Cancelled),
            PumpOutcome::Faulted(fault) => Some(fault.clone()),
        }
    }

    /// Short label used in logs and statistics
    pub fn label(&self) -> &'static str {
        match self {
            PumpOutcome::Exhausted => "exhausted",
            PumpOutcome::Abandoned => "abandoned",
            PumpOutcome::Cancelled => "cancelled",
            PumpOutcome::Faulted(_) => "faulted",
        }
    }
}

impl Serialize for PumpOutcome {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Result of one pump run
#[derive(Debug, Clone, Serialize)]
pub struct PumpReport {
    /// Successful cursor advances
    pub rows_read: u64,

    /// Items accepted by the target channel
    pub items_written: u64,

    /// How the run ended
    pub outcome: PumpOutcome,

    /// Wall time of the run
    pub elapsed: Duration,
}

impl PumpReport {
    /// Whether the run stopped before the cursor was exhausted
    pub fn ended_early(&self) -> bool {
        !matches!(self.outcome, PumpOutcome::Exhausted)
    }
}

pub(crate) enum Offer {
    Written,
    Closed,
    Cancelled { written: bool },
}

/// Offer `item` to `target`, waiting for capacity
///
/// If `cancel` fires while waiting the item gets one last non-blocking
/// attempt, so a row already read from the cursor is not lost to a
/// cancellation that raced with backpressure.
pub(crate) async fn offer<T>(target: &ChannelWriter<T>, mut item: T, cancel: &CancellationToken) -> Offer {
    loop {
        match target.try_write(item) {
            Ok(()) => return Offer::Written,
            Err(TryWriteError::Closed(_)) => return Offer::Closed,
            Err(TryWriteError::Full(back)) => item = back,
        }
        match target.wait_to_write(cancel).await {
            Ok(true) => {}
            Ok(false) => return Offer::Closed,
            Err(_) => {
                let written = target.try_write(item).is_ok();
                return Offer::Cancelled { written };
            }
        }
    }
}

/// Pulls rows from a [`RowSource`], transforms them and writes them to a channel
///
/// The pump owns its source for the duration of a run, so nothing else can
/// advance the cursor concurrently. Cancellation is checked only between
/// rows. By default the pump completes its target channel exactly once when
/// the run ends; [`defer_completion`](Pump::defer_completion) leaves that to
/// the caller, who completes from the returned [`PumpReport`].
pub struct Pump<S, X = PassThrough> {
    source: S,
    transform: X,
    pool: Option<RowPool>,
    complete_on_exit: bool,
}

impl<S: RowSource> Pump<S, PassThrough> {
    /// Create a pump forwarding raw rows
    pub fn new(source: S) -> Result<Self> {
        if source.field_count() == 0 {
            return Err(Error::InvalidArgument("row source has no columns".into()));
        }
        Ok(Self {
            source,
            transform: PassThrough,
            pool: None,
            complete_on_exit: true,
        })
    }
}

impl<S: RowSource, X: RowTransform> Pump<S, X> {
    /// Apply `transform` to every row before writing it
    pub fn with_transform<Y: RowTransform>(self, transform: Y) -> Pump<S, Y> {
        Pump {
            source: self.source,
            transform,
            pool: self.pool,
            complete_on_exit: self.complete_on_exit,
        }
    }

    /// Rent row storage from `pool` instead of allocating per row
    pub fn with_pool(mut self, pool: RowPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Leave completing the target channel to the caller
    pub fn defer_completion(mut self) -> Self {
        self.complete_on_exit = false;
        self
    }

    /// The row source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Take the row source back
    pub fn into_source(self) -> S {
        self.source
    }

    fn next_item(&self) -> Result<X::Output> {
        let row = Row::read_from(&self.source, self.pool.as_ref())?;
        self.transform.transform(row)
    }

    fn finish(&self, target: &ChannelWriter<X::Output>, report: &PumpReport) {
        match &report.outcome {
            PumpOutcome::Faulted(fault) => tracing::warn!(
                channel = target.name(),
                rows_read = report.rows_read,
                error = %fault,
                "pump faulted"
            ),
            outcome => tracing::debug!(
                channel = target.name(),
                rows_read = report.rows_read,
                items_written = report.items_written,
                outcome = outcome.label(),
                elapsed_ms = report.elapsed.as_millis(),
                "pump finished"
            ),
        }

        if self.complete_on_exit {
            target.complete(report.outcome.completion_fault());
        }
    }

    /// Drive a blocking cursor until it is exhausted, faults, is cancelled
    /// or the channel stops accepting writes
    ///
    /// Parks the calling thread while the channel is full. Run it on a
    /// dedicated or blocking thread, never on an async worker.
    pub fn run_blocking(&mut self, target: &ChannelWriter<X::Output>, cancel: &CancellationToken) -> PumpReport {
        let started = Instant::now();
        let mut rows_read = 0;
        let mut items_written = 0;
        tracing::debug!(channel = target.name(), columns = self.source.field_count(), "pump started");

        let outcome = loop {
            if cancel.is_cancelled() {
                break PumpOutcome::Cancelled;
            }
            match self.source.advance() {
                Ok(true) => rows_read += 1,
                Ok(false) => break PumpOutcome::Exhausted,
                Err(fault) => break PumpOutcome::Faulted(fault),
            }
            let item = match self.next_item() {
                Ok(item) => item,
                Err(fault) => break PumpOutcome::Faulted(fault),
            };
            match futures::executor::block_on(offer(target, item, cancel)) {
                Offer::Written => items_written += 1,
                Offer::Closed => break PumpOutcome::Abandoned,
                Offer::Cancelled { written } => {
                    items_written += u64::from(written);
                    break PumpOutcome::Cancelled;
                }
            }
        };

        let report = PumpReport {
            rows_read,
            items_written,
            outcome,
            elapsed: started.elapsed(),
        };
        self.finish(target, &report);
        report
    }
}

impl<S: AsyncRowSource, X: RowTransform> Pump<S, X> {
    /// Drive a cursor through its non-blocking advance
    pub async fn run(&mut self, target: &ChannelWriter<X::Output>, cancel: &CancellationToken) -> PumpReport {
        let started = Instant::now();
        let mut rows_read = 0;
        let mut items_written = 0;
        tracing::debug!(channel = target.name(), columns = self.source.field_count(), "async pump started");

        let outcome = loop {
            if cancel.is_cancelled() {
                break PumpOutcome::Cancelled;
            }
            match self.source.advance_async(cancel).await {
                Ok(true) => rows_read += 1,
                Ok(false) => break PumpOutcome::Exhausted,
                Err(Error::Cancelled) => break PumpOutcome::Cancelled,
                Err(fault) => break PumpOutcome::Faulted(fault),
            }
            let item = match self.next_item() {
                Ok(item) => item,
                Err(fault) => break PumpOutcome::Faulted(fault),
            };
            match offer(target, item, cancel).await {
                Offer::Written => items_written += 1,
                Offer::Closed => break PumpOutcome::Abandoned,
                Offer::Cancelled { written } => {
                    items_written += u64::from(written);
                    break PumpOutcome::Cancelled;
                }
            }
        };

        let report = PumpReport {
            rows_read,
            items_written,
            outcome,
            elapsed: started.elapsed(),
        };
        self.finish(target, &report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel, ChannelOptions, TryReadError};
    use rowflow_core::{FnTransform, Value};
    use rowflow_readers::MemoryRowSource;

    fn source(rows: i64) -> MemoryRowSource {
        MemoryRowSource::with_inferred_types(
            ["Id", "Name"],
            (1..=rows)
                .map(|id| vec![Value::Int64(id), Value::from(format!("row-{id}"))])
                .collect(),
        )
        .unwrap()
    }

    fn drain<T>(reader: &crate::channel::ChannelReader<T>) -> (Vec<T>, Option<Error>) {
        let mut items = Vec::new();
        loop {
            match reader.try_read() {
                Ok(item) => items.push(item),
                Err(TryReadError::Drained(fault)) => return (items, fault),
                Err(TryReadError::Empty) => panic!("channel left open"),
            }
        }
    }

    struct NoColumns;

    impl RowSource for NoColumns {
        fn field_count(&self) -> usize {
            0
        }

        fn name(&self, ordinal: usize) -> Result<&str> {
            Err(Error::OrdinalOutOfRange { ordinal, field_count: 0 })
        }

        fn data_type(&self, ordinal: usize) -> Result<rowflow_core::DataType> {
            Err(Error::OrdinalOutOfRange { ordinal, field_count: 0 })
        }

        fn advance(&mut self) -> Result<bool> {
            Ok(false)
        }

        fn value(&self, ordinal: usize) -> Result<Value> {
            Err(Error::OrdinalOutOfRange { ordinal, field_count: 0 })
        }
    }

    #[test]
    fn rejects_sources_without_columns() {
        assert!(matches!(Pump::new(NoColumns), Err(Error::InvalidArgument(_))));
        let empty = MemoryRowSource::from_names(["a"], vec![]).unwrap();
        assert!(Pump::new(empty).is_ok());
    }

    #[test]
    fn pumps_every_row_and_completes() {
        let (writer, reader) = channel(ChannelOptions::unbounded()).unwrap();
        let pool = RowPool::new(8);
        let mut pump = Pump::new(source(5)).unwrap().with_pool(pool.clone());

        let report = pump.run_blocking(&writer, &CancellationToken::new());
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.items_written, 5);
        assert!(matches!(report.outcome, PumpOutcome::Exhausted));
        assert!(!report.ended_early());

        let (rows, fault) = drain(&reader);
        assert!(fault.is_none());
        let ids: Vec<i64> = rows.iter().filter_map(|row| row[0].as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(rows.iter().all(Row::is_pooled));

        drop(rows);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn cursor_fault_completes_with_fault() {
        let (writer, reader) = channel(ChannelOptions::unbounded()).unwrap();
        let mut pump = Pump::new(source(5).fail_after(2, "network down")).unwrap();

        let report = pump.run_blocking(&writer, &CancellationToken::new());
        assert_eq!(report.items_written, 2);
        assert!(matches!(report.outcome, PumpOutcome::Faulted(_)));

        let (rows, fault) = drain(&reader);
        assert_eq!(rows.len(), 2);
        assert_eq!(fault.unwrap().to_string(), "Cursor fault: network down");
    }

    #[test]
    fn transform_errors_fault_the_run() {
        let (writer, reader) = channel(ChannelOptions::unbounded()).unwrap();
        let transform = FnTransform::new(|row: Row| match row[0].as_i64() {
            Some(3) => Err(Error::InvalidArgument("three".into())),
            _ => Ok(row[0].clone()),
        });
        let mut pump = Pump::new(source(5)).unwrap().with_transform(transform);

        let report = pump.run_blocking(&writer, &CancellationToken::new());
        assert_eq!(report.rows_read, 3);
        let (items, fault) = drain(&reader);
        assert_eq!(items, vec![Value::Int64(1), Value::Int64(2)]);
        assert!(matches!(fault, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn pre_cancelled_token_reads_nothing() {
        let (writer, reader) = channel(ChannelOptions::bounded(1)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pump = Pump::new(source(3)).unwrap();

        let report = pump.run_blocking(&writer, &cancel);
        assert_eq!(report.rows_read, 0);
        assert_eq!(pump.source().advances(), 0);
        let (rows, fault) = drain(&reader);
        assert!(rows.is_empty());
        assert!(fault.unwrap().is_cancelled());
    }

    #[test]
    fn abandoned_when_reader_goes_away() {
        let (writer, reader) = channel(ChannelOptions::bounded(1)).unwrap();
        drop(reader);
        let mut pump = Pump::new(source(10)).unwrap();

        let report = pump.run_blocking(&writer, &CancellationToken::new());
        assert!(matches!(report.outcome, PumpOutcome::Abandoned));
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.items_written, 0);
        assert_eq!(pump.into_source().remaining(), 9);
    }

    #[test]
    fn deferred_completion_leaves_channel_open() {
        let (writer, reader) = channel(ChannelOptions::unbounded()).unwrap();
        let mut pump = Pump::new(source(2)).unwrap().defer_completion();

        let report = pump.run_blocking(&writer, &CancellationToken::new());
        assert!(reader.state().is_open());
        writer.complete(report.outcome.completion_fault());

        let (rows, fault) = drain(&reader);
        assert_eq!(rows.len(), 2);
        assert!(fault.is_none());
        assert_eq!(report.outcome.label(), "exhausted");
    }

    #[tokio::test]
    async fn async_run_drives_async_sources() {
        let (writer, reader) = channel::<Row>(ChannelOptions::bounded(2)).unwrap();
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(row) = reader.read().await.unwrap() {
                ids.push(row[0].as_i64().unwrap());
            }
            (ids, reader.high_water_mark())
        });

        let mut pump = Pump::new(source(20)).unwrap();
        let report = pump.run(&writer, &cancel).await;
        drop(writer);

        let (ids, high_water_mark) = consumer.await.unwrap();
        assert_eq!(report.items_written, 20);
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        assert!(high_water_mark <= 2);
    }
}
