//! Backpressured streaming of blocking cursors into async consumers
//!
//! A [`Pump`] pulls rows off a [`RowSource`](rowflow_core::RowSource) and
//! writes them into a bounded channel whose writer waits, rather than
//! drops, when the consumer falls behind. [`RowPipeline`] wires pumps,
//! channels and record transformers into runs that the caller consumes
//! through a [`PipelineHandle`].
//!
//! ```no_run
//! # async fn demo() -> rowflow_core::Result<()> {
//! use rowflow_core::{CancellationToken, Value};
//! use rowflow_readers::MemoryRowSource;
//! use rowflow_stream::{PipelineConfig, RowPipeline};
//!
//! let source = MemoryRowSource::from_names(["Id"], vec![vec![Value::Int64(1)]])
//!     .map_err(rowflow_core::Error::from)?;
//! let pipeline = RowPipeline::new(PipelineConfig::default())?;
//! let rows = pipeline.stream_rows(source, CancellationToken::new())?.collect().await?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod channel;
pub mod pump;
pub mod schedule;

pub use channel::{
    channel, BlockingIter, Capacity, ChannelOptions, ChannelReader, ChannelState, ChannelWriter, TryReadError,
    TryWriteError,
};
pub use pump::{Pump, PumpOutcome, PumpReport};
pub use schedule::{PipelineConfig, PipelineHandle, PipelineStats, PipelineTask, RowPipeline};
