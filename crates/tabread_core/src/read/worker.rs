//! Read worker: claims entities, reads their rows, pushes them downstream.

use super::channel::{ResultSender, SendFailure};
use super::queue::EntityWorkQueue;
use super::{ReadError, ReadResult, ResultRecord};
use crate::cancel::CancelFlag;
use crate::model::entity::Entity;
use crate::model::value::Value;
use crate::source::{ColumnDescriptor, ValueSource};
use log::{debug, error};
use std::sync::Arc;
use uuid::Uuid;

/// State shared by every worker of one read.
pub(crate) struct WorkerContext<'r> {
    pub(crate) read_id: Uuid,
    pub(crate) source: &'r dyn ValueSource,
    pub(crate) columns: &'r [Arc<dyn ColumnDescriptor>],
    pub(crate) queue: &'r EntityWorkQueue,
    /// Set on consumer-relayed cancellation and on teardown.
    pub(crate) stop: &'r CancelFlag,
    pub(crate) external_cancel: Option<&'r CancelFlag>,
    pub(crate) ignore_read_errors: bool,
    pub(crate) buffer_capacity: usize,
}

impl WorkerContext<'_> {
    fn should_stop(&self) -> bool {
        self.stop.is_cancelled()
            || self
                .external_cancel
                .is_some_and(|flag| flag.is_cancelled())
    }
}

/// Per-worker counters, merged into the read summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WorkerStats {
    pub(crate) sent: usize,
    pub(crate) skipped_without_data: usize,
    pub(crate) substituted_values: usize,
}

pub(crate) struct ReadWorker<'r> {
    index: usize,
    ctx: &'r WorkerContext<'r>,
    sender: ResultSender,
}

impl<'r> ReadWorker<'r> {
    pub(crate) fn new(index: usize, ctx: &'r WorkerContext<'r>, sender: ResultSender) -> Self {
        Self { index, ctx, sender }
    }

    /// Drains the queue until it is empty, a stop is requested, or a row
    /// fails.
    ///
    /// A closed channel means the consumer tore the read down; the worker
    /// exits quietly in that case.
    pub(crate) fn run(self) -> ReadResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        let outcome = self.drain(&mut stats);
        if let Err(err) = &outcome {
            error!(
                "event=read_worker module=read status=error read_id={} worker={} sent={} error={}",
                self.ctx.read_id, self.index, stats.sent, err
            );
        } else {
            debug!(
                "event=read_worker module=read status=ok read_id={} worker={} sent={} skipped={}",
                self.ctx.read_id, self.index, stats.sent, stats.skipped_without_data
            );
        }
        outcome.map(|()| stats)
    }

    fn drain(&self, stats: &mut WorkerStats) -> ReadResult<()> {
        while !self.ctx.should_stop() {
            let Some(entity) = self.ctx.queue.pop() else {
                return Ok(());
            };
            if !self.ctx.source.has_data(&entity)? {
                stats.skipped_without_data += 1;
                continue;
            }

            let values = self.read_row(&entity, stats)?;
            match self.sender.send(ResultRecord { entity, values }) {
                Ok(()) => stats.sent += 1,
                Err(SendFailure::Closed) => return Ok(()),
                Err(SendFailure::Full) => {
                    return Err(ReadError::ResultChannelFull {
                        capacity: self.ctx.buffer_capacity,
                    })
                }
            }
        }
        Ok(())
    }

    fn read_row(&self, entity: &Entity, stats: &mut WorkerStats) -> ReadResult<Vec<Value>> {
        let mut values = Vec::with_capacity(self.ctx.columns.len());
        for column in self.ctx.columns {
            match column.read_value(entity) {
                Ok(value) => values.push(value),
                Err(err) if self.ctx.ignore_read_errors => {
                    debug!(
                        "event=read_value module=read status=substituted read_id={} entity={} variable={} error={}",
                        self.ctx.read_id,
                        entity,
                        column.variable(),
                        err
                    );
                    stats.substituted_values += 1;
                    values.push(column.empty_value());
                }
                Err(err) => {
                    return Err(ReadError::Value {
                        entity: entity.clone(),
                        variable: column.variable().to_string(),
                        cause: err,
                    })
                }
            }
        }
        Ok(values)
    }
}
