//! Read coordinator: owns the worker pool and drives the consumer loop.
//!
//! # Invariants
//! - Entities are resolved once, before `on_begin`, and never change during
//!   the read.
//! - An empty entity list spawns no worker threads.
//! - The consumer never blocks on an empty channel for longer than the poll
//!   interval, so worker completion is always observed.
//! - After every worker is seen finished, the channel is drained once more;
//!   a last row may land between the completion check and the exit.
//! - Whatever happens, workers are stopped and joined before `read` returns.
//!
//! When several workers fail, the first error in worker index order is
//! returned; the others are logged and dropped.

use super::channel::{self, Poll, ResultReceiver};
use super::queue::EntityWorkQueue;
use super::worker::{ReadWorker, WorkerContext, WorkerStats};
use super::{ReadCallback, ReadError, ReadOptions, ReadResult, ReadSummary};
use crate::cancel::CancelFlag;
use crate::logging::{panic_message, sanitize_message};
use crate::model::entity::Entity;
use crate::source::{ColumnDescriptor, SourceError, ValueSource};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_PANIC_MESSAGE_CHARS: usize = 200;

/// Bulk reader over one source.
pub struct ReadCoordinator<'s> {
    source: &'s dyn ValueSource,
    options: ReadOptions,
}

/// Reads `source` into `callback` with `options`.
pub fn read_values<S, C>(
    source: &S,
    options: ReadOptions,
    callback: &mut C,
) -> ReadResult<ReadSummary>
where
    S: ValueSource,
    C: ReadCallback,
{
    ReadCoordinator::new(source, options).read(callback)
}

impl<'s> ReadCoordinator<'s> {
    pub fn new(source: &'s dyn ValueSource, options: ReadOptions) -> Self {
        Self { source, options }
    }

    /// Runs one read to completion.
    ///
    /// # Errors
    /// - `InvalidOptions` before anything is resolved.
    /// - `Source` when a variable or the entity list cannot be resolved.
    /// - Any error returned by a callback hook, unchanged.
    /// - The first worker failure, after `on_complete` has been called.
    pub fn read(&self, callback: &mut dyn ReadCallback) -> ReadResult<ReadSummary> {
        let started_at = Instant::now();
        self.options.validate()?;

        let read_id = Uuid::new_v4();
        let variables = self.resolve_variables();
        let columns = variables
            .iter()
            .map(|variable| self.source.resolve_column(variable))
            .collect::<Result<Vec<_>, _>>()?;
        let entities = self.resolve_entities()?;

        info!(
            "event=read_begin module=read status=start read_id={} source={} entities={} variables={} workers={} buffer={}",
            read_id,
            self.source.name(),
            entities.len(),
            variables.len(),
            self.options.concurrency,
            self.options.buffer_capacity
        );
        callback.on_begin(&entities, &variables)?;

        let mut summary = ReadSummary {
            read_id,
            entities: entities.len(),
            delivered: 0,
            skipped_without_data: 0,
            substituted_values: 0,
            cancelled: false,
            elapsed: Duration::ZERO,
        };

        let outcome = if entities.is_empty() {
            callback.on_complete()
        } else {
            self.run_workers(read_id, entities, &variables, &columns, callback, &mut summary)
        };

        summary.elapsed = started_at.elapsed();
        match &outcome {
            Ok(()) => info!(
                "event=read_end module=read status=ok read_id={} delivered={} skipped={} substituted={} cancelled={} duration_ms={}",
                read_id,
                summary.delivered,
                summary.skipped_without_data,
                summary.substituted_values,
                summary.cancelled,
                summary.elapsed.as_millis()
            ),
            Err(err) => error!(
                "event=read_end module=read status=error read_id={} delivered={} duration_ms={} error={}",
                read_id,
                summary.delivered,
                summary.elapsed.as_millis(),
                err
            ),
        }
        outcome.map(|()| summary)
    }

    fn run_workers(
        &self,
        read_id: Uuid,
        entities: Vec<Entity>,
        variables: &[String],
        columns: &[Arc<dyn ColumnDescriptor>],
        callback: &mut dyn ReadCallback,
        summary: &mut ReadSummary,
    ) -> ReadResult<()> {
        let queue = EntityWorkQueue::new(entities);
        let stop = CancelFlag::new();
        let ctx = WorkerContext {
            read_id,
            source: self.source,
            columns,
            queue: &queue,
            stop: &stop,
            external_cancel: self.options.cancel_flag.as_ref(),
            ignore_read_errors: self.options.ignore_read_errors,
            buffer_capacity: self.options.buffer_capacity,
        };

        thread::scope(|scope| -> ReadResult<()> {
            let (sender, receiver) =
                channel::bounded(self.options.buffer_capacity, self.options.overflow_policy);
            let mut pool = WorkerPool {
                read_id,
                stop: &stop,
                receiver: Some(receiver),
                handles: Vec::with_capacity(self.options.concurrency),
            };

            for index in 0..self.options.concurrency {
                let worker = ReadWorker::new(index, &ctx, sender.clone());
                let handle = thread::Builder::new()
                    .name((self.options.thread_name)(index))
                    .spawn_scoped(scope, move || worker.run())
                    .map_err(ReadError::Spawn)?;
                pool.handles.push(handle);
            }
            // Only workers hold senders from here on.
            drop(sender);

            summary.delivered = pool.flush(callback, variables, self.options.poll_interval)?;
            summary.cancelled = stop.is_cancelled()
                || ctx.external_cancel.is_some_and(|flag| flag.is_cancelled());
            callback.on_complete()?;

            let totals = pool.join()?;
            summary.skipped_without_data = totals.skipped_without_data;
            summary.substituted_values = totals.substituted_values;
            Ok(())
        })
    }

    fn resolve_variables(&self) -> Vec<String> {
        self.options
            .variables
            .clone()
            .unwrap_or_else(|| self.source.variable_names())
    }

    fn resolve_entities(&self) -> ReadResult<Vec<Entity>> {
        let entities = match &self.options.entities {
            Some(entities) => entities.clone(),
            None if self.source.can_list_entities() => self.source.list_entities()?,
            None => {
                return Err(SourceError::EntitiesNotEnumerable(self.source.name().to_string()).into())
            }
        };
        Ok(unique_in_order(entities))
    }
}

fn unique_in_order(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::with_capacity(entities.len());
    entities
        .into_iter()
        .filter(|entity| seen.insert(entity.clone()))
        .collect()
}

struct WorkerPool<'scope, 'r> {
    read_id: Uuid,
    stop: &'r CancelFlag,
    receiver: Option<ResultReceiver>,
    handles: Vec<ScopedJoinHandle<'scope, ReadResult<WorkerStats>>>,
}

impl WorkerPool<'_, '_> {
    /// Delivers rows until every worker has finished, then drains once more.
    fn flush(
        &self,
        callback: &mut dyn ReadCallback,
        variables: &[String],
        poll_interval: Duration,
    ) -> ReadResult<usize> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(0);
        };
        let mut delivered = 0;

        loop {
            self.relay_cancel(callback);
            match receiver.poll(poll_interval) {
                Poll::Record(record) => {
                    callback.on_values(&record.entity, variables, record.values)?;
                    delivered += 1;
                    continue;
                }
                Poll::Closed => break,
                Poll::Empty => {}
            }
            if self.handles.iter().all(ScopedJoinHandle::is_finished) {
                break;
            }
        }

        while let Poll::Record(record) = receiver.try_next() {
            callback.on_values(&record.entity, variables, record.values)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn relay_cancel(&self, callback: &dyn ReadCallback) {
        if !self.stop.is_cancelled() && callback.is_cancelled() {
            info!(
                "event=read_cancel module=read status=ok read_id={}",
                self.read_id
            );
            self.stop.cancel();
        }
    }

    /// Joins every worker in index order and returns the first failure.
    fn join(&mut self) -> ReadResult<WorkerStats> {
        let mut totals = WorkerStats::default();
        let mut first_error = None;

        for (index, handle) in self.handles.drain(..).enumerate() {
            let result = handle.join().unwrap_or_else(|payload| {
                Err(ReadError::WorkerPanicked {
                    worker: index,
                    message: sanitize_message(
                        &panic_message(payload.as_ref()),
                        MAX_PANIC_MESSAGE_CHARS,
                    ),
                })
            });
            match result {
                Ok(stats) => {
                    totals.sent += stats.sent;
                    totals.skipped_without_data += stats.skipped_without_data;
                    totals.substituted_values += stats.substituted_values;
                }
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => warn!(
                    "event=read_worker module=read status=discarded read_id={} worker={} error={}",
                    self.read_id, index, err
                ),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(totals),
        }
    }
}

impl Drop for WorkerPool<'_, '_> {
    fn drop(&mut self) {
        self.stop.cancel();
        // Closing the channel wakes workers blocked on a full buffer.
        self.receiver.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::unique_in_order;
    use crate::model::entity::Entity;

    #[test]
    fn unique_in_order_keeps_first_occurrence() {
        let e = |id: &str| Entity::new("Participant", id).expect("valid entity");
        let unique = unique_in_order(vec![e("3"), e("1"), e("3"), e("2"), e("1")]);
        assert_eq!(unique, vec![e("3"), e("1"), e("2")]);
    }
}
