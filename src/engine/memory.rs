//! In-memory engine.
//!
//! Buffers values in per-column keep-alive windows and delivers items into
//! bounded tables. It is intended for embedded usage, tests, and as a
//! reference implementation of the [`Engine`] contract.
//!
//! Each table is a bounded channel. Items that do not fit stay outstanding
//! (unacknowledged) until a [`TableReader`] consumes from the table; every
//! consumption wakes any blocked flush.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError, TrySendError,
};
use tracing::trace;

use crate::cell::CellRef;
use crate::chunker::ChunkerOptions;
use crate::config::MemoryEngineConfig;
use crate::engine::traits::{timeout_ms, Engine, Item, ItemColumn, ItemId};
use crate::error::{ConfigError, EngineError};
use crate::registry::ColumnId;
use crate::tensor::Tensor;

/// One recorded append call.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendCall {
    /// True for `append_partial`.
    pub partial: bool,
    /// Leaves as received, positional by column index.
    pub leaves: Vec<Option<Tensor>>,
}

#[derive(Debug, Default)]
struct ColumnBuffer {
    keep_alive: VecDeque<Arc<Tensor>>,
    options: Option<ChunkerOptions>,
}

#[derive(Debug)]
struct Table {
    tx: Sender<Item>,
    rx: Receiver<Item>,
}

/// Consumer side of one table.
///
/// Cloneable and `Send`, so items can be drained from another thread while the
/// writer blocks in `flush`.
#[derive(Debug, Clone)]
pub struct TableReader {
    table: String,
    rx: Receiver<Item>,
    consumed: Sender<()>,
}

impl TableReader {
    /// Name of the table this reader drains.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Takes the oldest item if one is available.
    #[must_use]
    pub fn try_recv(&self) -> Option<Item> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.notify_consumed();
                Some(item)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next item.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Item, EngineError> {
        let item = self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => EngineError::DeadlineExceeded {
                operation: format!("table '{}'", self.table),
                timeout_ms: timeout_ms(timeout),
            },
            RecvTimeoutError::Disconnected => EngineError::Disconnected {
                what: format!("table '{}'", self.table),
            },
        })?;
        self.notify_consumed();
        Ok(item)
    }

    /// Wakes a flush blocked on this table.
    fn notify_consumed(&self) {
        // Disconnected means the engine was dropped; nobody is left waiting.
        if let Err(SendError(())) = self.consumed.send(()) {
            trace!(table = %self.table, "engine gone, consumption not signalled");
        }
    }

    /// Items currently held by the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when the table holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Engine that keeps everything in process memory.
#[derive(Debug)]
pub struct InMemoryEngine {
    max_num_keep_alive_refs: usize,
    columns: Vec<ColumnBuffer>,
    tables: HashMap<String, Table>,
    outstanding: VecDeque<Item>,
    consumed_tx: Sender<()>,
    consumed_rx: Receiver<()>,
    chunker_calls: Vec<(ColumnId, ChunkerOptions)>,
    append_calls: Vec<AppendCall>,
    episodes: u64,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::build(&MemoryEngineConfig::default())
    }
}

impl InMemoryEngine {
    /// Creates an engine from a validated config.
    pub fn new(config: &MemoryEngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &MemoryEngineConfig) -> Self {
        let (consumed_tx, consumed_rx) = unbounded();
        let tables = config
            .tables
            .iter()
            .map(|t| {
                let (tx, rx) = bounded(t.capacity.max(1));
                (t.name.clone(), Table { tx, rx })
            })
            .collect();
        Self {
            max_num_keep_alive_refs: config.max_num_keep_alive_refs.max(1),
            columns: Vec::new(),
            tables,
            outstanding: VecDeque::new(),
            consumed_tx,
            consumed_rx,
            chunker_calls: Vec::new(),
            append_calls: Vec::new(),
            episodes: 0,
        }
    }

    /// Returns a reader draining `table`.
    pub fn reader(&self, table: &str) -> Result<TableReader, EngineError> {
        let t = self.tables.get(table).ok_or_else(|| EngineError::UnknownTable {
            table: table.to_string(),
        })?;
        Ok(TableReader {
            table: table.to_string(),
            rx: t.rx.clone(),
            consumed: self.consumed_tx.clone(),
        })
    }

    /// Current chunker policy of a column, if one was configured.
    #[must_use]
    pub fn chunker_options(&self, column: ColumnId) -> Option<&ChunkerOptions> {
        self.columns.get(column.index()).and_then(|c| c.options.as_ref())
    }

    /// Every `configure_chunker` call, in order.
    #[must_use]
    pub fn chunker_calls(&self) -> &[(ColumnId, ChunkerOptions)] {
        &self.chunker_calls
    }

    /// Every append call, in order.
    #[must_use]
    pub fn append_calls(&self) -> &[AppendCall] {
        &self.append_calls
    }

    /// Items submitted but not yet accepted by their table.
    #[must_use]
    pub fn outstanding_items(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of sealed episodes.
    #[must_use]
    pub const fn episode_count(&self) -> u64 {
        self.episodes
    }

    fn column_mut(&mut self, index: usize) -> &mut ColumnBuffer {
        if self.columns.len() <= index {
            self.columns.resize_with(index + 1, ColumnBuffer::default);
        }
        &mut self.columns[index]
    }

    fn buffer(&mut self, leaves: Vec<Option<Tensor>>, partial: bool) -> Vec<Option<CellRef>> {
        self.append_calls.push(AppendCall {
            partial,
            leaves: leaves.clone(),
        });

        let max = self.max_num_keep_alive_refs;
        leaves
            .into_iter()
            .enumerate()
            .map(|(index, leaf)| {
                let value = leaf?;
                let column = self.column_mut(index);
                let window = column
                    .options
                    .as_ref()
                    .map_or(max, |o| o.num_keep_alive_refs().min(max));
                let cell = Arc::new(value);
                let reference = CellRef::new(&cell);
                column.keep_alive.push_back(cell);
                while column.keep_alive.len() > window {
                    column.keep_alive.pop_front();
                }
                Some(reference)
            })
            .collect()
    }

    /// Moves outstanding items into their tables while there is room.
    fn pump(&mut self) {
        let mut still_outstanding = VecDeque::with_capacity(self.outstanding.len());
        while let Some(item) = self.outstanding.pop_front() {
            let Some(table) = self.tables.get(&item.table) else {
                continue;
            };
            match table.tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => {
                    still_outstanding.push_back(item);
                }
            }
        }
        self.outstanding = still_outstanding;
    }

    fn wait_for_outstanding(
        &mut self,
        operation: &str,
        max_outstanding_items: usize,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.pump();
            if self.outstanding.len() <= max_outstanding_items {
                return Ok(());
            }

            let notified = match deadline {
                None => self.consumed_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.consumed_rx.recv_timeout(remaining)
                }
            };

            match notified {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    self.pump();
                    if self.outstanding.len() <= max_outstanding_items {
                        return Ok(());
                    }
                    return Err(EngineError::DeadlineExceeded {
                        operation: operation.to_string(),
                        timeout_ms: timeout.map_or(u64::MAX, timeout_ms),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Disconnected {
                        what: "table consumers".to_string(),
                    });
                }
            }
        }
    }
}

impl Engine for InMemoryEngine {
    fn append(&mut self, leaves: Vec<Option<Tensor>>) -> Result<Vec<Option<CellRef>>, EngineError> {
        Ok(self.buffer(leaves, false))
    }

    fn append_partial(&mut self, leaves: Vec<Option<Tensor>>) -> Result<Vec<Option<CellRef>>, EngineError> {
        Ok(self.buffer(leaves, true))
    }

    fn create_item(
        &mut self,
        table: &str,
        priority: f64,
        refs_per_column: &[Vec<CellRef>],
        squeeze_per_column: &[bool],
    ) -> Result<ItemId, EngineError> {
        if !self.tables.contains_key(table) {
            return Err(EngineError::UnknownTable {
                table: table.to_string(),
            });
        }
        if refs_per_column.len() != squeeze_per_column.len() {
            return Err(EngineError::LeafCountMismatch {
                expected: refs_per_column.len(),
                actual: squeeze_per_column.len(),
            });
        }

        let mut columns = Vec::with_capacity(refs_per_column.len());
        for (refs, squeeze) in refs_per_column.iter().zip(squeeze_per_column) {
            let values = refs.iter().map(CellRef::value).collect::<Result<Vec<_>, _>>()?;
            let column = if *squeeze {
                let mut values = values.into_iter();
                match (values.next(), values.next()) {
                    (Some(value), None) => ItemColumn::Squeezed(value),
                    _ => {
                        return Err(EngineError::LeafCountMismatch {
                            expected: 1,
                            actual: refs.len(),
                        })
                    }
                }
            } else {
                ItemColumn::Stacked(values)
            };
            columns.push(column);
        }

        let item = Item {
            id: ItemId::new(),
            table: table.to_string(),
            priority,
            columns,
            created_at: Utc::now(),
        };
        let id = item.id;
        self.outstanding.push_back(item);
        self.pump();
        Ok(id)
    }

    fn configure_chunker(&mut self, column: ColumnId, options: ChunkerOptions) -> Result<(), EngineError> {
        self.chunker_calls.push((column, options.clone()));
        let window = options.num_keep_alive_refs();
        let buffer = self.column_mut(column.index());
        buffer.options = Some(options);
        while buffer.keep_alive.len() > window {
            buffer.keep_alive.pop_front();
        }
        Ok(())
    }

    fn flush(&mut self, max_outstanding_items: usize, timeout: Option<Duration>) -> Result<(), EngineError> {
        self.wait_for_outstanding("flush", max_outstanding_items, timeout)
    }

    fn end_episode(&mut self, clear_buffers: bool, timeout: Option<Duration>) -> Result<(), EngineError> {
        self.episodes += 1;
        if clear_buffers {
            for column in &mut self.columns {
                column.keep_alive.clear();
            }
        }
        self.wait_for_outstanding("end_episode", 0, timeout)
    }

    fn max_num_keep_alive_refs(&self) -> usize {
        self.max_num_keep_alive_refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_queue(capacity: usize) -> InMemoryEngine {
        InMemoryEngine::new(&MemoryEngineConfig::default().with_table("queue", capacity)).unwrap()
    }

    #[test]
    fn append_returns_positional_references() {
        let mut engine = engine_with_queue(1);
        let refs = engine
            .append(vec![Some(Tensor::from(1i64)), None, Some(Tensor::from(2.0f64))])
            .unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].as_ref().unwrap().value().unwrap(), Tensor::from(1i64));
        assert!(refs[1].is_none());
        assert_eq!(refs[2].as_ref().unwrap().value().unwrap(), Tensor::from(2.0f64));
        assert!(!engine.append_calls()[0].partial);
    }

    #[test]
    fn references_expire_outside_keep_alive_window() {
        let config = MemoryEngineConfig::default().with_max_num_keep_alive_refs(2);
        let mut engine = InMemoryEngine::new(&config).unwrap();
        let first = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        engine.append(vec![Some(Tensor::from(2i64))]).unwrap();
        assert!(!first.expired());
        engine.append(vec![Some(Tensor::from(3i64))]).unwrap();
        assert!(first.expired());
    }

    #[test]
    fn configured_window_shrinks_keep_alive() {
        let mut engine = engine_with_queue(1);
        let first = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        let second = engine.append(vec![Some(Tensor::from(2i64))]).unwrap().remove(0).unwrap();
        engine
            .configure_chunker(
                ColumnId::new(0),
                ChunkerOptions::Constant {
                    num_keep_alive_refs: 1,
                    max_chunk_length: 1,
                },
            )
            .unwrap();
        assert!(first.expired());
        assert!(!second.expired());
        assert_eq!(engine.chunker_calls().len(), 1);
    }

    #[test]
    fn create_item_delivers_to_table() {
        let mut engine = engine_with_queue(4);
        let reader = engine.reader("queue").unwrap();
        let refs: Vec<CellRef> = (1..=3i64)
            .map(|v| engine.append(vec![Some(Tensor::from(v))]).unwrap().remove(0).unwrap())
            .collect();

        engine
            .create_item("queue", 1.5, &[refs[..2].to_vec(), vec![refs[2].clone()]], &[false, true])
            .unwrap();

        let item = reader.try_recv().unwrap();
        assert_eq!(item.priority, 1.5);
        assert_eq!(
            item.columns,
            vec![
                ItemColumn::Stacked(vec![Tensor::from(1i64), Tensor::from(2i64)]),
                ItemColumn::Squeezed(Tensor::from(3i64)),
            ]
        );
    }

    #[test]
    fn create_item_rejects_unknown_table() {
        let mut engine = engine_with_queue(1);
        let err = engine.create_item("missing", 1.0, &[], &[]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTable { .. }));
    }

    #[test]
    fn create_item_rejects_expired_reference() {
        let config = MemoryEngineConfig::default()
            .with_max_num_keep_alive_refs(1)
            .with_table("queue", 1);
        let mut engine = InMemoryEngine::new(&config).unwrap();
        let old = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        engine.append(vec![Some(Tensor::from(2i64))]).unwrap();
        let err = engine.create_item("queue", 1.0, &[vec![old]], &[true]).unwrap_err();
        assert!(matches!(err, EngineError::ExpiredReference));
    }

    #[test]
    fn flush_times_out_when_table_full_and_recovers_after_drain() {
        let mut engine = engine_with_queue(1);
        let reader = engine.reader("queue").unwrap();
        let r = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();

        for _ in 0..3 {
            engine.create_item("queue", 1.0, &[vec![r.clone()]], &[false]).unwrap();
        }
        assert_eq!(engine.outstanding_items(), 2);

        let err = engine.flush(0, Some(Duration::from_millis(1))).unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { .. }));
        assert!(engine.flush(2, Some(Duration::from_millis(1))).is_ok());

        while reader.try_recv().is_some() {
            engine.flush(0, Some(Duration::from_millis(1))).ok();
        }
        engine.flush(0, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(engine.outstanding_items(), 0);
    }

    #[test]
    fn flush_unblocks_when_reader_drains_from_another_thread() {
        let mut engine = engine_with_queue(1);
        let reader = engine.reader("queue").unwrap();
        let r = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        for _ in 0..3 {
            engine.create_item("queue", 1.0, &[vec![r.clone()]], &[true]).unwrap();
        }

        let consumer = std::thread::spawn(move || {
            for _ in 0..3 {
                reader.recv_timeout(Duration::from_secs(5)).unwrap();
            }
        });

        engine.flush(0, Some(Duration::from_secs(5))).unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn end_episode_clears_buffers() {
        let mut engine = engine_with_queue(1);
        let r = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        engine.end_episode(false, Some(Duration::from_millis(1))).unwrap();
        assert!(!r.expired());
        engine.end_episode(true, Some(Duration::from_millis(1))).unwrap();
        assert!(r.expired());
        assert_eq!(engine.episode_count(), 2);
    }

    #[test]
    fn reader_drains_after_engine_dropped() {
        let mut engine = engine_with_queue(2);
        let reader = engine.reader("queue").unwrap();
        let r = engine.append(vec![Some(Tensor::from(1i64))]).unwrap().remove(0).unwrap();
        engine.create_item("queue", 1.0, &[vec![r]], &[true]).unwrap();
        drop(engine);

        let item = reader.try_recv().unwrap();
        assert_eq!(item.columns, vec![ItemColumn::Squeezed(Tensor::from(1i64))]);
        assert!(reader.try_recv().is_none());
    }
}
