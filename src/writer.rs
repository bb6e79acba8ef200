//! The trajectory writer.
//!
//! [`TrajectoryWriter`] turns a stream of nested records into engine appends,
//! keeps the per-column history of what was written, and assembles items from
//! selections of that history. It is single-threaded from the caller's side:
//! only `flush` and `end_episode` block, waiting on the engine.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cell::CellRef;
use crate::chunker::{ChunkerConfigManager, ChunkerOptions};
use crate::config::WriterConfig;
use crate::engine::{Engine, ItemId};
use crate::error::{EngineError, StateError, ValidationError, WriterResult};
use crate::history::{ColumnArena, History};
use crate::nest::Record;
use crate::path::Path;
use crate::registry::{ColumnId, PathRegistry};
use crate::step::ActiveStep;
use crate::tensor::Tensor;
use crate::trajectory::{ItemLeaf, Trajectory};

/// Client-side writer over an [`Engine`].
///
/// # Example
/// ```
/// use trajectory_writer::{InMemoryEngine, MemoryEngineConfig, Path, Record, Trajectory, TrajectoryWriter};
///
/// let engine = InMemoryEngine::new(&MemoryEngineConfig::default().with_table("queue", 8)).unwrap();
/// let mut writer = TrajectoryWriter::new(engine);
///
/// writer.append(Record::fields([("obs", 1.0f64), ("reward", 0.0f64)])).unwrap();
/// writer.append(Record::fields([("obs", 2.0f64), ("reward", 1.0f64)])).unwrap();
///
/// let history = writer.history().unwrap();
/// let trajectory = Trajectory::columns([
///     ("obs", history.column(&Path::from("obs")).unwrap().select(..).unwrap()),
///     ("reward", history.column(&Path::from("reward")).unwrap().select(-1).unwrap()),
/// ]);
/// writer.create_item("queue", 1.0, trajectory).unwrap();
/// writer.flush(0, None).unwrap();
/// ```
#[derive(Debug)]
pub struct TrajectoryWriter<E: Engine> {
    engine: E,
    config: WriterConfig,
    registry: PathRegistry,
    arena: ColumnArena,
    step: ActiveStep,
    chunkers: ChunkerConfigManager,
    episode_steps: u64,
    started: bool,
    closed: bool,
}

impl<E: Engine> TrajectoryWriter<E> {
    /// Creates a writer with default config.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, WriterConfig::default())
    }

    /// Creates a writer with the given config.
    pub fn with_config(engine: E, config: WriterConfig) -> Self {
        Self {
            engine,
            config,
            registry: PathRegistry::new(),
            arena: ColumnArena::new(),
            step: ActiveStep::new(),
            chunkers: ChunkerConfigManager::new(),
            episode_steps: 0,
            started: false,
            closed: false,
        }
    }

    /// Returns a shared reference to the underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns a mutable reference to the underlying engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Writer defaults in use.
    #[must_use]
    pub const fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Steps closed since the episode started.
    #[must_use]
    pub const fn episode_steps(&self) -> u64 {
        self.episode_steps
    }

    /// Upper bound the engine places on keep-alive windows.
    #[must_use]
    pub fn max_num_keep_alive_refs(&self) -> usize {
        self.engine.max_num_keep_alive_refs()
    }

    /// True while a partial step is being assembled.
    #[must_use]
    pub const fn has_open_step(&self) -> bool {
        self.step.is_open()
    }

    /// Appends `record` and closes the current step.
    pub fn append(&mut self, record: Record) -> WriterResult<()> {
        self.append_step(record, false)
    }

    /// Appends `record` into the current step and keeps it open.
    pub fn append_partial(&mut self, record: Record) -> WriterResult<()> {
        self.append_step(record, true)
    }

    fn append_step(&mut self, record: Record, partial: bool) -> WriterResult<()> {
        self.ensure_open()?;
        let flat = record.into_flat();

        // Validate everything before touching any state.
        for (path, leaf) in &flat {
            let (Some(value), Some(id)) = (leaf, self.registry.get(path)) else {
                continue;
            };
            self.step.check(id, path, value)?;
            self.arena.validate(id, path, value)?;
        }

        let mut columns = Vec::with_capacity(flat.len());
        for (path, leaf) in flat {
            let id = self.observe(&path)?;
            columns.push((id, leaf));
        }

        let mut leaves: Vec<Option<Tensor>> = vec![None; self.registry.len()];
        for (id, leaf) in columns {
            if let Some(value) = leaf {
                leaves[id.index()] = Some(value);
            }
        }

        let expected = leaves.len();
        let refs = if partial {
            self.engine.append_partial(leaves)?
        } else {
            self.engine.append(leaves)?
        };
        if refs.len() != expected {
            return Err(EngineError::LeafCountMismatch {
                expected,
                actual: refs.len(),
            }
            .into());
        }

        let index = match self.step.index() {
            Some(index) => index,
            None => {
                let index = self.arena.push_step();
                self.step.open(index);
                index
            }
        };
        self.record_refs(index, refs);
        self.started = true;

        if !partial {
            self.step.close();
            self.episode_steps += 1;
            debug!(step = index, episode_steps = self.episode_steps, "closed step");
        }
        Ok(())
    }

    /// Resolves `path` to its column, registering it on first sight, and
    /// applies any deferred chunker policy still pending for it.
    ///
    /// A pending policy is only dropped once the engine accepted it, so a
    /// failed attempt is retried by the next append that observes the path.
    fn observe(&mut self, path: &Path) -> WriterResult<ColumnId> {
        let (id, created) = self.registry.resolve(path);
        if created {
            self.arena.add_column(id);
            debug!(column = id.index(), %path, "discovered column");
        }
        if let Some(options) = self.chunkers.pending(path).cloned() {
            debug!(column = id.index(), %path, ?options, "applying deferred chunker options");
            self.engine.configure_chunker(id, options)?;
            self.chunkers.take(path);
        }
        Ok(id)
    }

    fn record_refs(&mut self, index: usize, refs: Vec<Option<CellRef>>) {
        for (i, cell) in refs.into_iter().enumerate() {
            if let Some(cell) = cell {
                let id = ColumnId::new(i);
                self.arena.set(id, index, cell);
                self.step.mark(id);
            }
        }
    }

    /// Read view over the history, including an open step.
    pub fn history(&self) -> WriterResult<History<'_>> {
        if !self.started {
            return Err(StateError::NoHistory.into());
        }
        Ok(History::new(&self.registry, &self.arena))
    }

    /// Submits `trajectory` as one item of `table`.
    ///
    /// Every leaf must be a trajectory column; columns are submitted in
    /// canonical path order.
    pub fn create_item(
        &mut self,
        table: &str,
        priority: f64,
        trajectory: impl Into<Trajectory>,
    ) -> WriterResult<ItemId> {
        self.ensure_open()?;
        if !priority.is_finite() || priority < 0.0 {
            return Err(ValidationError::InvalidParameter {
                name: "priority".to_string(),
                reason: format!("must be a finite value >= 0 but got {priority}"),
            }
            .into());
        }

        let flat = trajectory.into().into_flat();
        if flat.is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "trajectory".to_string(),
                reason: "must contain at least one column".to_string(),
            }
            .into());
        }

        let mut refs_per_column = Vec::with_capacity(flat.len());
        let mut squeeze_per_column = Vec::with_capacity(flat.len());
        for (path, leaf) in flat {
            match leaf {
                ItemLeaf::Column(column) => {
                    squeeze_per_column.push(column.is_squeezed());
                    refs_per_column.push(column.refs().to_vec());
                }
                other @ ItemLeaf::Materialized(_) => {
                    return Err(ValidationError::NotATrajectoryColumn {
                        path,
                        kind: other.kind().to_string(),
                    }
                    .into());
                }
            }
        }

        let id = self
            .engine
            .create_item(table, priority, &refs_per_column, &squeeze_per_column)?;
        debug!(%id, table, priority, columns = refs_per_column.len(), "created item");
        Ok(id)
    }

    /// Sets the chunking policy of `paths`.
    ///
    /// Known columns are configured immediately. Unseen paths are configured
    /// the first time they appear in an append.
    pub fn configure<I, P>(
        &mut self,
        paths: I,
        num_keep_alive_refs: i64,
        max_chunk_length: Option<i64>,
    ) -> WriterResult<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let options = ChunkerOptions::from_params(
            num_keep_alive_refs,
            max_chunk_length,
            self.engine.max_num_keep_alive_refs(),
        )?;
        for path in paths {
            let path = path.into();
            match self.registry.get(&path) {
                Some(id) => {
                    self.engine.configure_chunker(id, options.clone())?;
                    self.chunkers.take(&path);
                }
                None => {
                    debug!(%path, "deferring chunker options until column is observed");
                    self.chunkers.defer(path, options.clone());
                }
            }
        }
        Ok(())
    }

    /// Blocks until at most `block_until_num_items` items are outstanding.
    ///
    /// A timeout raises a deadline-exceeded engine error and leaves the
    /// writer untouched, so the call can be retried.
    pub fn flush(&mut self, block_until_num_items: i64, timeout: Option<Duration>) -> WriterResult<()> {
        let max_outstanding = usize::try_from(block_until_num_items).map_err(|_| {
            ValidationError::InvalidParameter {
                name: "block_until_num_items".to_string(),
                reason: format!("must be >= 0 but got {block_until_num_items}"),
            }
        })?;
        self.engine.flush(max_outstanding, timeout)?;
        Ok(())
    }

    /// `flush` with the configured default timeout.
    pub fn flush_default(&mut self, block_until_num_items: i64) -> WriterResult<()> {
        self.flush(block_until_num_items, self.config.flush_timeout)
    }

    /// Ends the episode.
    ///
    /// Any open partial step is discarded. With `clear_buffers`, the history
    /// is emptied while column identities remain. The episode step counter
    /// resets once the engine has sealed the episode, even when waiting for
    /// outstanding items then times out.
    pub fn end_episode(&mut self, clear_buffers: bool, timeout: Option<Duration>) -> WriterResult<()> {
        match self.engine.end_episode(clear_buffers, timeout) {
            Ok(()) => {
                self.reset_episode(clear_buffers);
                Ok(())
            }
            Err(err @ EngineError::DeadlineExceeded { .. }) => {
                self.reset_episode(clear_buffers);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn reset_episode(&mut self, clear_buffers: bool) {
        if self.step.close().is_some() {
            self.arena.pop_step();
        }
        if clear_buffers {
            self.arena.clear();
        }
        info!(episode_steps = self.episode_steps, clear_buffers, "ended episode");
        self.episode_steps = 0;
    }

    /// `end_episode` with the configured default timeout.
    pub fn end_episode_default(&mut self, clear_buffers: bool) -> WriterResult<()> {
        self.end_episode(clear_buffers, self.config.end_episode_timeout)
    }

    /// Runs `f` with this writer, flushing afterwards.
    ///
    /// The flush is skipped when `f` fails with an engine error, since the
    /// engine channel is already failing. For any other error the flush still
    /// runs before the error is returned.
    pub fn scoped<T, F>(&mut self, f: F) -> WriterResult<T>
    where
        F: FnOnce(&mut Self) -> WriterResult<T>,
    {
        match f(self) {
            Ok(value) => {
                self.flush_default(0)?;
                Ok(value)
            }
            Err(err) if err.is_engine() => Err(err),
            Err(err) => {
                if let Err(flush_err) = self.flush_default(0) {
                    warn!(error = %flush_err, "flush failed while propagating an earlier error");
                }
                Err(err)
            }
        }
    }

    /// Closes the writer. Further appends and item creation fail.
    pub fn close(&mut self) {
        if !self.closed {
            debug!("closing writer");
        }
        self.closed = true;
    }

    /// True once `close` has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> WriterResult<()> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        Ok(())
    }
}
