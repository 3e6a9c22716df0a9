//! Runtime state and task bodies of the batched executor.
//!
//! Concurrency contract, enforced here:
//!
//! * Batches of one node may run in parallel, bounded by the node's window
//!   of `max_concurrent_batches`: a batch slot is reserved before compute
//!   and freed only when every consumer of that batch has released it, so a
//!   node can never run more than K batches ahead of its slowest consumer.
//! * A preparable consumes batches strictly in dataset order through a
//!   sequential drain guard; no two batches of the same preparer overlap.
//! * Views fire at most once, after their parent's finish.
//! * Task concurrency is capped by a semaphore of `max_threads` permits,
//!   held only across compute, never across an await.
//! * The first task error lands in a single-slot cell, flips the abort
//!   flag, and wakes every waiter; in-flight tasks drain without starting
//!   new work.

use super::plan::{NodePlan, Role, Target};
use crate::engine::config::BatchExecutorConfig;
use crate::errors::ExecutionError;
use crate::graph::{
    DagStructure, ExecutionState, PreparedPair, Preparer, Value,
};
use crate::io::{zip_readers, ObjectIterator, ObjectReader, ObjectWriter};
use crate::observability::messages::engine::{PreparationFinished, ViewResolved};
use crate::observability::messages::StructuredLog;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, Notify, Semaphore};

/// One immutable batch column, shared with every consumer.
pub(crate) type Column = Arc<Vec<Value>>;

/// Pending inputs of one (node, batch).
pub(crate) struct Slot {
    missing: usize,
    cols: Vec<Option<Column>>,
}

/// Circular publish window of one node within the current round.
#[derive(Default)]
pub(crate) struct Window {
    base: u64,
    pending: HashMap<u64, usize>,
    released: HashSet<u64>,
}

/// Sequential intake state of a preparable.
pub(crate) struct SeqState {
    pub next: u64,
    pub stash: BTreeMap<u64, Vec<Column>>,
    pub draining: bool,
    pub preparer: Option<Box<dyn Preparer>>,
    pub finish_spawned: bool,
}

/// Reorder-and-record sink persisting one node's stream for replay.
pub(crate) struct Append {
    pub state: Mutex<AppendState>,
    pub closed: Notify,
}

pub(crate) struct AppendState {
    pub writer: Option<Box<dyn ObjectWriter>>,
    pub next: u64,
    pub stash: BTreeMap<u64, Column>,
    pub reader: Option<Arc<dyn ObjectReader>>,
}

/// Per-node runtime state.
pub(crate) struct NodeRt {
    pub inbox: Mutex<HashMap<u64, Slot>>,
    pub window: Mutex<Window>,
    pub window_notify: Notify,
    pub seq: Mutex<SeqState>,
    pub exec_state: OnceLock<Option<Box<ExecutionState>>>,
    pub const_value: OnceLock<Value>,
    pub append: Option<Append>,
}

/// Scheduler-wide pending-task accounting: the round barrier waits for this
/// to drain to zero.
#[derive(Default)]
pub(crate) struct TaskCounter {
    count: AtomicUsize,
    drained_notify: Notify,
}

impl TaskCounter {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained_notify.notify_waiters();
        }
    }

    pub async fn drained(&self) {
        loop {
            let notified = self.drained_notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One run of the batched executor.
pub(crate) struct Run {
    pub dag: DagStructure,
    pub cfg: BatchExecutorConfig,
    pub n: u64,
    pub batches: u64,
    pub plans: Vec<NodePlan>,
    pub nodes: Vec<NodeRt>,
    pub inputs: Vec<Arc<dyn ObjectReader>>,
    pub current_round: AtomicU32,
    pub tasks: TaskCounter,
    pub permits: Semaphore,
    pub failure: StdMutex<Option<ExecutionError>>,
    pub aborted: AtomicBool,
    pub pairs: Vec<OnceLock<PreparedPair>>,
    pub view_values: Vec<OnceLock<(Value, Value)>>,
}

impl Run {
    pub fn batch_len(&self, batch: u64) -> usize {
        let start = batch * self.cfg.batch_size as u64;
        (self.n - start).min(self.cfg.batch_size as u64) as usize
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Records the first failure, flips the abort flag, and wakes every
    /// waiter so stalled tasks drain.
    pub fn fail(&self, error: ExecutionError) {
        {
            let mut slot = self.failure.lock().expect("failure cell poisoned");
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);
        for node in &self.nodes {
            node.window_notify.notify_waiters();
            if let Some(append) = &node.append {
                append.closed.notify_waiters();
            }
        }
        self.tasks.drained_notify.notify_waiters();
    }

    pub fn take_failure(&self) -> Option<ExecutionError> {
        self.failure.lock().expect("failure cell poisoned").take()
    }
}

/// Spawns a tracked task; its error (if any) becomes the run's first error.
pub(crate) fn spawn(
    run: &Arc<Run>,
    fut: impl Future<Output = Result<(), ExecutionError>> + Send + 'static,
) {
    run.tasks.enter();
    let run = run.clone();
    tokio::spawn(async move {
        if !run.is_aborted() {
            if let Err(e) = fut.await {
                run.fail(e);
            }
        }
        run.tasks.exit();
    });
}

/// Reserves the publish slot for (node, batch), waiting while the node's
/// window is full. Returns `false` when the run aborted while waiting.
async fn reserve(run: &Arc<Run>, index: usize, batch: u64) -> bool {
    let node = &run.nodes[index];
    let round = run.current_round.load(Ordering::SeqCst);
    let consumers = run.plans[index].consumers_in_round(round);
    loop {
        if run.is_aborted() {
            return false;
        }
        let notified = node.window_notify.notified();
        {
            let mut window = node.window.lock().await;
            if batch < window.base + run.cfg.max_concurrent_batches as u64 {
                if consumers == 0 {
                    // Nothing will release it; retire the slot on the spot.
                    window.released.insert(batch);
                    advance(&mut window);
                } else {
                    window.pending.insert(batch, consumers);
                }
                return true;
            }
        }
        notified.await;
    }
}

/// A consumer is done with (node, batch); frees the window slot once every
/// consumer has released it.
async fn release(run: &Arc<Run>, index: usize, batch: u64) {
    let node = &run.nodes[index];
    let mut window = node.window.lock().await;
    let Some(count) = window.pending.get_mut(&batch) else {
        return;
    };
    *count -= 1;
    if *count == 0 {
        window.pending.remove(&batch);
        window.released.insert(batch);
        advance(&mut window);
        node.window_notify.notify_waiters();
    }
}

fn advance(window: &mut Window) {
    while window.released.remove(&window.base) {
        window.base += 1;
    }
}

/// Resets all per-round node state. Called at each round barrier.
pub(crate) async fn reset_round_state(run: &Arc<Run>) {
    for node in &run.nodes {
        *node.window.lock().await = Window::default();
        node.inbox.lock().await.clear();
    }
}

/// Routes a published batch to every consumer of the current round, plus the
/// append sink during the node's own stream round.
pub(crate) async fn deliver_all(
    run: &Arc<Run>,
    index: usize,
    batch: u64,
    col: Column,
) -> Result<(), ExecutionError> {
    let round = run.current_round.load(Ordering::SeqCst);
    let plan = &run.plans[index];
    if round == plan.stream_round {
        if plan.needs_append {
            append_receive(run, index, batch, col.clone()).await?;
        }
        for target in &plan.live {
            deliver(run, *target, batch, col.clone()).await?;
        }
    } else if let Some(targets) = plan.replays.get(&round) {
        for target in targets {
            deliver(run, *target, batch, col.clone()).await?;
        }
    }
    Ok(())
}

/// Hands one parent column to a consumer's input slot; dispatches the
/// consumer once the slot is complete.
async fn deliver(
    run: &Arc<Run>,
    target: Target,
    batch: u64,
    col: Column,
) -> Result<(), ExecutionError> {
    let arity = run.dag.parents(target.node).len();
    let ready = {
        let mut inbox = run.nodes[target.node].inbox.lock().await;
        let slot = inbox.entry(batch).or_insert_with(|| Slot {
            missing: arity,
            cols: vec![None; arity],
        });
        slot.cols[target.pos] = Some(col);
        slot.missing -= 1;
        if slot.missing == 0 {
            let slot = inbox.remove(&batch).expect("slot exists");
            Some(
                slot.cols
                    .into_iter()
                    .map(|c| c.expect("complete slot"))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        }
    };

    if let Some(cols) = ready {
        if matches!(run.plans[target.node].role, Role::Prepare { .. }) {
            seq_enqueue(run, target.node, batch, cols).await;
        } else {
            let run2 = run.clone();
            spawn(run, apply_task(run2, target.node, batch, cols));
        }
    }
    Ok(())
}

/// Releases every parent edge of `index` for `batch`.
async fn release_parents(run: &Arc<Run>, index: usize, batch: u64) {
    for &parent in run.dag.parents(index) {
        release(run, parent, batch).await;
    }
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

/// Placeholder source: reads the input reader sequentially, one batch per
/// window slot.
pub(crate) async fn source_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let label = run.dag.node(index).label();
    let mut it = run.inputs[index].iter();
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let rows = run.batch_len(batch);
        let col = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            let mut buf = Vec::with_capacity(rows);
            let copied = it.next_batch(&mut buf, rows)?;
            if copied != rows {
                return Err(ExecutionError::ShapeMismatch {
                    label: label.clone(),
                    expected: run.n,
                    actual: batch * run.cfg.batch_size as u64 + copied as u64,
                });
            }
            Arc::new(buf)
        };
        deliver_all(&run, index, batch, col).await?;
    }
    Ok(())
}

/// Generator source: synthesizes values from the row index. Also used for
/// replays, since regeneration is cheaper than recording.
pub(crate) async fn generator_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let op = run
        .dag
        .node(index)
        .generate_op()
        .expect("generator role has a generator op")
        .clone();
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let rows = run.batch_len(batch);
        let start = batch * run.cfg.batch_size as u64;
        let col = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            Arc::new((0..rows).map(|r| op.generate(start + r as u64)).collect())
        };
        deliver_all(&run, index, batch, col).await?;
    }
    Ok(())
}

/// Source-like driver for a prepared transformer with no parents.
pub(crate) async fn rootless_apply_task(
    run: Arc<Run>,
    index: usize,
) -> Result<(), ExecutionError> {
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let col = compute_apply(&run, index, batch, &[])?;
        deliver_all(&run, index, batch, Arc::new(col)).await?;
    }
    Ok(())
}

/// One (prepared node, batch) computation.
///
/// Returns a boxed future (rather than being an `async fn`) so its opaque
/// return type doesn't recursively embed `deliver`'s future, which itself
/// spawns a call back into this function — without the indirection, rustc
/// cannot resolve the `Send` auto-trait cycle that creates.
pub(crate) fn apply_task(
    run: Arc<Run>,
    index: usize,
    batch: u64,
    cols: Vec<Column>,
) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExecutionError>> + Send>> {
    Box::pin(async move {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let col = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            compute_apply(&run, index, batch, &cols)?
        };
        drop(cols);
        release_parents(&run, index, batch).await;
        deliver_all(&run, index, batch, Arc::new(col)).await?;
        Ok(())
    })
}

/// Shared compute path for prepared transformers, including the
/// constant-result short-circuit (value computed once, tiled per batch, the
/// tile trimmed for the short tail batch).
fn compute_apply(
    run: &Arc<Run>,
    index: usize,
    batch: u64,
    cols: &[Column],
) -> Result<Vec<Value>, ExecutionError> {
    let node = run.dag.node(index);
    let op = node
        .transform_op()
        .expect("apply role has a transform op")
        .clone();
    let rows = run.batch_len(batch);
    let rt = &run.nodes[index];

    if op.always_constant() {
        let value = match rt.const_value.get() {
            Some(v) => v.clone(),
            None => {
                let args: Vec<Value> = cols
                    .iter()
                    .map(|c| c.first().cloned().unwrap_or(Value::Null))
                    .collect();
                let state = rt.exec_state.get_or_init(|| op.new_execution_state());
                let v = op
                    .apply(state.as_deref(), &args)
                    .map_err(|e| ExecutionError::failed(node.label(), e))?;
                let _ = rt.const_value.set(v.clone());
                v
            }
        };
        return Ok(vec![value; rows]);
    }

    let state = rt.exec_state.get_or_init(|| op.new_execution_state());
    let slices: Vec<&[Value]> = cols.iter().map(|c| c.as_slice()).collect();
    crate::engine::apply_in_minibatches(&op, state.as_deref(), &slices, rows, None)
        .map_err(|e| ExecutionError::failed(node.label(), e))
}

/// Sequential intake of a preparable: batches are stashed and drained
/// strictly in order by at most one drain task at a time.
async fn seq_enqueue(run: &Arc<Run>, index: usize, batch: u64, cols: Vec<Column>) {
    let spawn_drain = {
        let mut seq = run.nodes[index].seq.lock().await;
        seq.stash.insert(batch, cols);
        if seq.draining {
            false
        } else {
            seq.draining = true;
            true
        }
    };
    if spawn_drain {
        let run2 = run.clone();
        spawn(run, async move { seq_drain(run2, index).await });
    }
}

async fn seq_drain(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let label = run.dag.node(index).label();
    loop {
        if run.is_aborted() {
            return Ok(());
        }
        let (batch, cols, mut preparer) = {
            let mut seq = run.nodes[index].seq.lock().await;
            let next = seq.next;
            match seq.stash.remove(&next) {
                Some(cols) => {
                    let preparer = seq.preparer.take().expect("preparer present while draining");
                    (next, cols, preparer)
                }
                None => {
                    seq.draining = false;
                    let done = seq.next == run.batches && !seq.finish_spawned;
                    if done {
                        seq.finish_spawned = true;
                    }
                    drop(seq);
                    if done {
                        let run2 = run.clone();
                        spawn(&run, async move { finish_task(run2, index).await });
                    }
                    return Ok(());
                }
            }
        };

        let processed = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            let rows = cols.first().map_or(0, |c| c.len());
            let mut args: Vec<Value> = Vec::with_capacity(cols.len());
            let mut result = Ok(());
            for row in 0..rows {
                args.clear();
                args.extend(cols.iter().map(|c| c[row].clone()));
                if let Err(e) = preparer.process(&args) {
                    result = Err(ExecutionError::failed(label.clone(), e));
                    break;
                }
            }
            result
        };

        {
            let mut seq = run.nodes[index].seq.lock().await;
            seq.preparer = Some(preparer);
            seq.next += 1;
        }
        processed?;
        release_parents(&run, index, batch).await;
    }
}

/// Drives a preparable that has no parents: every row is an empty tuple, so
/// the preparer is fed `n` empty rows and finished directly.
pub(crate) async fn parentless_prepare_task(
    run: Arc<Run>,
    index: usize,
) -> Result<(), ExecutionError> {
    let label = run.dag.node(index).label();
    let mut preparer = {
        let mut seq = run.nodes[index].seq.lock().await;
        seq.preparer.take().expect("preparer available at intake")
    };
    let processed = {
        let _permit = run.permits.acquire().await.expect("semaphore open");
        let mut result = Ok(());
        for _ in 0..run.n {
            if let Err(e) = preparer.process(&[]) {
                result = Err(ExecutionError::failed(label.clone(), e));
                break;
            }
        }
        result
    };
    {
        let mut seq = run.nodes[index].seq.lock().await;
        seq.preparer = Some(preparer);
        seq.next = run.batches;
    }
    processed?;
    finish_task(run, index).await
}

/// Finishes a preparable once its intake is complete. Batch-mode preparers
/// first wait for every parent's append to seal, then get the zipped replay.
pub(crate) async fn finish_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let node = run.dag.node(index);
    let batch_mode = matches!(
        run.plans[index].role,
        Role::Prepare {
            batch_mode: true,
            ..
        }
    );
    let replay = if batch_mode {
        let mut parts: Vec<Arc<dyn ObjectReader>> = Vec::new();
        for &parent in run.dag.parents(index) {
            let Some(reader) = await_append_reader(&run, parent).await else {
                return Ok(()); // aborted
            };
            parts.push(reader);
        }
        Some(zip_readers(parts))
    } else {
        None
    };

    let mut preparer = {
        let mut seq = run.nodes[index].seq.lock().await;
        seq.preparer.take().expect("preparer available at finish")
    };
    let pair = {
        let _permit = run.permits.acquire().await.expect("semaphore open");
        preparer
            .finish(replay)
            .map_err(|e| ExecutionError::failed(node.label(), e))?
    };
    let _ = run.pairs[index].set(pair);
    PreparationFinished {
        producer: &node.label(),
        rows: run.n,
    }
    .log();
    Ok(())
}

/// Post-finish application stream of a preparable: replays the parents'
/// appends through the for-preparation-data transformer.
pub(crate) async fn applier_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let node = run.dag.node(index);
    let pair = run.pairs[index]
        .get()
        .expect("applier runs after finish")
        .clone();
    let op = pair.for_preparation_data.clone();

    let mut iters: Vec<Box<dyn ObjectIterator>> = Vec::new();
    for &parent in run.dag.parents(index) {
        let Some(reader) = await_append_reader(&run, parent).await else {
            return Ok(());
        };
        iters.push(reader.iter());
    }

    let rt = &run.nodes[index];
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let rows = run.batch_len(batch);
        let col = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            let mut cols: Vec<Vec<Value>> = Vec::with_capacity(iters.len());
            for it in iters.iter_mut() {
                let mut buf = Vec::with_capacity(rows);
                let copied = it.next_batch(&mut buf, rows)?;
                if copied != rows {
                    return Err(ExecutionError::ShapeMismatch {
                        label: node.label(),
                        expected: run.n,
                        actual: batch * run.cfg.batch_size as u64 + copied as u64,
                    });
                }
                cols.push(buf);
            }
            let state = rt.exec_state.get_or_init(|| op.new_execution_state());
            let slices: Vec<&[Value]> = cols.iter().map(|c| c.as_slice()).collect();
            crate::engine::apply_in_minibatches(&op, state.as_deref(), &slices, rows, None)
                .map_err(|e| ExecutionError::failed(node.label(), e))?
        };
        deliver_all(&run, index, batch, Arc::new(col)).await?;
    }
    Ok(())
}

/// View: resolves both observed values once (the parent's finish has already
/// completed at the previous round barrier), then tiles the
/// preparation-data value for each downstream batch.
pub(crate) async fn view_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let node = run.dag.node(index);
    let op = node.observe_op().expect("view role has an observe op").clone();
    let parent = run.dag.parents(index)[0];

    if run.view_values[index].get().is_none() {
        let pair = run.pairs[parent]
            .get()
            .expect("view parent finished before the view fires")
            .clone();
        let _permit = run.permits.acquire().await.expect("semaphore open");
        let new = op
            .observe(pair.for_new_data.as_ref())
            .map_err(|e| ExecutionError::failed(node.label(), e))?;
        let prep = op
            .observe(pair.for_preparation_data.as_ref())
            .map_err(|e| ExecutionError::failed(node.label(), e))?;
        let _ = run.view_values[index].set((new, prep));
        ViewResolved {
            producer: &node.label(),
        }
        .log();
    }

    let round = run.current_round.load(Ordering::SeqCst);
    if run.plans[index].consumers_in_round(round) == 0 {
        return Ok(());
    }
    let (_, prep) = run.view_values[index].get().expect("set above").clone();
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let rows = run.batch_len(batch);
        deliver_all(&run, index, batch, Arc::new(vec![prep.clone(); rows])).await?;
    }
    Ok(())
}

/// Replays a recorded stream to the current round's consumers.
pub(crate) async fn replay_task(run: Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    let Some(reader) = await_append_reader(&run, index).await else {
        return Ok(());
    };
    let mut it = reader.iter();
    for batch in 0..run.batches {
        if !reserve(&run, index, batch).await {
            return Ok(());
        }
        let rows = run.batch_len(batch);
        let col = {
            let _permit = run.permits.acquire().await.expect("semaphore open");
            let mut buf = Vec::with_capacity(rows);
            let copied = it.next_batch(&mut buf, rows)?;
            if copied != rows {
                return Err(ExecutionError::ShapeMismatch {
                    label: run.dag.node(index).label(),
                    expected: run.n,
                    actual: batch * run.cfg.batch_size as u64 + copied as u64,
                });
            }
            Arc::new(buf)
        };
        deliver_all(&run, index, batch, col).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Append machinery
// ---------------------------------------------------------------------------

/// Accepts one published batch into the node's append, writing contiguous
/// batches in order and sealing the writer after the last one.
async fn append_receive(
    run: &Arc<Run>,
    index: usize,
    batch: u64,
    col: Column,
) -> Result<(), ExecutionError> {
    let append = run.nodes[index]
        .append
        .as_ref()
        .expect("needs_append nodes have an append");
    let mut written: Vec<u64> = Vec::new();
    {
        let mut state = append.state.lock().await;
        state.stash.insert(batch, col);
        loop {
            let next = state.next;
            let Some(col) = state.stash.remove(&next) else {
                break;
            };
            state
                .writer
                .as_mut()
                .expect("append writer open")
                .write_all64(&col)?;
            written.push(next);
            state.next += 1;
        }
        if state.next == run.batches && state.reader.is_none() {
            seal_append(&mut state)?;
            append.closed.notify_waiters();
        }
    }
    for batch in written {
        release(run, index, batch).await;
    }
    Ok(())
}

fn seal_append(state: &mut AppendState) -> Result<(), ExecutionError> {
    let mut writer = state.writer.take().expect("append writer open");
    writer.close()?;
    state.reader = Some(writer.reader()?);
    Ok(())
}

/// Seals appends that will never receive a batch (empty dataset).
pub(crate) async fn close_empty_append(run: &Arc<Run>, index: usize) -> Result<(), ExecutionError> {
    if let Some(append) = &run.nodes[index].append {
        let mut state = append.state.lock().await;
        if state.reader.is_none() {
            seal_append(&mut state)?;
            append.closed.notify_waiters();
        }
    }
    Ok(())
}

/// Waits for a node's append to seal. `None` when the run aborted while
/// waiting.
pub(crate) async fn await_append_reader(
    run: &Arc<Run>,
    index: usize,
) -> Option<Arc<dyn ObjectReader>> {
    let append = run.nodes[index]
        .append
        .as_ref()
        .expect("consumer requires this node's append");
    loop {
        if run.is_aborted() {
            return None;
        }
        let notified = append.closed.notified();
        {
            let state = append.state.lock().await;
            if let Some(reader) = &state.reader {
                return Some(reader.clone());
            }
        }
        notified.await;
    }
}
