#![forbid(unsafe_code)]

//! VDF session: a single-shot squaring computation on a background worker.
//!
//! Lifecycle is strictly forward, `Idle → Running → {Completed | Stopped |
//! Errored}`. The worker owns the squaring loop and polls a cancellation
//! flag at batch boundaries; readers observe progress through atomics and a
//! mutex-protected interior. Outputs are published before the terminal
//! state, and the completion callback fires after it, so `wait` returners see
//! both.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use kairos_core::error::{VdfError, VdfResult};
use kairos_core::VdfConfig;

use crate::checkpoint::{encode_segment_record, Checkpoint, CheckpointStream};
use crate::discriminant::Discriminant;
use crate::form::QuadraticForm;
use crate::squarer::{BatchSquarer, SquareOutcome};

/// Progress callback: `(current_iteration, target)`.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync + 'static>;

/// Completion callback: `(completed_ok, iterations_done)`. Fires exactly
/// once per run, for completion, cancellation and failure alike.
pub type CompletionCallback = Box<dyn Fn(bool, u64) + Send + Sync + 'static>;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Stopped = 3,
    Errored = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Running,
            2 => SessionState::Completed,
            3 => SessionState::Stopped,
            4 => SessionState::Errored,
            _ => SessionState::Idle,
        }
    }

    /// Terminal states are absorbing.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Stopped | SessionState::Errored
        )
    }
}

/// Snapshot of session progress.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub iteration: u64,
    pub target: u64,
    pub state: SessionState,
    pub progress_pct: f64,
    pub iterations_per_second: u64,
    pub elapsed_ms: u64,
    pub proof_ready: bool,
}

#[derive(Default)]
struct Inner {
    discriminant: Option<Discriminant>,
    initial_form: Option<QuadraticForm>,
    final_form: Option<QuadraticForm>,
    checkpoints: CheckpointStream,
    slow_count: u64,
}

#[derive(Default)]
struct CallbackSlots {
    progress: Option<Arc<ProgressCallback>>,
    completion: Option<Arc<CompletionCallback>>,
}

struct Shared {
    state: AtomicU8,
    iteration: AtomicU64,
    target: AtomicU64,
    cancel: AtomicBool,
    ips: AtomicU64,
    interval_ms: AtomicU32,
    inner: Mutex<Inner>,
    callbacks: Mutex<CallbackSlots>,
    started_at: Mutex<Option<Instant>>,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Shared {
    fn new(interval_ms: u32) -> Self {
        Shared {
            state: AtomicU8::new(SessionState::Idle as u8),
            iteration: AtomicU64::new(0),
            target: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
            ips: AtomicU64::new(0),
            interval_ms: AtomicU32::new(interval_ms),
            inner: Mutex::new(Inner::default()),
            callbacks: Mutex::new(CallbackSlots::default()),
            started_at: Mutex::new(None),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn progress_callback(&self) -> Option<Arc<ProgressCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .progress
            .clone()
    }

    fn completion_callback(&self) -> Option<Arc<CompletionCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completion
            .clone()
    }
}

enum RunEnd {
    Completed,
    Cancelled,
}

/// A single-shot VDF computation.
pub struct VdfSession {
    config: VdfConfig,
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl VdfSession {
    /// Create an idle session with the given configuration.
    pub fn new(config: VdfConfig) -> VdfResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config.callback_interval_ms));
        Ok(VdfSession {
            config,
            shared,
            worker: None,
        })
    }

    /// Derive the discriminant from a 32-byte challenge and launch the
    /// worker. `initial_form` defaults to the generator of the derived
    /// group.
    pub fn start(
        &mut self,
        challenge: &[u8; 32],
        initial_form: Option<QuadraticForm>,
        iterations: u64,
        disc_bits: u32,
    ) -> VdfResult<()> {
        if iterations == 0 {
            return Err(VdfError::InvalidParameters);
        }
        let disc = Discriminant::from_challenge(challenge, disc_bits)?;
        self.launch(disc, initial_form, iterations)
    }

    /// Launch with a caller-provided discriminant magnitude (big-endian
    /// bytes). Values failing `D ≡ 1 (mod 4)` are coerced; see
    /// [`Discriminant::from_bytes`].
    pub fn start_with_discriminant(
        &mut self,
        discriminant_bytes: &[u8],
        initial_form: Option<QuadraticForm>,
        iterations: u64,
    ) -> VdfResult<()> {
        if iterations == 0 || discriminant_bytes.is_empty() {
            return Err(VdfError::InvalidParameters);
        }
        let disc = Discriminant::from_bytes(discriminant_bytes)?;
        self.launch(disc, initial_form, iterations)
    }

    fn launch(
        &mut self,
        disc: Discriminant,
        initial_form: Option<QuadraticForm>,
        iterations: u64,
    ) -> VdfResult<()> {
        if self.shared.state() != SessionState::Idle {
            return Err(VdfError::AlreadyRunning);
        }

        let x0 = match initial_form {
            Some(form) => {
                if !form.is_valid(&disc) {
                    return Err(VdfError::InvalidForm);
                }
                form.reduce()
            }
            None => QuadraticForm::generator(&disc),
        };

        {
            let mut inner = self.shared.lock_inner();
            inner.discriminant = Some(disc.clone());
            inner.initial_form = Some(x0.clone());
            inner.final_form = None;
            inner.slow_count = 0;
        }
        self.shared.iteration.store(0, Ordering::Release);
        self.shared.target.store(iterations, Ordering::Release);
        self.shared.cancel.store(false, Ordering::Release);
        *self
            .shared
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        self.shared
            .state
            .store(SessionState::Running as u8, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("kairos-vdf-worker".to_string())
            .spawn(move || worker_main(shared, config, disc, x0, iterations));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(iterations, "vdf session started");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "failed to spawn vdf worker");
                self.shared
                    .state
                    .store(SessionState::Idle as u8, Ordering::Release);
                Err(VdfError::ThreadError)
            }
        }
    }

    /// Request cancellation and join the worker. A session that already
    /// reached a terminal state joins immediately; an idle session is a
    /// no-op.
    pub fn stop(&mut self) -> VdfResult<()> {
        self.shared.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| VdfError::ThreadError)?;
        }
        Ok(())
    }

    /// Current progress snapshot. Safe to call from any thread, any state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let state = self.shared.state();
        let iteration = self.shared.iteration.load(Ordering::Acquire);
        let target = self.shared.target.load(Ordering::Acquire);
        let progress_pct = if target > 0 {
            iteration as f64 / target as f64 * 100.0
        } else {
            0.0
        };
        let elapsed_ms = self
            .shared
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        SessionStatus {
            iteration,
            target,
            state,
            progress_pct,
            iterations_per_second: self.shared.ips.load(Ordering::Relaxed),
            elapsed_ms,
            proof_ready: state == SessionState::Completed,
        }
    }

    /// Block until the session reaches a terminal state. `timeout_ms == 0`
    /// waits without bound; on timeout the session keeps running and
    /// `ComputationFailed` is returned.
    pub fn wait(&self, timeout_ms: u32) -> VdfResult<()> {
        if self.shared.state() == SessionState::Idle {
            return Err(VdfError::NotInitialized);
        }
        let guard = self.shared.done.lock().unwrap_or_else(|e| e.into_inner());
        if timeout_ms == 0 {
            let mut guard = guard;
            while !*guard {
                guard = self
                    .shared
                    .done_cv
                    .wait(guard)
                    .unwrap_or_else(|e| e.into_inner());
            }
            Ok(())
        } else {
            let (guard, timeout) = self
                .shared
                .done_cv
                .wait_timeout_while(guard, Duration::from_millis(u64::from(timeout_ms)), |done| {
                    !*done
                })
                .unwrap_or_else(|e| e.into_inner());
            drop(guard);
            if timeout.timed_out() {
                Err(VdfError::ComputationFailed)
            } else {
                Ok(())
            }
        }
    }

    /// Whether the computation ran to its target.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.state() == SessionState::Completed
    }

    /// The final form; only available in `Completed`.
    pub fn result_form(&self) -> VdfResult<QuadraticForm> {
        if self.shared.state() != SessionState::Completed {
            return Err(VdfError::ComputationFailed);
        }
        self.shared
            .lock_inner()
            .final_form
            .clone()
            .ok_or(VdfError::NotInitialized)
    }

    /// Wesolowski proof over the full run; only available in `Completed`.
    pub fn generate_proof(&self, recursion_level: u8) -> VdfResult<Vec<u8>> {
        if self.shared.state() != SessionState::Completed {
            return Err(VdfError::ComputationFailed);
        }
        let target = self.shared.target.load(Ordering::Acquire);
        let inner = self.shared.lock_inner();
        let disc = inner.discriminant.as_ref().ok_or(VdfError::NotInitialized)?;
        let x = inner.initial_form.as_ref().ok_or(VdfError::NotInitialized)?;
        let y = inner.final_form.as_ref().ok_or(VdfError::NotInitialized)?;
        crate::wesolowski::prove(disc, x, y, target, recursion_level)
            .map_err(|_| VdfError::ProofGenerationFailed)
    }

    /// Number of stored checkpoints.
    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.shared.lock_inner().checkpoints.count()
    }

    /// Stored checkpoints with `lo ≤ iteration ≤ hi`, capped at `capacity`.
    #[must_use]
    pub fn checkpoints_between(&self, lo: u64, hi: u64, capacity: usize) -> Vec<Checkpoint> {
        self.shared.lock_inner().checkpoints.between(lo, hi, capacity)
    }

    /// Iterations served by the slow squaring path so far.
    #[must_use]
    pub fn slow_count(&self) -> u64 {
        self.shared.lock_inner().slow_count
    }

    /// The session discriminant, once a start call derived it.
    #[must_use]
    pub fn discriminant(&self) -> Option<Discriminant> {
        self.shared.lock_inner().discriminant.clone()
    }

    /// The starting form of the computation.
    #[must_use]
    pub fn initial_form(&self) -> Option<QuadraticForm> {
        self.shared.lock_inner().initial_form.clone()
    }

    /// Install progress/completion callbacks. `interval_ms` rate-limits
    /// progress callbacks; segment boundaries additionally always fire.
    pub fn set_callbacks(
        &self,
        progress: Option<ProgressCallback>,
        completion: Option<CompletionCallback>,
        interval_ms: u32,
    ) {
        let mut slots = self
            .shared
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        slots.progress = progress.map(Arc::new);
        slots.completion = completion.map(Arc::new);
        self.shared.interval_ms.store(interval_ms, Ordering::Relaxed);
    }
}

impl Drop for VdfSession {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_main(
    shared: Arc<Shared>,
    config: VdfConfig,
    disc: Discriminant,
    x0: QuadraticForm,
    target: u64,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_loop(&shared, &config, &disc, &x0, target)
    }));

    let (state, ok) = match outcome {
        Ok(Ok(RunEnd::Completed)) => (SessionState::Completed, true),
        Ok(Ok(RunEnd::Cancelled)) => (SessionState::Stopped, false),
        Ok(Err(err)) => {
            warn!(%err, "vdf worker failed");
            (SessionState::Errored, false)
        }
        Err(_) => {
            error!("vdf worker panicked");
            (SessionState::Errored, false)
        }
    };

    // outputs were published under the mutex inside run_loop; the terminal
    // state goes last so readers that see it also see the outputs
    shared.state.store(state as u8, Ordering::Release);

    let iterations = shared.iteration.load(Ordering::Acquire);
    if let Some(cb) = shared.completion_callback() {
        cb(ok, iterations);
    }
    debug!(?state, iterations, "vdf worker finished");

    let mut done = shared.done.lock().unwrap_or_else(|e| e.into_inner());
    *done = true;
    shared.done_cv.notify_all();
}

fn run_loop(
    shared: &Shared,
    config: &VdfConfig,
    disc: &Discriminant,
    x0: &QuadraticForm,
    target: u64,
) -> VdfResult<RunEnd> {
    let mut squarer = BatchSquarer::new(disc.clone(), config);
    let mut current = x0.clone();
    let mut last_cp_form = x0.clone();
    let mut last_cp_iter = 0u64;
    let segment = config.segment_size;

    if segment > 0 {
        shared
            .lock_inner()
            .checkpoints
            .push(Checkpoint::initial(x0.clone()))?;
    }

    let mut window_start = Instant::now();
    let mut window_iters = 0u64;
    let mut done = 0u64;

    while done < target {
        if shared.cancel.load(Ordering::Acquire) {
            return Ok(RunEnd::Cancelled);
        }

        let next_boundary = if segment > 0 {
            (((done / segment) + 1) * segment).min(target)
        } else {
            target
        };
        let budget = squarer.batch_size().min(next_boundary - done);

        let advanced = match squarer.fast_square(&mut current, budget) {
            SquareOutcome::Advanced(n) => n,
            SquareOutcome::Fallback => {
                squarer.slow_square(&mut current)?;
                1
            }
            SquareOutcome::Failed => return Err(VdfError::ComputationFailed),
        };
        done += advanced;
        window_iters += advanced;
        shared.iteration.store(done, Ordering::Release);

        if segment > 0 && done == next_boundary {
            let proof = if config.streaming_proofs {
                Some(encode_segment_record(
                    disc,
                    &last_cp_form,
                    &current,
                    done,
                    done - last_cp_iter,
                    0,
                )?)
            } else {
                None
            };
            {
                let mut inner = shared.lock_inner();
                inner.checkpoints.push(Checkpoint {
                    iteration: done,
                    form: current.clone(),
                    proof,
                })?;
                inner.slow_count = squarer.slow_count();
            }
            last_cp_form = current.clone();
            last_cp_iter = done;
            if let Some(cb) = shared.progress_callback() {
                cb(done, target);
            }
        }

        let interval = Duration::from_millis(u64::from(
            shared.interval_ms.load(Ordering::Relaxed).max(1),
        ));
        let now = Instant::now();
        let window = now.duration_since(window_start);
        if window >= interval {
            let elapsed_ms = (window.as_millis() as u64).max(1);
            shared
                .ips
                .store(window_iters.saturating_mul(1000) / elapsed_ms, Ordering::Relaxed);
            window_start = now;
            window_iters = 0;
            if let Some(cb) = shared.progress_callback() {
                cb(done, target);
            }
        }
    }

    let mut inner = shared.lock_inner();
    inner.final_form = Some(current);
    inner.slow_count = squarer.slow_count();
    Ok(RunEnd::Completed)
}
