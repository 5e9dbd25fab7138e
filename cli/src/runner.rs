use crate::backend::PreparedBackend;
use alg_host::properties::{self, CheckReport, SeedStream};
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const EPOCH_TICK: Duration = Duration::from_millis(100);
const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Random pairs across all workers; 0 runs until the deadline or Ctrl-C.
    pub samples: u64,
    pub cores: usize,
    pub seed: u64,
    pub duration: Option<Duration>,
}

#[derive(Default)]
pub struct Metrics {
    pairs_checked: AtomicU64,
    calls: AtomicU64,
    violations: AtomicU64,
    worker_errors: AtomicU64,
}

pub struct Shutdown {
    requested: AtomicBool,
    wait_mutex: Mutex<()>,
    wait_cvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            wait_mutex: Mutex::new(()),
            wait_cvar: Condvar::new(),
        }
    }

    /// Returns true for the call that flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            self.wait_cvar.notify_all();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn wait_timeout(&self, duration: Duration) {
        if self.is_requested() {
            return;
        }
        if let Ok(guard) = self.wait_mutex.lock() {
            let _ = self.wait_cvar.wait_timeout(guard, duration);
        }
    }
}

pub struct CheckOutcome {
    pub report: CheckReport,
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Splits `samples` over `workers`, the remainder going to the first ones.
fn worker_quota(samples: u64, workers: usize, worker_id: usize) -> u64 {
    let workers = workers as u64;
    let id = worker_id as u64;
    samples / workers + u64::from(id < samples % workers)
}

fn worker_loop(
    shutdown: &Shutdown,
    metrics: &Metrics,
    prepared: &PreparedBackend,
    quota: u64,
    deadline: Option<Instant>,
    mut stream: SeedStream,
) -> Result<CheckReport> {
    let mut backend = prepared.instantiate()?;
    let mut report = CheckReport::default();
    let mut done = 0u64;

    while !shutdown.is_requested() {
        if quota > 0 && done >= quota {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let (a, b) = stream.next_pair();
        let calls_before = report.calls;
        let violations_before = report.violation_count;
        properties::check_pair(backend.as_mut(), a, b, &mut report)
            .with_context(|| format!("checking pair ({a}, {b})"))?;
        done += 1;

        metrics.pairs_checked.fetch_add(1, Ordering::Relaxed);
        metrics
            .calls
            .fetch_add(report.calls - calls_before, Ordering::Relaxed);
        metrics
            .violations
            .fetch_add(report.violation_count - violations_before, Ordering::Relaxed);
    }

    Ok(report)
}

fn stats_loop(shutdown: &Shutdown, metrics: &Metrics, backend: &'static str, cores: usize) {
    let mut last_pairs = 0u64;
    let mut last_time = Instant::now();

    while !shutdown.is_requested() {
        shutdown.wait_timeout(STATS_INTERVAL);
        if shutdown.is_requested() {
            break;
        }
        let now = Instant::now();
        let pairs = metrics.pairs_checked.load(Ordering::Relaxed);
        let elapsed = now.duration_since(last_time).as_secs_f64().max(0.001);
        let rate = pairs.saturating_sub(last_pairs) as f64 / elapsed;

        tracing::info!(
            backend,
            cores,
            pairs,
            calls = metrics.calls.load(Ordering::Relaxed),
            violations = metrics.violations.load(Ordering::Relaxed),
            pairs_per_sec = rate.round() as u64,
            "checking"
        );

        last_pairs = pairs;
        last_time = now;
    }
}

/// Runs the fixed inputs on the calling thread, then fans random pairs out to
/// `options.cores` workers. Returns once every worker has stopped.
pub fn run(
    prepared: PreparedBackend,
    options: &CheckOptions,
    shutdown: Arc<Shutdown>,
) -> Result<CheckOutcome> {
    let started = Instant::now();
    let cores = options.cores.max(1);
    let deadline = options.duration.map(|d| started + d);
    let metrics = Arc::new(Metrics::default());
    // Set once the workers are done so the helper threads stop.
    let finished = Arc::new(Shutdown::new());

    let epoch_thread = prepared.epoch_engine().map(|engine| {
        let finished = finished.clone();
        thread::spawn(move || {
            while !finished.is_requested() {
                finished.wait_timeout(EPOCH_TICK);
                engine.increment_epoch();
            }
        })
    });

    let fixed = (|| -> Result<(&'static str, CheckReport)> {
        let mut backend = prepared.instantiate()?;
        let mut report = CheckReport::default();
        properties::check_fixed_inputs(backend.as_mut(), &mut report)
            .context("checking fixed inputs")?;
        Ok((backend.name(), report))
    })();
    if fixed.is_err() {
        finished.request();
    }
    let (backend_name, mut report) = fixed?;
    tracing::info!(
        backend = backend_name,
        pairs = report.pairs_checked,
        violations = report.violation_count,
        "fixed inputs checked"
    );

    let stats_thread = {
        let finished = finished.clone();
        let metrics = metrics.clone();
        thread::spawn(move || stats_loop(&finished, &metrics, backend_name, cores))
    };

    tracing::info!(
        cores,
        seed = options.seed,
        samples = options.samples,
        "starting workers"
    );

    let mut workers = Vec::with_capacity(cores);
    for worker_id in 0..cores {
        let shutdown = shutdown.clone();
        let metrics = metrics.clone();
        let prepared = prepared.clone();
        let quota = worker_quota(options.samples, cores, worker_id);
        if options.samples > 0 && quota == 0 {
            continue;
        }
        let stream = SeedStream::for_worker(options.seed, worker_id);
        workers.push((
            worker_id,
            thread::spawn(move || {
                let result = worker_loop(&shutdown, &metrics, &prepared, quota, deadline, stream);
                if let Err(err) = &result {
                    metrics.worker_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(worker_id, error = %format!("{err:#}"), "worker failed");
                }
                result
            }),
        ));
    }

    let mut first_error = None;
    for (worker_id, handle) in workers {
        match handle.join() {
            Ok(Ok(worker_report)) => report.merge(worker_report),
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(_) => {
                first_error.get_or_insert(anyhow!("worker {worker_id} panicked"));
            }
        }
    }

    let interrupted = shutdown.is_requested();
    finished.request();
    let _ = stats_thread.join();
    if let Some(handle) = epoch_thread {
        let _ = handle.join();
    }

    if let Some(err) = first_error {
        let failures = metrics.worker_errors.load(Ordering::Relaxed);
        return Err(err.context(format!("{failures} worker(s) failed")));
    }

    Ok(CheckOutcome {
        report,
        interrupted,
        elapsed: started.elapsed(),
    })
}
