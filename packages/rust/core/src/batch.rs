//! Wave-scheduled registry lookups.
//!
//! Pending identifiers are cut into chunks (one upstream call each) and the
//! chunks are grouped into waves. A wave runs all of its chunks concurrently
//! in a [`JoinSet`], waits for every one of them, persists the results, and
//! only then lets the next wave start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use regenrich_lookup::RegistryLookup;
use regenrich_shared::{BatchConfig, Identifier, Record};
use regenrich_storage::CacheStore;

/// Split `ids` into consecutive chunks of at most `size` identifiers.
pub fn chunk_identifiers(ids: &[Identifier], size: usize) -> Vec<Vec<Identifier>> {
    ids.chunks(size.max(1)).map(<[Identifier]>::to_vec).collect()
}

/// Group consecutive chunks into waves of at most `size` chunks.
pub fn group_waves(chunks: Vec<Vec<Identifier>>, size: usize) -> Vec<Vec<Vec<Identifier>>> {
    let size = size.max(1);
    let mut waves = Vec::with_capacity(chunks.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for chunk in chunks {
        current.push(chunk);
        if current.len() == size {
            waves.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        waves.push(current);
    }
    waves
}

/// What one chunk contributed to its wave.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The lookup succeeded (possibly with zero records).
    Fetched(Vec<Record>),
    /// The lookup failed; the chunk contributes nothing.
    Failed { reason: String },
}

/// Summary of a scheduler run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Every record fetched, across all waves.
    pub records: Vec<Record>,
    /// Waves that ran to completion.
    pub waves_run: usize,
    /// Waves planned for the pending identifiers.
    pub waves_planned: usize,
    /// Chunks whose lookup succeeded.
    pub chunks_ok: usize,
    /// Chunks degraded to zero records.
    pub chunks_failed: usize,
    /// Identifiers submitted upstream.
    pub attempted: usize,
    /// A shutdown request stopped the run before the last wave.
    pub interrupted: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Per-wave progress callback.
pub trait WaveProgress: Send + Sync {
    /// Called after a wave has been fetched and persisted.
    fn wave_finished(&self, wave: usize, total: usize, records: usize);
}

/// No-op wave progress.
pub struct SilentWaves;

impl WaveProgress for SilentWaves {
    fn wave_finished(&self, _wave: usize, _total: usize, _records: usize) {}
}

/// Runs lookups wave by wave with bounded concurrency.
pub struct BatchScheduler<L> {
    lookup: Arc<L>,
    config: BatchConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<L: RegistryLookup> BatchScheduler<L> {
    pub fn new(lookup: Arc<L>, config: BatchConfig) -> Self {
        Self {
            lookup,
            config,
            shutdown: None,
        }
    }

    /// Stop before the next wave once `true` is observed on `shutdown`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Look up every identifier in `pending`, persisting each wave to `cache`.
    #[instrument(skip_all, fields(pending = pending.len()))]
    pub async fn run(
        &self,
        pending: &[Identifier],
        cache: Option<&CacheStore>,
        progress: &dyn WaveProgress,
    ) -> BatchOutcome {
        let start = Instant::now();
        let chunks = chunk_identifiers(pending, self.config.chunk_size);
        let waves = group_waves(chunks, self.config.wave_size);
        let total = waves.len();

        let mut outcome = BatchOutcome {
            waves_planned: total,
            ..BatchOutcome::default()
        };

        info!(
            waves = total,
            chunk_size = self.config.chunk_size,
            wave_size = self.config.wave_size,
            "starting lookups"
        );

        for (index, wave) in waves.into_iter().enumerate() {
            if self.shutdown_requested() {
                warn!(completed = index, remaining = total - index, "shutdown requested, stopping");
                outcome.interrupted = true;
                break;
            }

            let wave_ids: Vec<Identifier> = wave.iter().flatten().cloned().collect();
            let mut wave_records = Vec::new();

            for (chunk_index, chunk_outcome) in self.run_wave(wave).await {
                match chunk_outcome {
                    ChunkOutcome::Fetched(records) => {
                        outcome.chunks_ok += 1;
                        wave_records.extend(records);
                    }
                    ChunkOutcome::Failed { reason } => {
                        warn!(wave = index + 1, chunk = ?chunk_index, %reason, "chunk lookup failed");
                        outcome.chunks_failed += 1;
                    }
                }
            }

            if let Some(cache) = cache {
                if let Err(e) = cache.persist_wave(&wave_records, &wave_ids).await {
                    warn!(wave = index + 1, error = %e, "failed to persist wave to cache");
                }
            }

            info!(
                wave = index + 1,
                total,
                identifiers = wave_ids.len(),
                records = wave_records.len(),
                "wave completed"
            );
            progress.wave_finished(index + 1, total, wave_records.len());

            outcome.attempted += wave_ids.len();
            outcome.waves_run += 1;
            outcome.records.extend(wave_records);
        }

        outcome.duration = start.elapsed();
        info!(
            waves = outcome.waves_run,
            chunks_ok = outcome.chunks_ok,
            chunks_failed = outcome.chunks_failed,
            records = outcome.records.len(),
            duration_ms = outcome.duration.as_millis(),
            "lookups finished"
        );
        outcome
    }

    /// Fetch every chunk of one wave concurrently and wait for all of them.
    ///
    /// Results come back in completion order, tagged with the chunk index
    /// (`None` when the task itself died).
    async fn run_wave(&self, wave: Vec<Vec<Identifier>>) -> Vec<(Option<usize>, ChunkOutcome)> {
        let mut set = JoinSet::new();
        let count = wave.len();

        for (chunk_index, chunk) in wave.into_iter().enumerate() {
            if chunk_index > 0 && !self.config.dispatch_delay.is_zero() {
                tokio::time::sleep(self.config.dispatch_delay).await;
            }

            let lookup = Arc::clone(&self.lookup);
            set.spawn(async move {
                debug!(chunk = chunk_index, size = chunk.len(), "dispatching chunk");
                let outcome = match lookup.fetch(&chunk).await {
                    Ok(records) => ChunkOutcome::Fetched(records),
                    Err(e) => ChunkOutcome::Failed {
                        reason: e.to_string(),
                    },
                };
                (Some(chunk_index), outcome)
            });
        }

        let mut results = Vec::with_capacity(count);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    results.push((
                        None,
                        ChunkOutcome::Failed {
                            reason: format!("lookup task aborted: {e}"),
                        },
                    ));
                }
            }
        }
        results
    }
}
