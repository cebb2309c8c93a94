//! End-to-end enrichment run: spreadsheet → identifiers → cache → lookups → report.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use regenrich_lookup::RegistryLookup;
use regenrich_shared::{
    AppConfig, BatchConfig, ColumnLabels, EnrichError, Identifier, Record, Result,
};
use regenrich_storage::CacheStore;

use crate::batch::{BatchOutcome, BatchScheduler, WaveProgress};
use crate::extract;
use crate::merge;

/// How the cache decides which identifiers go upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Look up only identifiers never attempted before.
    #[default]
    Normal,
    /// Look up every identifier, ignoring the attempted set.
    SkipCache,
    /// Never call the registry; report from cached records only.
    CacheOnly,
}

/// Configuration for [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Source spreadsheet.
    pub input: PathBuf,
    /// Report destination (overwritten).
    pub output: PathBuf,
    /// Worksheet to read; first sheet when `None`.
    pub sheet_name: Option<String>,
    /// Header label of the identifier column.
    pub identifier_column: String,
    /// Cell appended to rows without registry data.
    pub placeholder: String,
    /// Headers of the appended columns.
    pub labels: ColumnLabels,
    /// Chunking and pacing.
    pub batch: BatchConfig,
    pub mode: CacheMode,
}

impl PipelineOptions {
    /// Options for `input` → `output` with sheet and batch settings from `config`.
    pub fn from_config(config: &AppConfig, input: PathBuf, output: PathBuf) -> Self {
        Self {
            input,
            output,
            sheet_name: config.sheet.sheet_name.clone(),
            identifier_column: config.sheet.identifier_column.clone(),
            placeholder: config.sheet.placeholder.clone(),
            labels: config.sheet.labels.clone(),
            batch: BatchConfig::from(config),
            mode: CacheMode::default(),
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Data rows in the source sheet.
    pub rows: usize,
    /// Valid identifiers after deduplication.
    pub identifiers: usize,
    /// Identifiers answered from a previous run.
    pub cached: usize,
    /// Identifiers sent upstream this run.
    pub pending: usize,
    /// Rows that received registry data.
    pub matched_rows: usize,
    /// Scheduler summary, when lookups ran.
    pub batch: Option<BatchOutcome>,
    /// Whether the cache was unavailable for the run.
    pub cache_degraded: bool,
    /// Total elapsed time.
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Whether a shutdown request cut the lookups short.
    pub fn interrupted(&self) -> bool {
        self.batch.as_ref().is_some_and(|b| b.interrupted)
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each lookup wave is persisted.
    fn wave_finished(&self, current: usize, total: usize, records: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn wave_finished(&self, _current: usize, _total: usize, _records: usize) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Bridges [`ProgressReporter`] to the scheduler's [`WaveProgress`].
struct PipelineWaveProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl WaveProgress for PipelineWaveProgress<'_> {
    fn wave_finished(&self, wave: usize, total: usize, records: usize) {
        self.inner.wave_finished(wave, total, records);
    }
}

/// Open the cache, degrading to `None` (with a warning) when it is unusable.
pub async fn open_cache(path: &Path) -> Option<CacheStore> {
    match CacheStore::open(path).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache unavailable, continuing without it");
            None
        }
    }
}

/// Run the full enrichment pipeline.
///
/// 1. Read the source sheet
/// 2. Extract and deduplicate identifiers
/// 3. Load cached records and the attempted set
/// 4. Look up pending identifiers wave by wave (persisting each wave)
/// 5. Merge records onto rows and write the report
///
/// `lookup` may be `None` only in [`CacheMode::CacheOnly`].
#[instrument(skip_all, fields(input = %options.input.display(), mode = ?options.mode))]
pub async fn run_pipeline<L: RegistryLookup>(
    options: &PipelineOptions,
    lookup: Option<Arc<L>>,
    cache: Option<&CacheStore>,
    progress: &dyn ProgressReporter,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<PipelineReport> {
    let start = Instant::now();

    // --- Phase 1: Read input ---
    progress.phase("Reading source sheet");
    let table = regenrich_sheet::read_table(&options.input, options.sheet_name.as_deref())?;

    // --- Phase 2: Extract identifiers ---
    progress.phase("Extracting identifiers");
    let extraction = extract::extract_identifiers(&table, &options.identifier_column)?;
    let unique = extract::dedupe(extraction.identifiers);
    info!(
        rows = table.data_rows().len(),
        candidates = extraction.candidates,
        unique = unique.len(),
        "identifiers ready"
    );

    // --- Phase 3: Cache ---
    progress.phase("Loading cache");
    let mut cache_degraded = cache.is_none();
    let (cached_records, attempted) = match cache {
        Some(store) => match load_cache(store).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "cache read failed, treating cache as empty");
                cache_degraded = true;
                Default::default()
            }
        },
        None => Default::default(),
    };

    let pending: Vec<Identifier> = match options.mode {
        CacheMode::Normal => unique
            .iter()
            .filter(|id| !attempted.contains(*id))
            .cloned()
            .collect(),
        CacheMode::SkipCache => unique.clone(),
        CacheMode::CacheOnly => Vec::new(),
    };
    let cached = unique.len() - pending.len();
    info!(cached, pending = pending.len(), "cache applied");

    // --- Phase 4: Lookups ---
    let batch = if options.mode == CacheMode::CacheOnly {
        info!("cache-only mode, skipping registry lookups");
        None
    } else if pending.is_empty() {
        info!("nothing to look up");
        None
    } else {
        let lookup = lookup.ok_or_else(|| {
            EnrichError::config("a registry client is required unless running cache-only")
        })?;
        options.batch.validate()?;

        progress.phase("Looking up registry data");
        let mut scheduler = BatchScheduler::new(lookup, options.batch.clone());
        if let Some(rx) = shutdown {
            scheduler = scheduler.with_shutdown(rx);
        }
        let wave_progress = PipelineWaveProgress { inner: progress };
        Some(scheduler.run(&pending, cache, &wave_progress).await)
    };

    // --- Phase 5: Merge & write ---
    progress.phase("Writing report");
    let fetched = batch.as_ref().map_or(&[][..], |b| b.records.as_slice());
    let records = combine_records(cached_records, fetched);
    let merged = merge::merge(
        &table,
        extraction.column_index,
        &records,
        &options.labels,
        &options.placeholder,
    );
    let matched_rows = merged
        .iter()
        .skip(1)
        .filter(|row| row.len() > table.width() + 1)
        .count();

    regenrich_sheet::write_report(&options.output, &merged)?;

    let report = PipelineReport {
        rows: table.data_rows().len(),
        identifiers: unique.len(),
        cached,
        pending: pending.len(),
        matched_rows,
        batch,
        cache_degraded,
        elapsed: start.elapsed(),
    };

    info!(
        rows = report.rows,
        matched = report.matched_rows,
        output = %options.output.display(),
        elapsed_ms = report.elapsed.as_millis(),
        "pipeline complete"
    );
    progress.done(&report);

    Ok(report)
}

async fn load_cache(store: &CacheStore) -> Result<(Vec<Record>, HashSet<Identifier>)> {
    let records = store.get_all_records().await?;
    let attempted = store.get_attempted_ids().await?;
    Ok((records, attempted))
}

/// Cached records overlaid with freshly fetched ones (fetched wins).
fn combine_records(cached: Vec<Record>, fetched: &[Record]) -> Vec<Record> {
    let mut by_id: HashMap<Identifier, Record> = cached
        .into_iter()
        .map(|r| (r.identifier.clone(), r))
        .collect();
    for record in fetched {
        by_id.insert(record.identifier.clone(), record.clone());
    }
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regenrich_lookup::RegistryClient;
    use uuid::Uuid;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ORG: &str = "1027700132195";
    const IND: &str = "304500116000157";
    const UNKNOWN: &str = "1037739010891";

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("regenrich_pipeline_{}.{ext}", Uuid::now_v7()))
    }

    fn write_source(path: &Path) {
        let rows = vec![
            vec!["Название".to_string(), "ОГРН".into()],
            vec!["ООО Ромашка".into(), ORG.into()],
            vec!["ИП Петров".into(), IND.into()],
            vec!["Призрак".into(), UNKNOWN.into()],
            vec!["Дубль".into(), ORG.into()],
            vec!["Битый".into(), "12345".into()],
        ];
        regenrich_sheet::write_report(path, &rows).unwrap();
    }

    fn options(input: PathBuf, output: PathBuf, mode: CacheMode) -> PipelineOptions {
        let mut opts = PipelineOptions::from_config(&AppConfig::default(), input, output);
        opts.batch.dispatch_delay = Duration::ZERO;
        opts.mode = mode;
        opts
    }

    fn client_for(server: &MockServer) -> Arc<RegistryClient> {
        let endpoint = url::Url::parse(&server.uri()).unwrap();
        Arc::new(RegistryClient::new(endpoint, "k", Duration::from_secs(5)).unwrap())
    }

    async fn mount_registry(server: &MockServer, expected_calls: u64) {
        let body = format!(
            r#"{{"items":[
                {{"ЮЛ":{{"ОГРН":"{ORG}","ИНН":"7707083893","Контакты":"info@example.com",
                  "Руководитель":{{"ФИОПолн":"Иванов И.И."}},
                  "Финансы":{{"Выручка":"500","Год":"2023"}}}}}},
                {{"ИП":{{"ОГРНИП":"{IND}","ИННФЛ":"500100732259","ФИОПолн":"Петров П.П."}}}}
            ]}}"#
        );
        Mock::given(method("GET"))
            .and(query_param("req", format!("{ORG},{IND},{UNKNOWN}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn enriches_sheet_and_populates_cache() {
        let server = MockServer::start().await;
        mount_registry(&server, 1).await;

        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);
        let cache = CacheStore::open(&temp_path("db")).await.unwrap();

        let report = run_pipeline(
            &options(input.clone(), output.clone(), CacheMode::Normal),
            Some(client_for(&server)),
            Some(&cache),
            &SilentProgress,
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.rows, 5);
        assert_eq!(report.identifiers, 3);
        assert_eq!(report.pending, 3);
        assert_eq!(report.matched_rows, 3);

        let out = regenrich_sheet::read_table(&output, None).unwrap();
        let rows = out.rows();
        assert_eq!(rows[0][2], "Контакты");
        assert_eq!(rows[1][2], "info@example.com");
        assert_eq!(rows[1][3], "Revenue: 500 thousand currency units, Year: 2023");
        assert_eq!(rows[1][4], "7707083893");
        assert_eq!(rows[1][5], "Иванов И.И.");
        assert_eq!(rows[2][5], "Петров П.П.");
        assert_eq!(rows[3][2], "Нет данных");
        assert_eq!(rows[4][2], "info@example.com");
        assert_eq!(rows[5][2], "Нет данных");

        let attempted = cache.get_attempted_ids().await.unwrap();
        assert_eq!(attempted.len(), 3);
        assert_eq!(cache.get_all_records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rerun_with_populated_cache_skips_lookups() {
        let server = MockServer::start().await;
        mount_registry(&server, 1).await;

        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);
        let cache = CacheStore::open(&temp_path("db")).await.unwrap();
        let opts = options(input, output.clone(), CacheMode::Normal);

        run_pipeline(&opts, Some(client_for(&server)), Some(&cache), &SilentProgress, None)
            .await
            .unwrap();
        // The mock expects exactly one call; a second lookup would fail verification.
        let second =
            run_pipeline(&opts, Some(client_for(&server)), Some(&cache), &SilentProgress, None)
                .await
                .unwrap();

        assert_eq!(second.pending, 0);
        assert_eq!(second.cached, 3);
        assert!(second.batch.is_none());
        assert_eq!(second.matched_rows, 3);
    }

    #[tokio::test]
    async fn skip_cache_refetches_everything() {
        let server = MockServer::start().await;
        mount_registry(&server, 2).await;

        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);
        let cache = CacheStore::open(&temp_path("db")).await.unwrap();

        let normal = options(input.clone(), output.clone(), CacheMode::Normal);
        run_pipeline(&normal, Some(client_for(&server)), Some(&cache), &SilentProgress, None)
            .await
            .unwrap();

        let forced = options(input, output, CacheMode::SkipCache);
        let report =
            run_pipeline(&forced, Some(client_for(&server)), Some(&cache), &SilentProgress, None)
                .await
                .unwrap();
        assert_eq!(report.pending, 3);
    }

    #[tokio::test]
    async fn cache_only_never_calls_registry() {
        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);
        let cache = CacheStore::open(&temp_path("db")).await.unwrap();
        cache
            .put_record(&Record {
                identifier: Identifier::parse(IND).unwrap(),
                contact: "cached".into(),
                finances: String::new(),
                secondary_id: None,
                ceo: None,
            })
            .await
            .unwrap();

        let report = run_pipeline(
            &options(input, output.clone(), CacheMode::CacheOnly),
            None::<Arc<RegistryClient>>,
            Some(&cache),
            &SilentProgress,
            None,
        )
        .await
        .unwrap();

        assert!(report.batch.is_none());
        assert_eq!(report.matched_rows, 1);
        let out = regenrich_sheet::read_table(&output, None).unwrap();
        assert_eq!(out.rows()[2][2], "cached");
    }

    #[tokio::test]
    async fn runs_without_cache() {
        let server = MockServer::start().await;
        mount_registry(&server, 1).await;

        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);

        let report = run_pipeline(
            &options(input, output, CacheMode::Normal),
            Some(client_for(&server)),
            None,
            &SilentProgress,
            None,
        )
        .await
        .unwrap();

        assert!(report.cache_degraded);
        assert_eq!(report.matched_rows, 3);
    }

    #[tokio::test]
    async fn interrupted_run_still_writes_report() {
        let server = MockServer::start().await;
        mount_registry(&server, 0).await;

        let (input, output) = (temp_path("xlsx"), temp_path("xlsx"));
        write_source(&input);
        let (_tx, rx) = watch::channel(true);

        let report = run_pipeline(
            &options(input, output.clone(), CacheMode::Normal),
            Some(client_for(&server)),
            None,
            &SilentProgress,
            Some(rx),
        )
        .await
        .unwrap();

        assert!(report.interrupted());
        assert_eq!(report.matched_rows, 0);
        assert!(output.exists());
        let out = regenrich_sheet::read_table(&output, None).unwrap();
        assert_eq!(out.rows().len(), 6);
        assert_eq!(out.rows()[1][2], "Нет данных");
    }

    #[tokio::test]
    async fn missing_input_fails_before_lookup() {
        let server = MockServer::start().await;
        mount_registry(&server, 0).await;

        let err = run_pipeline(
            &options(temp_path("xlsx"), temp_path("xlsx"), CacheMode::Normal),
            Some(client_for(&server)),
            None,
            &SilentProgress,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EnrichError::Input { .. }));
    }

    #[tokio::test]
    async fn missing_identifier_column_is_fatal() {
        let input = temp_path("xlsx");
        regenrich_sheet::write_report(&input, &[vec!["Название".into(), "ИНН".into()]]).unwrap();

        let err = run_pipeline(
            &options(input, temp_path("xlsx"), CacheMode::CacheOnly),
            None::<Arc<RegistryClient>>,
            None,
            &SilentProgress,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("ОГРН"));
    }

    #[tokio::test]
    async fn output_failure_keeps_persisted_cache() {
        let server = MockServer::start().await;
        mount_registry(&server, 1).await;

        let input = temp_path("xlsx");
        write_source(&input);
        let cache = CacheStore::open(&temp_path("db")).await.unwrap();

        let err = run_pipeline(
            &options(
                input,
                PathBuf::from("/nonexistent/regenrich/out.xlsx"),
                CacheMode::Normal,
            ),
            Some(client_for(&server)),
            Some(&cache),
            &SilentProgress,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EnrichError::Output { .. }));
        assert_eq!(cache.get_attempted_ids().await.unwrap().len(), 3);
    }

    #[test]
    fn fetched_records_override_cached() {
        let id = Identifier::parse(ORG).unwrap();
        let old = Record {
            identifier: id.clone(),
            contact: "old".into(),
            finances: String::new(),
            secondary_id: None,
            ceo: None,
        };
        let new = Record {
            contact: "new".into(),
            ..old.clone()
        };
        let combined = combine_records(vec![old], &[new]);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].contact, "new");
    }
}
