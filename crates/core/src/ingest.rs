use crate::chunking::{chunk_fingerprint, split_with, ChunkingConfig};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::gateway::CollectionHandle;
use crate::models::{ChunkInput, IngestionOptions};
use crate::IngestError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Lists the PDF files directly inside `directory`, sorted by path.
pub fn scan(directory: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !directory.is_dir() {
        return Err(IngestError::MissingDirectory(
            directory.display().to_string(),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    if files.is_empty() {
        return Err(IngestError::NoInput(directory.display().to_string()));
    }

    files.sort_unstable();
    info!(directory = %directory.display(), files = files.len(), "pdf files discovered");
    Ok(files)
}

pub fn chunks_per_minute(chunks: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        chunks as f64 / seconds * 60.0
    } else {
        0.0
    }
}

/// Cumulative write rate for one batch-write sequence. Observability only.
#[derive(Debug)]
pub struct ThroughputMeter {
    started: Instant,
    chunks: usize,
}

impl ThroughputMeter {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            chunks: 0,
        }
    }

    pub fn record(&mut self, chunks: usize) -> f64 {
        self.chunks += chunks;
        chunks_per_minute(self.chunks, self.started.elapsed())
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    Scanning,
    GroupProcessing { group: usize, total: usize },
    Done,
}

#[derive(Debug)]
pub struct GroupSuccess {
    pub index: usize,
    pub files: Vec<PathBuf>,
    pub chunks_written: usize,
    pub chunks_per_minute: f64,
}

#[derive(Debug)]
pub struct GroupFailure {
    pub index: usize,
    pub files: Vec<PathBuf>,
    /// Chunks that reached the store before the failing step.
    pub chunks_written: usize,
    pub error: IngestError,
}

pub type GroupOutcome = Result<GroupSuccess, GroupFailure>;

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub files_discovered: usize,
    pub groups: Vec<GroupOutcome>,
}

impl IngestionReport {
    /// Chunks written by groups that completed; failed groups count as not persisted.
    pub fn chunks_written(&self) -> usize {
        self.succeeded().map(|group| group.chunks_written).sum()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &GroupSuccess> {
        self.groups.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &GroupFailure> {
        self.groups.iter().filter_map(|outcome| outcome.as_ref().err())
    }

    pub fn files_attempted(&self) -> usize {
        self.groups
            .iter()
            .map(|outcome| match outcome {
                Ok(group) => group.files.len(),
                Err(group) => group.files.len(),
            })
            .sum()
    }
}

/// Drives one ingestion run: scan a directory, then read, chunk and write it group by group.
pub struct IngestionController {
    handle: CollectionHandle,
    extractor: Arc<dyn PdfExtractor>,
    options: IngestionOptions,
    chunking: ChunkingConfig,
    state: IngestionState,
}

impl IngestionController {
    pub fn new(handle: CollectionHandle, options: IngestionOptions) -> Result<Self, IngestError> {
        Self::with_extractor(handle, Arc::new(LopdfExtractor), options)
    }

    pub fn with_extractor(
        handle: CollectionHandle,
        extractor: Arc<dyn PdfExtractor>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        options.validate()?;
        let chunking = ChunkingConfig::try_from(&options)?;

        Ok(Self {
            handle,
            extractor,
            options,
            chunking,
            state: IngestionState::Scanning,
        })
    }

    pub fn state(&self) -> IngestionState {
        self.state
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    /// Ingests every PDF in `directory`. A failing group is logged and recorded in the
    /// report; the run continues with the next group.
    pub async fn process_pdfs(&mut self, directory: &Path) -> Result<IngestionReport, IngestError> {
        self.state = IngestionState::Scanning;
        let files = scan(directory)?;

        let run_started = Instant::now();
        let total = files.len().div_ceil(self.options.file_group_size);
        let mut report = IngestionReport {
            files_discovered: files.len(),
            groups: Vec::with_capacity(total),
        };

        for (index, group) in files.chunks(self.options.file_group_size).enumerate() {
            self.state = IngestionState::GroupProcessing {
                group: index + 1,
                total,
            };
            info!(group = index + 1, total, files = group.len(), "processing file group");

            let outcome = self.process_group(index, group).await;
            if let Err(failure) = &outcome {
                error!(
                    group = failure.index + 1,
                    files = ?failure.files,
                    chunks_written = failure.chunks_written,
                    error = %failure.error,
                    "file group failed; continuing with next group"
                );
            }
            report.groups.push(outcome);
        }

        self.state = IngestionState::Done;
        info!(
            files = report.files_discovered,
            chunks = report.chunks_written(),
            failed_groups = report.failed().count(),
            elapsed_secs = run_started.elapsed().as_secs_f64(),
            "ingestion run finished"
        );
        Ok(report)
    }

    /// Reads, chunks and writes one group of files in batches of `batch_size`.
    pub async fn process_group(&self, index: usize, files: &[PathBuf]) -> GroupOutcome {
        let mut written = 0usize;
        let mut rate = 0f64;

        let result = async {
            let extractor = Arc::clone(&self.extractor);
            let paths = files.to_vec();
            let pages = tokio::task::spawn_blocking(move || {
                let mut pages = Vec::new();
                for path in &paths {
                    pages.extend(extractor.extract_pages(path)?);
                }
                Ok::<_, IngestError>(pages)
            })
            .await
            .map_err(|error| IngestError::ExtractionTask(error.to_string()))??;

            let mut chunks = split_with(&pages, self.chunking);
            if chunks.is_empty() {
                warn!(group = index + 1, "file group produced no chunks");
                return Ok(());
            }
            for chunk in &mut chunks {
                chunk.id = Some(chunk_fingerprint(chunk));
            }

            let mut meter = ThroughputMeter::start();
            for (batch_index, batch) in chunks.chunks(self.options.batch_size).enumerate() {
                let inputs = batch.iter().cloned().map(ChunkInput::Raw).collect();
                self.handle.upsert(inputs).await?;

                written += batch.len();
                rate = meter.record(batch.len());
                debug!(
                    group = index + 1,
                    batch = batch_index + 1,
                    written,
                    total = chunks.len(),
                    chunks_per_minute = rate,
                    "batch written"
                );
            }

            Ok::<_, IngestError>(())
        }
        .await;

        match result {
            Ok(()) => Ok(GroupSuccess {
                index,
                files: files.to_vec(),
                chunks_written: written,
                chunks_per_minute: rate,
            }),
            Err(error) => Err(GroupFailure {
                index,
                files: files.to_vec(),
                chunks_written: written,
                error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::gateway::{initialize, StoreConfig};
    use crate::models::{Chunk, CollectionStats, MetadataFilter, Page, QueryResult};
    use crate::store::VectorRecord;
    use crate::traits::VectorStore;
    use crate::StoreError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::sync::Mutex;
    use tempfile::tempdir;

    const FAIL_MARKER: &str = "损坏";

    #[derive(Default)]
    struct ScriptedExtractor {
        pages: HashMap<String, Result<Vec<String>, String>>,
    }

    impl ScriptedExtractor {
        fn with(mut self, name: &str, pages: Result<Vec<&str>, &str>) -> Self {
            let pages = pages
                .map(|texts| texts.into_iter().map(str::to_string).collect())
                .map_err(str::to_string);
            self.pages.insert(name.to_string(), pages);
            self
        }
    }

    impl PdfExtractor for ScriptedExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            match self.pages.get(name) {
                Some(Ok(texts)) => Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(index, text)| Page::new(name, index as u32 + 1, text.clone()))
                    .collect()),
                Some(Err(reason)) => Err(IngestError::PdfParse(reason.clone())),
                None => Err(IngestError::PdfParse(format!("unscripted file {name}"))),
            }
        }
    }

    /// Accepts writes unless a record carries the failure marker.
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<usize>>,
        records: Mutex<Vec<VectorRecord>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        fn backend(&self) -> &'static str {
            "recording"
        }

        async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
            if records.iter().any(|record| record.text.contains(FAIL_MARKER)) {
                return Err(StoreError::Write {
                    backend: "recording".to_string(),
                    details: "disk full".to_string(),
                });
            }
            self.batches.lock().unwrap().push(records.len());
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        async fn query(
            &self,
            _query_vector: &[f32],
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<QueryResult>, StoreError> {
            Ok(Vec::new())
        }

        async fn get(&self, _id: &str) -> Result<Option<Chunk>, StoreError> {
            Ok(None)
        }

        async fn stats(&self) -> Result<CollectionStats, StoreError> {
            Ok(CollectionStats {
                count: self.records.lock().unwrap().len(),
                metadata: Default::default(),
            })
        }
    }

    fn touch(dir: &Path, names: &[&str]) -> Result<(), std::io::Error> {
        for name in names {
            File::create(dir.join(name))?;
        }
        Ok(())
    }

    fn recording_handle(store: Arc<RecordingStore>) -> CollectionHandle {
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new(16));
        CollectionHandle::new("docs", store, embedder)
    }

    fn options(file_group_size: usize, batch_size: usize) -> IngestionOptions {
        IngestionOptions {
            chunk_size: 500,
            overlap: 100,
            file_group_size,
            batch_size,
        }
    }

    #[test]
    fn scan_is_flat_and_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        touch(dir.path(), &["b.pdf", "A.PDF", "notes.txt"])?;
        touch(&nested, &["c.pdf"])?;

        let files = scan(dir.path())?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf"]);
        Ok(())
    }

    #[test]
    fn scan_reports_missing_and_empty_directories() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["readme.md"])?;

        assert!(matches!(scan(dir.path()), Err(IngestError::NoInput(_))));
        assert!(matches!(
            scan(&dir.path().join("absent")),
            Err(IngestError::MissingDirectory(_))
        ));
        Ok(())
    }

    #[test]
    fn throughput_is_per_minute() {
        assert_eq!(chunks_per_minute(30, Duration::from_secs(30)), 60.0);
        assert_eq!(chunks_per_minute(30, Duration::ZERO), 0.0);

        let mut meter = ThroughputMeter::start();
        meter.record(4);
        meter.record(2);
        assert_eq!(meter.chunks(), 6);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let handle = recording_handle(Arc::new(RecordingStore::default()));
        let result = IngestionController::new(handle, options(80, 0));
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn empty_directory_leaves_collection_untouched() -> Result<(), Box<dyn std::error::Error>>
    {
        let store_dir = tempdir()?;
        let input_dir = tempdir()?;
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new(32));
        let handle = initialize(&StoreConfig::local(store_dir.path(), "docs"), embedder).await?;
        handle
            .upsert(vec![ChunkInput::from("已有的规范条文")])
            .await?;

        let mut controller = IngestionController::new(handle.clone(), IngestionOptions::default())?;
        let result = controller.process_pdfs(input_dir.path()).await;

        assert!(matches!(result, Err(IngestError::NoInput(_))));
        assert_eq!(controller.state(), IngestionState::Scanning);
        assert_eq!(handle.stats().await?.count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn chunks_are_written_in_fixed_batches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["a.pdf", "b.pdf"])?;
        let extractor = ScriptedExtractor::default()
            .with("a.pdf", Ok(vec!["第一页", "第二页", "第三页"]))
            .with("b.pdf", Ok(vec!["第一页", "第二页"]));

        let store = Arc::new(RecordingStore::default());
        let mut controller = IngestionController::with_extractor(
            recording_handle(store.clone()),
            Arc::new(extractor),
            options(80, 2),
        )?;

        let report = controller.process_pdfs(dir.path()).await?;
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.chunks_written(), 5);
        assert_eq!(*store.batches.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(controller.state(), IngestionState::Done);

        let records = store.records.lock().unwrap();
        assert!(records.iter().all(|record| record.id.len() == 64));
        assert_eq!(
            records[3].metadata.get("source"),
            Some(&serde_json::json!("b.pdf"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_reuses_chunk_ids() -> Result<(), Box<dyn std::error::Error>> {
        let store_dir = tempdir()?;
        let input_dir = tempdir()?;
        touch(input_dir.path(), &["a.pdf"])?;
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new(32));
        let handle = initialize(&StoreConfig::local(store_dir.path(), "docs"), embedder).await?;

        for _ in 0..2 {
            let extractor =
                ScriptedExtractor::default().with("a.pdf", Ok(vec!["混凝土强度", "钢筋间距"]));
            let mut controller = IngestionController::with_extractor(
                handle.clone(),
                Arc::new(extractor),
                IngestionOptions::default(),
            )?;
            controller.process_pdfs(input_dir.path()).await?;
        }

        assert_eq!(handle.stats().await?.count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_file_fails_only_its_group() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["a.pdf", "b.pdf", "c.pdf"])?;
        let extractor = ScriptedExtractor::default()
            .with("a.pdf", Ok(vec!["混凝土强度标准"]))
            .with("b.pdf", Err("xref table is damaged"))
            .with("c.pdf", Ok(vec!["钢筋检测规范", "施工安全要求"]));

        let store = Arc::new(RecordingStore::default());
        let mut controller = IngestionController::with_extractor(
            recording_handle(store.clone()),
            Arc::new(extractor),
            options(1, 6),
        )?;

        let report = controller.process_pdfs(dir.path()).await?;
        assert_eq!(report.groups.len(), 3);
        assert_eq!(report.files_attempted(), 3);
        assert_eq!(report.chunks_written(), 3);

        let failures: Vec<_> = report.failed().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert!(matches!(failures[0].error, IngestError::PdfParse(_)));
        Ok(())
    }

    struct PanickingExtractor;

    impl PdfExtractor for PanickingExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if name == "a.pdf" {
                panic!("parser blew up on {name}");
            }
            Ok(vec![Page::new(name, 1, "钢筋检测规范")])
        }
    }

    #[tokio::test]
    async fn extractor_panic_fails_only_its_group() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["a.pdf", "b.pdf"])?;

        let store = Arc::new(RecordingStore::default());
        let mut controller = IngestionController::with_extractor(
            recording_handle(store.clone()),
            Arc::new(PanickingExtractor),
            options(1, 6),
        )?;

        let report = controller.process_pdfs(dir.path()).await?;
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.chunks_written(), 1);

        let failures: Vec<_> = report.failed().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 0);
        assert!(matches!(failures[0].error, IngestError::ExtractionTask(_)));
        assert_eq!(store.records.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn write_failure_mid_group_does_not_stop_later_groups(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["a.pdf", "b.pdf", "c.pdf", "d.pdf"])?;
        let extractor = ScriptedExtractor::default()
            .with("a.pdf", Ok(vec!["混凝土强度标准"]))
            .with("b.pdf", Ok(vec!["模板支撑体系"]))
            .with("c.pdf", Ok(vec!["钢筋检测规范"]))
            .with("d.pdf", Ok(vec!["页面损坏的条文"]));

        let store = Arc::new(RecordingStore::default());
        let mut controller = IngestionController::with_extractor(
            recording_handle(store.clone()),
            Arc::new(extractor),
            options(2, 1),
        )?;

        // Group 1 = a, b. Group 2 = c, d: c is written, then d's batch fails.
        let report = controller.process_pdfs(dir.path()).await?;
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.chunks_written(), 2);

        let failures: Vec<_> = report.failed().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].chunks_written, 1);
        assert!(matches!(
            failures[0].error,
            IngestError::Store(StoreError::Write { .. })
        ));
        assert_eq!(controller.state(), IngestionState::Done);
        Ok(())
    }

    #[tokio::test]
    async fn failed_first_group_still_lets_later_groups_run(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        touch(dir.path(), &["a.pdf", "b.pdf"])?;
        let extractor = ScriptedExtractor::default()
            .with("a.pdf", Ok(vec!["损坏"]))
            .with("b.pdf", Ok(vec!["施工安全要求", "钢筋检测规范"]));

        let store = Arc::new(RecordingStore::default());
        let mut controller = IngestionController::with_extractor(
            recording_handle(store.clone()),
            Arc::new(extractor),
            options(1, 6),
        )?;

        let report = controller.process_pdfs(dir.path()).await?;
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.chunks_written(), 2);
        assert_eq!(store.records.lock().unwrap().len(), 2);
        Ok(())
    }
}
