//! # Batch Rendering
//!
//! One PDF per data row. For each row the renderer evaluates visibility,
//! composes the page, serializes it and hands the bytes to a
//! [`DocumentSink`]. A row that fails (PDF error, no writable file name) is
//! logged and counted; the run goes on. Only problems that affect every row
//! (no data, no output directory, unreadable source) end the run.
//!
//! The renderer owns an `Arc<Template>` taken when the run starts, so the
//! designer can keep editing while a batch is in flight on another thread.

mod sink;

pub use sink::{default_output_dir, DocumentSink, FsSink, MemorySink, SinkError, DEFAULT_NAME_ATTEMPTS, OUTPUT_DIR_NAME};

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::condition::evaluate;
use crate::font::FontContext;
use crate::image_loader::{ChainResolver, ImageResolver, DEFAULT_URL_TIMEOUT};
use crate::layout::{compose, ComposeContext, LayoutPage};
use crate::model::Template;
use crate::pdf::{DocumentInfo, PdfError, PdfWriter};
use crate::source::{rows, DataSource, Row, SourceError};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("the data source has no rows")]
    NoRows,
    #[error(transparent)]
    Output(#[from] SinkError),
    #[error("a batch is already running")]
    AlreadyRunning,
    #[error("the batch worker panicked")]
    WorkerPanicked,
}

/// Runtime knobs for generation.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// `None` means `documents/` beside the data source.
    pub output_dir: Option<PathBuf>,
    pub image_timeout: Duration,
    /// Suffixes tried when a file name is not writable.
    pub name_attempts: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            image_timeout: DEFAULT_URL_TIMEOUT,
            name_attempts: DEFAULT_NAME_ATTEMPTS,
        }
    }
}

impl RenderOptions {
    /// The sink a run over `data_path` writes into.
    pub fn sink(&self, data_path: &Path) -> FsSink {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| default_output_dir(data_path));
        FsSink::new(dir).with_attempts(self.name_attempts)
    }

    /// Images next to the data, then URLs with the configured timeout.
    pub fn images(&self, data_path: &Path) -> ChainResolver {
        let base = if data_path.is_dir() {
            data_path.to_path_buf()
        } else {
            data_path.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        ChainResolver::standard(base, self.image_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Running,
    Completed,
    Failed(String),
}

/// Emitted after each row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// 1-based index of the row just finished.
    pub row: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Linear estimate from the average time per row so far.
    pub remaining: Duration,
}

impl Progress {
    fn after(row: usize, total: usize, elapsed: Duration) -> Self {
        let per_row = elapsed / row.max(1) as u32;
        Self {
            row,
            total,
            elapsed,
            remaining: per_row * total.saturating_sub(row) as u32,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.row as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducedDocument {
    /// 0-based row index.
    pub row: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub row: usize,
    pub reason: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub rows: usize,
    pub produced: Vec<ProducedDocument>,
    pub failed_rows: Vec<RowFailure>,
    /// Image elements drawn without their image, over all rows.
    pub image_fallbacks: usize,
    pub elapsed: Duration,
}

/// One rendered row.
#[derive(Debug, Clone)]
pub struct RenderedRow {
    pub name: String,
    pub page: LayoutPage,
    pub pdf: Vec<u8>,
}

/// File name for the document of `row` (0-based `index`): the first column's
/// value, sanitized, or `document_<n>` when nothing usable remains.
pub fn document_name(row: &Row, index: usize) -> String {
    let name = sanitize_file_name(row.first_value().unwrap_or(""));
    if name.is_empty() {
        format!("document_{}", index + 1)
    } else {
        name
    }
}

/// Keep letters, digits, `_`, `-` and whitespace; collapse whitespace runs
/// into `_`; trim leading and trailing `_`.
pub fn sanitize_file_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else if ch.is_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
            in_space = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Compose and serialize one row.
pub fn render_row(
    template: &Template,
    row: &Row,
    index: usize,
    fonts: &FontContext,
    images: &dyn ImageResolver,
) -> Result<RenderedRow, PdfError> {
    let inclusion = evaluate(template, row);
    let ctx = ComposeContext { fonts, images };
    let page = compose(template, row, &inclusion, &ctx);
    let name = document_name(row, index);
    let info = DocumentInfo {
        title: Some(name.clone()),
        subject: None,
    };
    let pdf = PdfWriter::new().write(std::slice::from_ref(&page), &info, fonts)?;
    Ok(RenderedRow { name, page, pdf })
}

/// Drives a batch run.
pub struct BatchRenderer {
    template: Arc<Template>,
    fonts: FontContext,
    images: Arc<dyn ImageResolver>,
    state: RenderState,
}

impl BatchRenderer {
    pub fn new(template: Arc<Template>, fonts: FontContext, images: Arc<dyn ImageResolver>) -> Self {
        Self {
            template,
            fonts,
            images,
            state: RenderState::Idle,
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    /// Render every row of `source` into `sink`, reporting progress after
    /// each row.
    pub fn run(
        &mut self,
        source: &dyn DataSource,
        sink: &mut dyn DocumentSink,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<RunReport, RenderError> {
        if self.state == RenderState::Running {
            return Err(RenderError::AlreadyRunning);
        }
        self.state = RenderState::Running;
        let result = self.run_rows(source, sink, progress);
        self.state = match &result {
            Ok(_) => RenderState::Completed,
            Err(e) => RenderState::Failed(e.to_string()),
        };
        result
    }

    fn run_rows(
        &self,
        source: &dyn DataSource,
        sink: &mut dyn DocumentSink,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<RunReport, RenderError> {
        let sheets = source.sheets();
        let primary = sheets.first().ok_or(SourceError::NoSheets)?;
        let total = source.row_count(primary)?;
        if total == 0 {
            return Err(RenderError::NoRows);
        }
        sink.prepare()?;

        let start = Instant::now();
        let mut report = RunReport::default();
        tracing::info!(rows = total, "batch started");

        for (index, row) in rows(source)?.enumerate() {
            let row = row?;
            report.rows += 1;
            match render_row(&self.template, &row, index, &self.fonts, self.images.as_ref()) {
                Ok(rendered) => {
                    report.image_fallbacks += rendered.page.image_fallbacks();
                    match sink.write(&rendered.name, &rendered.pdf) {
                        Ok(path) => {
                            tracing::debug!(row = index, path = %path.display(), "document written");
                            report.produced.push(ProducedDocument { row: index, path });
                        }
                        Err(e) => report_failure(&mut report, index, e.to_string()),
                    }
                }
                Err(e) => report_failure(&mut report, index, e.to_string()),
            }
            progress(Progress::after(index + 1, total.max(index + 1), start.elapsed()));
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            rows = report.rows,
            produced = report.produced.len(),
            failed = report.failed_rows.len(),
            image_fallbacks = report.image_fallbacks,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }

    /// Run on a worker thread. Progress arrives on the handle's channel.
    pub fn spawn<S, K>(mut self, source: S, mut sink: K) -> BatchHandle
    where
        S: DataSource + Send + 'static,
        K: DocumentSink + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let join = thread::spawn(move || {
            let mut send = |p: Progress| {
                let _ = tx.send(p);
            };
            self.run(&source, &mut sink, &mut send)
        });
        BatchHandle { progress: rx, join }
    }
}

fn report_failure(report: &mut RunReport, row: usize, reason: String) {
    tracing::warn!(row, reason = %reason, "row skipped");
    report.failed_rows.push(RowFailure { row, reason });
}

/// A batch running on a worker thread.
pub struct BatchHandle {
    progress: mpsc::Receiver<Progress>,
    join: thread::JoinHandle<Result<RunReport, RenderError>>,
}

impl BatchHandle {
    pub fn progress(&self) -> &mpsc::Receiver<Progress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> Result<RunReport, RenderError> {
        self.join.join().map_err(|_| RenderError::WorkerPanicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::NoImages;
    use crate::model::{Command, ElementKind};
    use crate::source::MemorySource;
    use crate::transform::Rect;

    fn template() -> Arc<Template> {
        let mut t = Template::default();
        let e = t.new_element(
            ElementKind::BoundField { column: "Name".into() },
            Rect::new(50.0, 50.0, 200.0, 30.0),
        );
        t.apply(Command::AddElement { element: e }).unwrap();
        Arc::new(t)
    }

    fn renderer() -> BatchRenderer {
        BatchRenderer::new(template(), FontContext::new(), Arc::new(NoImages))
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Jan Kowalski"), "Jan_Kowalski");
        assert_eq!(sanitize_file_name("  a/b:c  d  "), "abc_d");
        assert_eq!(sanitize_file_name("x-1_y"), "x-1_y");
        assert_eq!(sanitize_file_name("Zażółć"), "Zażółć");
        assert_eq!(sanitize_file_name("???"), "");
    }

    #[test]
    fn test_document_name_falls_back_to_index() {
        let row: Row = [("Name", Some("***".to_string()))].into_iter().collect();
        assert_eq!(document_name(&row, 4), "document_5");
        let row: Row = [("Name", None::<String>)].into_iter().collect();
        assert_eq!(document_name(&row, 0), "document_1");
    }

    #[test]
    fn test_run_produces_one_document_per_row() {
        let source = MemorySource::new().sheet("People", &["Name"], &[&["Ann"], &["Bo"], &["Cy"]]);
        let mut sink = MemorySink::default();
        let mut seen = Vec::new();
        let mut r = renderer();
        let report = r.run(&source, &mut sink, &mut |p| seen.push(p.row)).unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(report.produced.len(), 3);
        assert!(report.failed_rows.is_empty());
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(sink.documents[1].0, "Bo");
        assert!(sink.documents[1].1.starts_with(b"%PDF-1.7"));
        assert_eq!(r.state(), &RenderState::Completed);
    }

    #[test]
    fn test_empty_source_fails_run() {
        let source = MemorySource::new().sheet("People", &["Name"], &[]);
        let mut r = renderer();
        let err = r.run(&source, &mut MemorySink::default(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, RenderError::NoRows));
        assert!(matches!(r.state(), RenderState::Failed(_)));
    }

    #[test]
    fn test_no_sheets_fails_run() {
        let mut r = renderer();
        let err = r.run(&MemorySource::new(), &mut MemorySink::default(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, RenderError::Source(SourceError::NoSheets)));
    }

    struct FlakySink {
        calls: usize,
    }

    impl DocumentSink for FlakySink {
        fn write(&mut self, name: &str, _bytes: &[u8]) -> Result<PathBuf, SinkError> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(SinkError::Exhausted {
                    name: name.to_string(),
                    attempts: 1,
                    source: std::io::Error::other("locked"),
                });
            }
            Ok(PathBuf::from(name))
        }
    }

    #[test]
    fn test_row_failure_does_not_stop_run() {
        let source = MemorySource::new().sheet("People", &["Name"], &[&["Ann"], &["Bo"], &["Cy"]]);
        let report = renderer()
            .run(&source, &mut FlakySink { calls: 0 }, &mut |_| {})
            .unwrap();
        assert_eq!(report.produced.len(), 2);
        assert_eq!(report.failed_rows.len(), 1);
        assert_eq!(report.failed_rows[0].row, 1);
    }

    #[test]
    fn test_progress_estimate() {
        let p = Progress::after(2, 4, Duration::from_secs(10));
        assert_eq!(p.remaining, Duration::from_secs(10));
        assert_eq!(p.fraction(), 0.5);
    }

    #[test]
    fn test_spawned_run_reports_progress() {
        let source = MemorySource::new().sheet("People", &["Name"], &[&["Ann"], &["Bo"]]);
        let handle = renderer().spawn(source, MemorySink::default());
        let report = handle.join_with_progress();
        assert_eq!(report.0.unwrap().produced.len(), 2);
        assert_eq!(report.1.last().map(|p| p.row), Some(2));
    }

    impl BatchHandle {
        fn join_with_progress(self) -> (Result<RunReport, RenderError>, Vec<Progress>) {
            let result = self.join.join().map_err(|_| RenderError::WorkerPanicked).and_then(|r| r);
            let events = self.progress.try_iter().collect();
            (result, events)
        }
    }

    #[test]
    fn test_options_sink_defaults_beside_data() {
        let opts = RenderOptions::default();
        let sink = opts.sink(Path::new("/data/people.csv"));
        assert_eq!(sink.dir(), Path::new("/data/documents"));

        let opts = RenderOptions {
            output_dir: Some(PathBuf::from("/elsewhere")),
            ..RenderOptions::default()
        };
        assert_eq!(opts.sink(Path::new("/data/people.csv")).dir(), Path::new("/elsewhere"));
    }
}
