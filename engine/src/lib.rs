//! # Rowpress
//!
//! Design a page once, print it for every row.
//!
//! A template is a page with text, data-bound fields and images placed at
//! absolute positions, plus *groups*: boxes whose members stack vertically
//! and close up when a member has nothing to show for the current row. Given
//! a table of data, Rowpress produces one single-page PDF per row.
//!
//! ## Architecture
//!
//! ```text
//! Data source (CSV / memory)      Template (model + commands + history)
//!       ↓                                 ↓
//!   [source]    : rows, column keys    [condition] : which elements show
//!       ↓                                 ↓
//!       └──────────→ [layout] ←───── [layout::stack] : group members close up
//!                       ↓
//!                    [pdf]      : serialize to PDF bytes
//!                       ↓
//!                    [render]   : batch over rows, name and write files
//! ```
//!
//! The designer side ([`session`]) maps canvas coordinates through
//! [`transform`], turns mouse gestures into [`model::Command`]s and keeps the
//! undo [`history`]. Templates persist as JSON through [`snapshot`].

pub mod transform;
pub mod style;
pub mod model;
pub mod condition;
pub mod source;
pub mod font;
pub mod image_loader;
pub mod layout;
pub mod pdf;
pub mod render;
pub mod history;
pub mod snapshot;
pub mod session;
pub mod error;
pub mod logging;

use std::sync::Arc;

pub use error::RowpressError;

use font::FontContext;
use image_loader::ImageResolver;
use model::Template;
use render::{BatchRenderer, DocumentSink, Progress, RunReport};
use snapshot::ConfigSnapshot;
use source::DataSource;

/// Parse a saved configuration into a template.
pub fn load_template(json: &str) -> Result<Template, RowpressError> {
    Ok(ConfigSnapshot::from_json(json)?.to_template()?)
}

/// Render one PDF per row of `source` into `sink`.
///
/// This is the primary entry point for embedding applications. The CLI and
/// the designer use [`render::BatchRenderer`] directly for progress
/// reporting and background runs.
pub fn generate(
    template: Template,
    source: &dyn DataSource,
    sink: &mut dyn DocumentSink,
    images: Arc<dyn ImageResolver>,
    progress: &mut dyn FnMut(Progress),
) -> Result<RunReport, RowpressError> {
    let mut renderer = BatchRenderer::new(Arc::new(template), FontContext::new(), images);
    Ok(renderer.run(source, sink, progress)?)
}
