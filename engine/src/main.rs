//! # Rowpress CLI
//!
//! Usage:
//!   rowpress generate config.json --data people.csv
//!   rowpress preview config.json --row 3 -o preview.pdf
//!   rowpress columns people.csv
//!   rowpress example > config.json

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rowpress::font::FontContext;
use rowpress::model::{Command, Condition, ElementKind, Page, Template};
use rowpress::render::{render_row, BatchRenderer, RenderOptions};
use rowpress::snapshot::ConfigSnapshot;
use rowpress::source::{column_keys, rows, CsvSource, DataSource};
use rowpress::style::{Background, Color};
use rowpress::transform::Rect;
use rowpress::RowpressError;

/// Rowpress - one PDF per data row from a page template
#[derive(Parser, Debug)]
#[command(name = "rowpress")]
#[command(version)]
#[command(about = "Render a page template once per data row")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate one PDF per row
    Generate {
        /// Saved template configuration (JSON)
        config: PathBuf,
        /// CSV file, or a directory of CSV files (one sheet each). Defaults
        /// to the data path stored in the configuration
        #[arg(long)]
        data: Option<PathBuf>,
        /// Output directory [default: documents/ beside the data]
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        resources: ResourceArgs,
    },
    /// Render a single row to one PDF
    Preview {
        config: PathBuf,
        #[arg(long)]
        data: Option<PathBuf>,
        /// Row number, starting at 1
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        row: u32,
        #[arg(short, long, default_value = "preview.pdf")]
        output: PathBuf,
        #[command(flatten)]
        resources: ResourceArgs,
    },
    /// List the column keys a template can bind to
    Columns {
        /// CSV file or directory of CSV files
        data: PathBuf,
    },
    /// Print an example configuration
    Example,
}

#[derive(clap::Args, Debug)]
struct ResourceArgs {
    /// Seconds to wait for an image URL
    #[arg(long, default_value_t = 5)]
    image_timeout: u64,
    /// Extra TrueType font as FAMILY=PATH; repeatable
    #[arg(long = "font", value_name = "FAMILY=PATH")]
    fonts: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = rowpress::logging::init(cli.verbose) {
        eprintln!("warning: {}", e);
    }

    if let Err(e) = run(cli.command) {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), RowpressError> {
    match command {
        Commands::Generate {
            config,
            data,
            out,
            resources,
        } => {
            let (template, data) = load(&config, data)?;
            let source = CsvSource::open(&data)?;
            let options = RenderOptions {
                output_dir: out,
                image_timeout: Duration::from_secs(resources.image_timeout),
                ..RenderOptions::default()
            };
            let fonts = load_fonts(&resources.fonts)?;
            let mut sink = options.sink(&data);

            let mut renderer = BatchRenderer::new(Arc::new(template), fonts, Arc::new(options.images(&data)));
            let report = renderer.run(&source, &mut sink, &mut |p| {
                tracing::debug!(row = p.row, total = p.total, remaining_s = p.remaining.as_secs(), "progress");
            })?;

            eprintln!(
                "✓ Written {} of {} documents to {}",
                report.produced.len(),
                report.rows,
                sink.dir().display()
            );
            for failure in &report.failed_rows {
                eprintln!("  row {}: {}", failure.row + 1, failure.reason);
            }
            if report.image_fallbacks > 0 {
                eprintln!("  {} image(s) could not be loaded", report.image_fallbacks);
            }
            Ok(())
        }

        Commands::Preview {
            config,
            data,
            row,
            output,
            resources,
        } => {
            let (template, data) = load(&config, data)?;
            let source = CsvSource::open(&data)?;
            let index = row as usize - 1;
            let Some(values) = rows(&source)?.nth(index).transpose()? else {
                let total = source.row_count(&source.sheets()[0])?;
                return Err(std::io::Error::other(format!("row {} requested, data has {} rows", row, total)).into());
            };
            let options = RenderOptions {
                image_timeout: Duration::from_secs(resources.image_timeout),
                ..RenderOptions::default()
            };
            let images = options.images(&data);
            let fonts = load_fonts(&resources.fonts)?;
            let rendered = render_row(&template, &values, index, &fonts, &images)?;
            fs::write(&output, &rendered.pdf)?;
            eprintln!(
                "✓ Written {} bytes to {} ({})",
                rendered.pdf.len(),
                output.display(),
                rendered.name
            );
            Ok(())
        }

        Commands::Columns { data } => {
            let source = CsvSource::open(&data)?;
            for key in column_keys(&source)? {
                println!("{}", key);
            }
            Ok(())
        }

        Commands::Example => {
            let snapshot = ConfigSnapshot::capture(&example_template()?, Some(Path::new("people.csv")));
            println!("{}", snapshot.to_json()?);
            Ok(())
        }
    }
}

/// Read the configuration and settle which data file to use. A data path
/// stored in the configuration is relative to the configuration file.
fn load(config: &Path, data: Option<PathBuf>) -> Result<(Template, PathBuf), RowpressError> {
    let json = fs::read_to_string(config)?;
    let snapshot = ConfigSnapshot::from_json(&json)?;
    let template = snapshot.to_template()?;
    let data = match (data, snapshot.data_path) {
        (Some(d), _) => d,
        (None, Some(stored)) => config.parent().unwrap_or_else(|| Path::new(".")).join(stored),
        (None, None) => {
            return Err(std::io::Error::other("no data source given and none stored in the configuration").into())
        }
    };
    Ok((template, data))
}

fn load_fonts(specs: &[String]) -> Result<FontContext, RowpressError> {
    let mut fonts = FontContext::new();
    for spec in specs {
        let Some((family, path)) = spec.split_once('=') else {
            return Err(std::io::Error::other(format!("--font expects FAMILY=PATH, got '{}'", spec)).into());
        };
        if !fonts.register_file(family, false, false, Path::new(path))? {
            tracing::warn!(family, path, "not a usable TrueType font, ignored");
        }
    }
    Ok(fonts)
}

/// A name badge: name on the page, a group of notes that close up when
/// a note is empty.
fn example_template() -> Result<Template, RowpressError> {
    let mut t = Template::new(Page::A4);

    let mut name = t.new_element(
        ElementKind::BoundField { column: "Name".into() },
        Rect::new(60.0, 60.0, 475.0, 50.0),
    );
    name.style.font.bold = true;
    t.apply(Command::AddElement { element: name })?;

    let group_name = t.next_group_name();
    let mut notes = t.new_group(group_name, Rect::new(60.0, 140.0, 475.0, 200.0));
    notes.background = Background::Solid(Color::rgb(0.95, 0.95, 0.95));
    notes.spacing = 5.0;
    let group = notes.id;
    t.apply(Command::AddGroup { group: notes })?;

    for (index, column) in ["Note1", "Note2", "Note3"].into_iter().enumerate() {
        let note = t.new_element(
            ElementKind::BoundField { column: column.into() },
            Rect::new(0.0, index as f64 * 30.0, 475.0, 25.0),
        );
        t.apply(Command::AddMember {
            group,
            element: note,
            index,
            condition: None,
        })?;
    }

    let mut footer = t.new_element(
        ElementKind::StaticText {
            text: "Printed with Rowpress".into(),
        },
        Rect::new(60.0, 780.0, 475.0, 20.0),
    );
    footer.condition = Some(Condition::when_filled("Name"));
    t.apply(Command::AddElement { element: footer })?;
    Ok(t)
}
