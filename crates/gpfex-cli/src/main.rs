//! Command-line front end for the GPF export pipeline.
//!
//! Gathers the layer selection (from a JSON file or by selecting every
//! layer in the source), then hands everything to `gpfex_io::export`.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gpfex_core::layers::LayerSelection;
use gpfex_core::report::simulation_report;
use gpfex_io::export::{export, ExportOptions, GeometrySource};
use gpfex_io::FileSource;

#[derive(Parser, Debug)]
#[command(
    name = "gpfex",
    version,
    about = "Export a flat GDS snapshot as a Raith-style GPF container"
)]
struct Args {
    /// Input GDS snapshot file.
    input: PathBuf,

    /// Output GPF container file.
    output: PathBuf,

    /// JSON layer selection: an array of
    /// {"key":{"layer":1,"datatype":0},"label":"M1","heal":false,"relative_dose":1.0}.
    /// Without it, every layer in the source is exported at dose 1.0.
    #[arg(long)]
    selection: Option<PathBuf>,

    /// Maximum vertex count per fractured polygon.
    #[arg(long, default_value_t = 4)]
    max_vertices: usize,

    /// Also write a beam-write simulation report to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let source = FileSource::open(&args.input).map_err(|e| e.to_string())?;

    let selections = match &args.selection {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            serde_json::from_str::<Vec<LayerSelection>>(&json)
                .map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => select_all_layers(&source),
    };

    let options = ExportOptions {
        max_vertices: args.max_vertices,
        exported_at: None,
    };

    let outcome =
        export(&source, &selections, &args.output, &options).map_err(|e| e.to_string())?;

    println!(
        "Saved GPF to {} ({} layers, {} polygons, {:?} path)",
        outcome.summary.output.display(),
        outcome.summary.layer_count,
        outcome.summary.polygon_count,
        outcome.summary.path_taken
    );

    if let Some(report_path) = &args.report {
        let report = simulation_report(&outcome.exported_at, &outcome.records, &outcome.top_cell);
        fs::write(report_path, report)
            .map_err(|e| format!("{}: {}", report_path.display(), e))?;
        println!("Wrote simulation report to {}", report_path.display());
    }

    Ok(())
}

/// Default selection: every layer the source offers, unit dose, no
/// healing, labeled by its layer/datatype pair.
fn select_all_layers(source: &dyn GeometrySource) -> Vec<LayerSelection> {
    source
        .layer_keys()
        .into_iter()
        .map(|key| LayerSelection::new(key, &key.to_string(), false, 1.0))
        .collect()
}
