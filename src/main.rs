use std::env;

use anyhow::{anyhow, Context, Result};

use colorscad::cli::{self, CliOptions};
use colorscad::{find_renderer, OpenScadRenderer, PipelineCoordinator, ThreeMfStore};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = match CliOptions::parse_from(env::args().skip(1))? {
        cli::Command::Run(options) => options,
        cli::Command::Help => {
            println!("{}", cli::USAGE);
            return Ok(());
        }
    };

    if !options.input.is_file() {
        return Err(anyhow!(
            "input file '{}' does not exist",
            options.input.display()
        ));
    }

    let renderer_path = find_renderer(options.openscad.as_deref(), &options.renderer_args)?;
    println!("Using OpenSCAD at '{}'", renderer_path.display());

    let config = options.into_config(renderer_path);
    let renderer = OpenScadRenderer::new(&config.renderer_path)
        .with_leading_args(config.renderer_args.iter().cloned());
    let mut pipeline = PipelineCoordinator::new(config, renderer, ThreeMfStore);
    let report = pipeline.run().context("failed to convert model")?;

    if report.empty {
        println!("No colors found; wrote an empty 3MF");
    } else {
        let tokens: Vec<&str> = report.colors.iter().map(|c| c.token.as_str()).collect();
        println!("Found {} color(s): {}", tokens.len(), tokens.join(", "));
    }
    if report.skipped_calls > 0 {
        println!(
            "Skipped {} color() call(s) with unreadable arguments",
            report.skipped_calls
        );
    }
    for warning in &report.cleanup_warnings {
        eprintln!("Warning: {warning}");
    }
    println!(
        "Done! Merged file is '{}' ({} object(s), {} color(s))",
        report.output_path.display(),
        report.objects,
        report.materials
    );
    Ok(())
}
