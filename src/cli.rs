//! Command line parsing for the `colorscad` binary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::config::{PipelineConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT};

pub const USAGE: &str = "\
Usage: colorscad -i <model.scad> [options]

Renders every color of an OpenSCAD model separately and merges the
results into one multi-material 3MF file.

Options:
  -i, --input <FILE>        OpenSCAD model to convert
  -o, --output <FILE>       output 3MF file (default: input with .3mf extension)
      --openscad <PATH>     OpenSCAD executable to use
      --renderer-arg <ARG>  argument placed before the OpenSCAD arguments (repeatable)
  -j, --threads <N>         number of parallel renders (default: 4)
      --timeout <SECS>      time limit for each render (default: 300)
      --allow-empty         write an empty 3MF when the model uses no colors
      --fail-fast           stop starting renders after the first failure
  -h, --help                print this help";

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(CliOptions),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub openscad: Option<PathBuf>,
    pub renderer_args: Vec<String>,
    pub threads: usize,
    pub timeout: Duration,
    pub allow_empty: bool,
    pub fail_fast: bool,
}

impl CliOptions {
    /// Parses arguments, excluding the program name.
    pub fn parse_from<I, S>(args: I) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mut input = None;
        let mut output = None;
        let mut openscad = None;
        let mut renderer_args = Vec::new();
        let mut threads = DEFAULT_CONCURRENCY;
        let mut timeout = DEFAULT_TIMEOUT;
        let mut allow_empty = false;
        let mut fail_fast = false;

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| -> Result<String> {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| anyhow!("Missing value for {name}"))
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "-i" | "--input" => input = Some(PathBuf::from(value(&flag)?)),
                "-o" | "--output" => output = Some(PathBuf::from(value(&flag)?)),
                "--openscad" => openscad = Some(PathBuf::from(value(&flag)?)),
                "--renderer-arg" => renderer_args.push(value(&flag)?),
                "-j" | "--threads" => {
                    let raw = value(&flag)?;
                    threads = raw
                        .parse()
                        .with_context(|| format!("Invalid thread count '{raw}'"))?;
                    if threads == 0 {
                        return Err(anyhow!("Thread count must be at least 1"));
                    }
                }
                "--timeout" => {
                    let raw = value(&flag)?;
                    let secs: f64 = raw
                        .parse()
                        .with_context(|| format!("Invalid timeout '{raw}'"))?;
                    timeout = Duration::try_from_secs_f64(secs)
                        .ok()
                        .filter(|t| !t.is_zero())
                        .ok_or_else(|| anyhow!("Timeout must be a positive number of seconds"))?;
                }
                "--allow-empty" => allow_empty = true,
                "--fail-fast" => fail_fast = true,
                other => {
                    return Err(anyhow!("Unknown argument: {other}\n\n{USAGE}"));
                }
            }
        }

        let Some(input) = input else {
            return Err(anyhow!("Missing required --input\n\n{USAGE}"));
        };
        Ok(Command::Run(Self {
            input,
            output,
            openscad,
            renderer_args,
            threads,
            timeout,
            allow_empty,
            fail_fast,
        }))
    }

    pub fn into_config(self, renderer_path: PathBuf) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.input, renderer_path);
        config.output_archive_path = self.output;
        config.renderer_args = self.renderer_args;
        config.concurrency = self.threads;
        config.timeout_per_job = self.timeout;
        config.allow_empty_color_set = self.allow_empty;
        config.cancel_on_failure = self.fail_fast;
        config
    }
}
