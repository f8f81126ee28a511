//! `c64dec`: decompile 6502 disassembly listings of C64 programs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::filter::LevelFilter;

use c64_decompiler::emit::Target;
use c64_decompiler::format::ReportFormat;
use c64_decompiler::pipeline::{Decompiled, Options, Pipeline, DEFAULT_MAX_INSTRUCTIONS};
use c64_decompiler::symbols::{SymbolPaths, SymbolSource, SymbolSources};

#[derive(Parser, Debug)]
#[command(
    name = "c64dec",
    version,
    about = "Structural decompiler for Commodore 64 6502 disassembly listings",
    long_about = "Reads one instruction per line (`ADDRESS: MNEMONIC OPERAND`) and writes an \
approximate structured program in the chosen dialect.

With one input and no -o the program goes to stdout. With several inputs, -o names a \
directory; without it each output is written next to its input."
)]
struct Cli {
    /// Disassembly listings to decompile
    #[arg(required = true, value_name = "LISTING")]
    inputs: Vec<PathBuf>,

    /// Output dialect
    #[arg(short, long, value_enum, default_value_t = Target::ModernBasic)]
    target: Target,

    /// Output file (one input) or directory (several inputs)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Directory holding the four symbol tables under their default names
    #[arg(long, value_name = "DIR", default_value = "symbols")]
    symbols_dir: PathBuf,

    /// Memory map table, overriding the one in --symbols-dir
    #[arg(long, value_name = "FILE")]
    memory_map: Option<PathBuf>,

    /// KERNAL routine table, overriding the one in --symbols-dir
    #[arg(long, value_name = "FILE")]
    routines: Option<PathBuf>,

    /// Hardware register table, overriding the one in --symbols-dir
    #[arg(long, value_name = "FILE")]
    hardware: Option<PathBuf>,

    /// Zero-page table, overriding the one in --symbols-dir
    #[arg(long, value_name = "FILE")]
    zero_page: Option<PathBuf>,

    /// Reject listings with more instructions than this
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_INSTRUCTIONS)]
    max_instructions: usize,

    /// Also write an analysis report (blocks, symbols, skipped lines)
    #[arg(long, value_enum, value_name = "FORMAT")]
    report: Option<ReportFormat>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn symbol_paths(&self) -> SymbolPaths {
        let overrides = [
            (SymbolSource::MemoryMap, &self.memory_map),
            (SymbolSource::Routines, &self.routines),
            (SymbolSource::Hardware, &self.hardware),
            (SymbolSource::ZeroPage, &self.zero_page),
        ];
        overrides.into_iter().fold(SymbolPaths::from_dir(&self.symbols_dir), |paths, (source, path)| match path {
            Some(path) => paths.with(source, path.clone()),
            None => paths,
        })
    }

    /// Where the program for `input` goes; `None` means stdout
    fn destination(&self, input: &Path) -> Option<PathBuf> {
        let extension = self.target.file_extension();
        match (&self.output, self.inputs.len()) {
            (None, 1) => None,
            (Some(path), 1) => Some(path.clone()),
            (Some(dir), _) => {
                let stem = input.file_stem().unwrap_or(input.as_os_str());
                Some(dir.join(stem).with_extension(extension))
            }
            (None, _) => Some(input.with_extension(extension)),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).with_target(false).init();
}

fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, text).with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

fn write_outputs(cli: &Cli, input: &Path, decompiled: &Decompiled) -> Result<()> {
    let destination = cli.destination(input);
    write_text(destination.as_deref(), &decompiled.text)?;

    if let Some(format) = cli.report {
        let report = format
            .get_formatter()
            .format(&decompiled.analysis())
            .with_context(|| format!("Failed to build {} report for {}", format, input.display()))?;
        let report_path = destination.map(|path| path.with_extension(format!("report.{}", format.file_extension())));
        write_text(report_path.as_deref(), &report)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let sources = SymbolSources::load(&cli.symbol_paths());
    let pipeline = Pipeline::new(sources, Options { target: cli.target, max_instructions: cli.max_instructions });

    if let (Some(dir), true) = (&cli.output, cli.inputs.len() > 1) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let mut failed = 0;
    for (input, result) in pipeline.run_many(&cli.inputs) {
        match result {
            Ok(decompiled) => {
                log::info!("{}: {} basic blocks, {} symbols", input.display(), decompiled.blocks.len(), decompiled.symbols.len());
                write_outputs(&cli, &input, &decompiled)?;
            }
            Err(err) => {
                log::error!("{}: {}", input.display(), err);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} listings failed to decompile", failed, cli.inputs.len());
    }
    Ok(())
}
