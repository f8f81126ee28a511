//! Stage wiring: parse, resolve symbols, partition, build, emit.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::ast::{build, Decompilation};
use crate::cfg::{build_blocks, external_targets};
use crate::emit::{render, Target};
use crate::format::Analysis;
use crate::parser::{self, SkippedLine};
use crate::symbols::{SymbolSources, SymbolTable};
use crate::{BasicBlock, DecompileError, Stage};

/// Default instruction ceiling: one instruction per byte of address space
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 65_536;

/// Per-run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Output dialect
    pub target: Target,
    /// Listings with more instructions are rejected before analysis
    pub max_instructions: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options { target: Target::default(), max_instructions: DEFAULT_MAX_INSTRUCTIONS }
    }
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct Decompiled {
    /// Emitted program text
    pub text: String,
    pub symbols: SymbolTable,
    pub unit: Decompilation,
    pub blocks: Vec<BasicBlock>,
    /// Lines the parser could not read
    pub skipped_lines: Vec<SkippedLine>,
}

impl Decompiled {
    /// View for the report formatters
    pub fn analysis(&self) -> Analysis<'_> {
        Analysis { blocks: &self.blocks, symbols: &self.symbols, skipped: &self.skipped_lines }
    }
}

/// A configured decompiler. Holds only immutable state, so one pipeline can
/// serve many runs, in parallel or not.
#[derive(Debug, Clone)]
pub struct Pipeline {
    sources: SymbolSources,
    options: Options,
}

impl Pipeline {
    pub fn new(sources: SymbolSources, options: Options) -> Self {
        Pipeline { sources, options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn sources(&self) -> &SymbolSources {
        &self.sources
    }

    /// Run every stage on `listing`
    pub fn decompile(&self, listing: &str) -> Result<Decompiled, DecompileError> {
        log::info!("Parsing listing ({} lines)", listing.lines().count());
        let parsed = parser::parse(listing);
        if parsed.is_empty() {
            return Err(DecompileError::stage(Stage::Parse, "no instructions in listing"));
        }
        if parsed.instructions.len() > self.options.max_instructions {
            return Err(DecompileError::TooManyInstructions {
                count: parsed.instructions.len(),
                limit: self.options.max_instructions,
            });
        }
        log::debug!("Parsed {} instructions, skipped {} lines", parsed.instructions.len(), parsed.skipped.len());

        log::info!("Resolving symbols");
        let symbols = SymbolTable::resolve(&parsed.candidates, &self.sources);
        log::debug!("Resolved {} symbols", symbols.len());

        log::info!("Partitioning basic blocks");
        let blocks = build_blocks(&parsed.instructions);
        if blocks.is_empty() {
            return Err(DecompileError::stage(Stage::Cfg, "no basic blocks"));
        }
        let external = external_targets(&blocks);
        log::debug!("Built {} basic blocks, {} jump targets outside the listing", blocks.len(), external.len());

        log::info!("Building AST");
        let unit = build(&blocks, &symbols);

        log::info!("Emitting {}", self.options.target);
        let text = render(&unit, self.options.target)?;

        Ok(Decompiled { text, symbols, unit, blocks, skipped_lines: parsed.skipped })
    }

    /// Decompile `listing` to program text
    pub fn run(&self, listing: &str) -> Result<String, DecompileError> {
        self.decompile(listing).map(|decompiled| decompiled.text)
    }

    /// Decompile each file independently and in parallel, in input order
    pub fn run_many<P>(&self, paths: &[P]) -> Vec<(PathBuf, Result<Decompiled, DecompileError>)>
    where
        P: AsRef<Path> + Sync,
    {
        paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                let result = std::fs::read_to_string(path)
                    .map_err(DecompileError::from)
                    .and_then(|listing| self.decompile(&listing));
                (path.to_path_buf(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const COUNTED: &str = "\
        $C000: LDX #$00\n\
        $C002: INX\n\
        $C003: CPX #$0A\n\
        $C005: BNE $C002\n\
        $C007: RTS\n";

    fn pipeline(target: Target) -> Pipeline {
        Pipeline::new(SymbolSources::default(), Options { target, ..Options::default() })
    }

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.target, Target::ModernBasic);
        assert_eq!(options.max_instructions, 65_536);
    }

    #[test]
    fn test_decompile_keeps_intermediates() {
        let decompiled = pipeline(Target::Curly).decompile(COUNTED).unwrap();
        assert_eq!(decompiled.blocks.len(), 2);
        assert_eq!(decompiled.unit.program.count(NodeKind::For), 1);
        assert!(decompiled.text.contains("for (X = 0; X != 10; X++)"));
        assert!(decompiled.skipped_lines.is_empty());
        assert_eq!(decompiled.analysis().blocks.len(), 2);
    }

    #[test]
    fn test_empty_listing_is_parse_error() {
        let result = pipeline(Target::ModernBasic).run("; nothing here\n\nnot an instruction\n");
        assert!(matches!(result, Err(DecompileError::Stage { stage: Stage::Parse, .. })));
    }

    #[test]
    fn test_skipped_lines_are_kept() {
        let listing = format!("{}$C008: LDA ($FB\n", COUNTED);
        let decompiled = pipeline(Target::ModernBasic).decompile(&listing).unwrap();
        assert_eq!(decompiled.skipped_lines.len(), 1);
        assert_eq!(decompiled.skipped_lines[0].line, 6);
        assert_eq!(decompiled.analysis().skipped.len(), 1);
    }

    #[test]
    fn test_instruction_ceiling() {
        let pipeline = Pipeline::new(
            SymbolSources::default(),
            Options { target: Target::ModernBasic, max_instructions: 3 },
        );
        let result = pipeline.run(COUNTED);
        assert!(matches!(result, Err(DecompileError::TooManyInstructions { count: 5, limit: 3 })));
    }

    #[test]
    fn test_run_many_in_order() {
        let mut first = NamedTempFile::new().unwrap();
        write!(first, "{}", COUNTED).unwrap();
        let mut second = NamedTempFile::new().unwrap();
        write!(second, "$C000: INC $D020\n$C003: RTS\n").unwrap();

        let paths = vec![
            first.path().to_path_buf(),
            PathBuf::from("/nonexistent/listing.asm"),
            second.path().to_path_buf(),
        ];
        let results = pipeline(Target::ClassicBasic).run_many(&paths);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, paths[0]);
        assert!(results[0].1.as_ref().unwrap().text.contains("FOR X = 0 TO 9"));
        assert!(matches!(results[1].1, Err(DecompileError::IoError(_))));
        assert!(results[2].1.is_ok());
    }
}
