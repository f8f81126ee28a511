//! Analysis reports: what the decompiler saw before structuring.

mod csv;
mod json;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::parser::SkippedLine;
use crate::symbols::SymbolTable;
use crate::{Address, BasicBlock, DecompileError};

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Plain text listing of blocks and symbols (default)
    Text,
    /// JSON document with blocks, symbols and skipped lines
    Json,
    /// CSV of the symbol table
    Csv,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::Text
    }
}

impl ReportFormat {
    /// Get all available report formats
    pub fn available_formats() -> &'static [Self] {
        &[ReportFormat::Text, ReportFormat::Json, ReportFormat::Csv]
    }

    /// File extension for report files
    pub fn file_extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    /// Get a formatter for this report format
    pub fn get_formatter(&self) -> Box<dyn ReportFormatter> {
        match self {
            ReportFormat::Text => Box::new(TextFormatter),
            ReportFormat::Json => Box::new(JsonFormatter),
            ReportFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Intermediate results of one run.
#[derive(Debug, Clone, Copy)]
pub struct Analysis<'a> {
    pub blocks: &'a [BasicBlock],
    pub symbols: &'a SymbolTable,
    pub skipped: &'a [SkippedLine],
}

/// Formatter trait for analysis reports
pub trait ReportFormatter {
    fn format(&self, analysis: &Analysis<'_>) -> Result<String, DecompileError>;
}

/// Report in plain text
pub struct TextFormatter;

/// Report in JSON
pub struct JsonFormatter;

/// Symbol table in CSV
pub struct CsvFormatter;

fn address_with_name(address: Address, symbols: &SymbolTable) -> String {
    match symbols.name(address) {
        Some(name) => format!("${:04X} ({})", address, name),
        None => format!("${:04X}", address),
    }
}

impl ReportFormatter for TextFormatter {
    fn format(&self, analysis: &Analysis<'_>) -> Result<String, DecompileError> {
        let symbols = analysis.symbols;
        let mut output = format!("Basic blocks: {}\n\n", analysis.blocks.len());

        for block in analysis.blocks {
            output.push_str(&format!("Block at {}:\n", address_with_name(block.start, symbols)));
            for insn in &block.instructions {
                output.push_str(&format!("  {}\n", insn));
            }

            let successors = block.successors();
            if successors.is_empty() {
                output.push_str("  No successors (terminal block)\n");
            } else {
                let successors: Vec<String> =
                    successors.iter().map(|succ| address_with_name(*succ, symbols)).collect();
                output.push_str(&format!("  Successors: {}\n", successors.join(", ")));
            }
            output.push('\n');
        }

        output.push_str(&format!("Symbols: {}\n", symbols.len()));
        for symbol in symbols.iter() {
            output.push_str(&format!("  ${:04X}  {:<24} {}\n", symbol.address, symbol.name, symbol.kind));
        }

        if !analysis.skipped.is_empty() {
            output.push_str(&format!("\nSkipped lines: {}\n", analysis.skipped.len()));
            for skipped in analysis.skipped {
                output.push_str(&format!("  line {}: {:?} ({})\n", skipped.line, skipped.text, skipped.error));
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cfg::build_blocks;
    use crate::parser;
    use crate::symbols::{SymbolEntry, SymbolSources};

    pub(crate) const LISTING: &str = "\
        $C000: LDA #$05\n\
        $C002: STA $D020\n\
        $C005: BNE $C000\n\
        this is not code\n\
        $C007: RTS\n";

    pub(crate) fn with_analysis<T>(check: impl FnOnce(&Analysis<'_>) -> T) -> T {
        let parsed = parser::parse(LISTING);
        let mut sources = SymbolSources::default();
        sources.hardware.insert(
            0xD020,
            SymbolEntry { name: "BORDER_COLOR".to_string(), description: Some("Border color".to_string()) },
        );
        let symbols = SymbolTable::resolve(&parsed.candidates, &sources);
        let blocks = build_blocks(&parsed.instructions);
        check(&Analysis { blocks: &blocks, symbols: &symbols, skipped: &parsed.skipped })
    }

    #[test]
    fn test_text_report() {
        let result = with_analysis(|analysis| TextFormatter.format(analysis)).unwrap();

        assert!(result.contains("Basic blocks: 2"));
        assert!(result.contains("Block at $C000 (LABEL_C000):"));
        assert!(result.contains("  $C002: STA $D020"));
        assert!(result.contains("Successors: $C000 (LABEL_C000), $C007"));
        assert!(result.contains("No successors"));
        assert!(result.contains("BORDER_COLOR"));
        assert!(result.contains("hardware_register"));
        assert!(result.contains("line 4: \"this is not code\""));
    }

    #[test]
    fn test_format_selection() {
        for format in ReportFormat::available_formats() {
            assert_eq!(format.to_string().parse::<ReportFormat>(), Ok(*format));
            let result = with_analysis(|analysis| format.get_formatter().format(analysis));
            assert!(result.is_ok());
        }
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
