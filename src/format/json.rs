//! JSON report formatter

use serde::Serialize;

use super::{Analysis, ReportFormatter};
use crate::symbols::Symbol;
use crate::{BasicBlock, DecompileError};

/// Serializable basic block for JSON output
#[derive(Serialize)]
struct BlockJson {
    /// First instruction address
    start: String,
    /// Last instruction address
    end: String,
    /// Instructions as written in the listing
    instructions: Vec<String>,
    /// Successor block addresses
    successors: Vec<String>,
}

/// Serializable skipped line
#[derive(Serialize)]
struct SkippedJson<'a> {
    line: usize,
    text: &'a str,
    reason: String,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    blocks: Vec<BlockJson>,
    symbols: Vec<&'a Symbol>,
    skipped: Vec<SkippedJson<'a>>,
}

fn block_to_json(block: &BasicBlock) -> BlockJson {
    BlockJson {
        start: format!("${:04X}", block.start),
        end: format!("${:04X}", block.end),
        instructions: block
            .instructions
            .iter()
            .map(|insn| format!("{} {}", insn.mnemonic.as_str(), insn.operand).trim_end().to_string())
            .collect(),
        successors: block.successors().iter().map(|succ| format!("${:04X}", succ)).collect(),
    }
}

impl ReportFormatter for super::JsonFormatter {
    fn format(&self, analysis: &Analysis<'_>) -> Result<String, DecompileError> {
        let report = ReportJson {
            blocks: analysis.blocks.iter().map(block_to_json).collect(),
            symbols: analysis.symbols.iter().collect(),
            skipped: analysis
                .skipped
                .iter()
                .map(|skipped| SkippedJson { line: skipped.line, text: &skipped.text, reason: skipped.error.to_string() })
                .collect(),
        };

        let mut output = serde_json::to_string_pretty(&report)?;
        output.push('\n');
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::with_analysis;
    use super::super::JsonFormatter;
    use super::*;

    #[test]
    fn test_json_report() {
        let result = with_analysis(|analysis| JsonFormatter.format(analysis)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();

        assert_eq!(value["blocks"].as_array().unwrap().len(), 2);
        assert_eq!(value["blocks"][0]["start"], "$C000");
        assert_eq!(value["blocks"][0]["instructions"][1], "STA $D020");
        assert_eq!(value["blocks"][0]["successors"][1], "$C007");

        let symbols = value["symbols"].as_array().unwrap();
        let border = symbols.iter().find(|symbol| symbol["name"] == "BORDER_COLOR").unwrap();
        assert_eq!(border["address"], 0xD020);
        assert_eq!(border["kind"], "hardware_register");

        assert_eq!(value["skipped"][0]["line"], 4);
    }
}
