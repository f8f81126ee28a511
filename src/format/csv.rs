//! CSV symbol table formatter

use serde::Serialize;

use super::{Analysis, ReportFormatter};
use crate::{DecompileError, Stage};

#[derive(Serialize)]
struct SymbolRow<'a> {
    address: String,
    name: &'a str,
    kind: String,
    description: &'a str,
}

impl ReportFormatter for super::CsvFormatter {
    fn format(&self, analysis: &Analysis<'_>) -> Result<String, DecompileError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        for symbol in analysis.symbols.iter() {
            writer.serialize(SymbolRow {
                address: format!("${:04X}", symbol.address),
                name: &symbol.name,
                kind: symbol.kind.to_string(),
                description: symbol.description.as_deref().unwrap_or(""),
            })?;
        }

        let bytes = writer.into_inner().map_err(|err| DecompileError::IoError(err.into_error()))?;
        String::from_utf8(bytes).map_err(|err| DecompileError::stage(Stage::Symbols, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::with_analysis;
    use super::super::CsvFormatter;
    use super::*;

    #[test]
    fn test_csv_report() {
        let result = with_analysis(|analysis| CsvFormatter.format(analysis)).unwrap();
        let mut lines = result.lines();

        assert_eq!(lines.next(), Some("address,name,kind,description"));
        assert!(result.contains("$C000,LABEL_C000,generic_label,\n"));
        assert!(result.contains("$D020,BORDER_COLOR,hardware_register,Border color\n"));
        assert_eq!(result.lines().count(), 3);
    }
}
