use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use console::Style;

use docbridge_core::doc::DocSummary;
use docbridge_core::hlir::HlirModule;

/// Styles for status lines.
pub struct FormatStyle {
    pub title: Style,
    pub info: Style,
    pub error: Style,
    pub success: Style,
}

impl Default for FormatStyle {
    fn default() -> Self {
        FormatStyle {
            title: Style::new().bold().underlined(),
            info: Style::new().cyan(),
            error: Style::new().red().bold(),
            success: Style::new().green().bold(),
        }
    }
}

impl FormatStyle {
    pub fn success_line(&self, text: &str) -> String {
        format!("{} {}", self.success.apply_to("ok"), text)
    }

    pub fn error_line(&self, text: &str) -> String {
        format!("{} {}", self.error.apply_to("error:"), text)
    }
}

/// Source and lowered counts for `docbridge info`.
pub fn summary_table(module: &HlirModule, summary: &DocSummary, payload_len: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Item", "HLIR", "DOC"]);
    table.add_row(vec![Cell::new("globals"), Cell::new(module.globals.len()), Cell::new(summary.globals)]);
    table.add_row(vec![Cell::new("functions"), Cell::new(module.functions.len()), Cell::new(summary.functions)]);
    table.add_row(vec![Cell::new("elements / nodes"), Cell::new(module.elements.len()), Cell::new(summary.nodes)]);
    table.add_row(vec![Cell::new("strings"), Cell::new("-"), Cell::new(summary.strings)]);
    table.add_row(vec![Cell::new("payload bytes"), Cell::new("-"), Cell::new(payload_len)]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_every_count() {
        let module = HlirModule::new("t");
        let summary = DocSummary { strings: 2, globals: 0, functions: 1, nodes: 3 };
        let rendered = summary_table(&module, &summary, 64).to_string();
        assert!(rendered.contains("payload bytes"));
        assert!(rendered.contains("64"));
        assert!(rendered.contains("elements / nodes"));
    }
}
