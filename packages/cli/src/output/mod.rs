use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, ContentArrangement, Row, Table};
use filtermate_engine::HistoryEntry;
use serde::Serialize;

pub fn print_history_table(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("(no history)");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Row::from(vec![
            Cell::new("seq"),
            Cell::new("timestamp"),
            Cell::new("source layer"),
            Cell::new("subset"),
        ]));

    for entry in entries {
        table.add_row(Row::from(vec![
            Cell::new(entry.seq_order),
            Cell::new(entry.timestamp.to_rfc3339()),
            Cell::new(entry.source_layer_id.as_deref().unwrap_or("-")),
            Cell::new(&entry.subset_string),
        ]));
    }

    println!("{table}");
    println!("({} entries)", entries.len());
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Empty subsets read as "no filter" rather than a blank line.
pub fn print_subset(subset: &str) {
    if subset.trim().is_empty() {
        println!("(no filter)");
    } else {
        println!("{subset}");
    }
}
