//! Table and JSON rendering of command results.

use serde::Serialize;
use spdb_types::{format_unix, ChunkBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// One chunk as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRow {
    pub data_type: i32,
    pub data_type2: i32,
    pub valid_time: String,
    pub expire_time: String,
    pub len: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub fn chunk_rows(batch: &ChunkBatch, show_data: bool) -> Vec<ChunkRow> {
    batch
        .refs()
        .iter()
        .zip(batch.iter())
        .map(|(r, chunk)| ChunkRow {
            data_type: r.data_type,
            data_type2: r.data_type2,
            valid_time: format_unix(r.valid_time),
            expire_time: format_unix(r.expire_time),
            len: r.len,
            data: show_data.then(|| String::from_utf8_lossy(chunk.data).into_owned()),
        })
        .collect()
}

/// Render rows as aligned columns under `header`.
pub fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let mut out = String::new();
    push_row(&mut out, &widths, header.iter().copied());
    for row in rows {
        push_row(&mut out, &widths, row.iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, widths: &[usize], cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub fn render_chunks(rows: &[ChunkRow], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(rows)?)),
        OutputFormat::Table => {
            let show_data = rows.iter().any(|r| r.data.is_some());
            let mut header = vec!["TYPE", "TYPE2", "VALID", "EXPIRE", "LEN"];
            if show_data {
                header.push("DATA");
            }
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    let mut cells = vec![
                        r.data_type.to_string(),
                        r.data_type2.to_string(),
                        r.valid_time.clone(),
                        r.expire_time.clone(),
                        r.len.to_string(),
                    ];
                    if let Some(data) = &r.data {
                        cells.push(data.clone());
                    }
                    cells
                })
                .collect();
            Ok(table(&header, &cells))
        }
    }
}

pub fn render_value<T: Serialize>(
    value: &T,
    format: OutputFormat,
    table_text: impl FnOnce() -> String,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(value)?)),
        OutputFormat::Table => Ok(table_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_alignment() {
        let out = table(
            &["TYPE", "LEN"],
            &[vec!["1".into(), "12345".into()], vec!["1000".into(), "2".into()]],
        );
        assert_eq!(out, "TYPE  LEN\n1     12345\n1000  2\n");
    }

    #[test]
    fn test_chunk_rows() {
        let mut batch = ChunkBatch::new();
        batch.add_chunk_with_type2(3, 850, 0, 60, b"hello").unwrap();
        let rows = chunk_rows(&batch, true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data_type2, 850);
        assert_eq!(rows[0].valid_time, "1970-01-01 00:00:00");
        assert_eq!(rows[0].data.as_deref(), Some("hello"));

        let json = render_chunks(&chunk_rows(&batch, false), OutputFormat::Json).unwrap();
        assert!(!json.contains("\"data\""));
    }
}
