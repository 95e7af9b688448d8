//! Table and JSON output of command results.

use serde::Serialize;
use std::fmt;
use std::io::Write;

pub type OutputRow = Vec<String>;

/// Rows of cells; the first row is the header when there is more than one.
pub type OutputTable = Vec<OutputRow>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Column-aligned text.
    #[default]
    Table,
    Json,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Table(OutputTable),
    /// A table for people and a structured value for `--format json`.
    Document {
        table: OutputTable,
        value: serde_json::Value,
    },
    /// The command already wrote its result, e.g. a dump to stdout.
    Nothing,
}

impl CommandOutput {
    pub fn document<T: Serialize>(table: OutputTable, value: &T) -> anyhow::Result<Self> {
        Ok(Self::Document {
            table,
            value: serde_json::to_value(value)?,
        })
    }
}

pub struct Printer<W: Write = Box<dyn Write>> {
    out: W,
    format: OutputFormat,
}

impl Printer<Box<dyn Write>> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self {
            out: Box::new(std::io::stdout()),
            format,
        }
    }
}

fn to_io(e: serde_json::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

impl<W: Write> Printer<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            out: writer,
            format,
        }
    }

    pub fn print(&mut self, output: &CommandOutput) -> std::io::Result<()> {
        match (output, self.format) {
            (CommandOutput::Table(table), _) => self.print_table(table),
            (CommandOutput::Document { table, .. }, OutputFormat::Table) => {
                self.print_table_aligned(table)
            }
            (CommandOutput::Document { value, .. }, OutputFormat::Json) => self.print_value(value),
            (CommandOutput::Nothing, _) => Ok(()),
        }
    }

    pub fn print_error(&mut self, err: &str) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Table => writeln!(self.out, "Error: {}", err),
            OutputFormat::Json => {
                let obj = serde_json::json!({ "error": err });
                writeln!(self.out, "{}", serde_json::to_string_pretty(&obj).map_err(to_io)?)
            }
        }
    }

    pub fn print_table(&mut self, table: &OutputTable) -> std::io::Result<()> {
        if table.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Table => self.print_table_aligned(table),
            OutputFormat::Json => self.print_table_json(table),
        }
    }

    fn print_value<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(to_io)?;
        writeln!(self.out, "{}", json)
    }

    fn print_table_aligned(&mut self, table: &OutputTable) -> std::io::Result<()> {
        const SEPARATOR: usize = 2;

        let mut widths: Vec<usize> = Vec::new();
        for row in table {
            if widths.len() < row.len() {
                widths.resize(row.len(), 0);
            }
            for (col, cell) in row.iter().enumerate() {
                widths[col] = widths[col].max(cell.chars().count() + SEPARATOR);
            }
        }

        for row in table {
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                line.push_str(cell);
                if col + 1 < row.len() {
                    let padding = widths[col].saturating_sub(cell.chars().count());
                    line.extend(std::iter::repeat(' ').take(padding));
                }
            }
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    /// Header cells become the keys of one object per data row.
    fn print_table_json(&mut self, table: &OutputTable) -> std::io::Result<()> {
        if table.len() <= 1 {
            return self.print_value(table);
        }
        let headers = &table[0];
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = table[1..]
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let key = headers.get(i).cloned().unwrap_or_else(|| format!("col_{}", i));
                        (key, serde_json::Value::String(cell.clone()))
                    })
                    .collect()
            })
            .collect();
        self.print_value(&rows)
    }
}

impl<W: Write> fmt::Debug for Printer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Printer").field("format", &self.format).finish()
    }
}

pub fn table_with_header(headers: &[&str]) -> OutputTable {
    vec![headers.iter().map(|h| h.to_string()).collect()]
}

pub fn kv_row(key: &str, value: impl fmt::Display) -> OutputRow {
    vec![key.to_string(), value.to_string()]
}

/// Unix seconds as `YYYY-mm-dd HH:MM:SS` UTC.
pub fn format_timestamp(secs: i64) -> String {
    if secs == 0 {
        return "N/A".to_string();
    }
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "InvalidTime".to_string(),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(output: &CommandOutput, format: OutputFormat) -> String {
        let mut buf = Vec::new();
        Printer::new(&mut buf, format).print(output).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_table_columns_are_aligned() {
        let mut table = table_with_header(&["Sid", "Hostname"]);
        table.push(vec!["1".into(), "node-a".into()]);
        table.push(vec!["12".into(), "b".into()]);
        let out = render(&CommandOutput::Table(table), OutputFormat::Table);
        assert_eq!(out, "Sid  Hostname\n1    node-a\n12   b\n");
    }

    #[test]
    fn test_table_as_json_objects() {
        let mut table = table_with_header(&["Id", "Status"]);
        table.push(vec!["1".into(), "Active".into()]);
        let out = render(&CommandOutput::Table(table), OutputFormat::Json);
        let parsed: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["Status"], "Active");
    }

    #[test]
    fn test_document_picks_view_by_format() {
        let doc = CommandOutput::document(vec![kv_row("Name", "vol")], &serde_json::json!({"name": "vol"}))
            .unwrap();
        assert_eq!(render(&doc, OutputFormat::Table), "Name  vol\n");
        let parsed: serde_json::Value = serde_json::from_str(&render(&doc, OutputFormat::Json)).unwrap();
        assert_eq!(parsed["name"], "vol");
        assert_eq!(render(&CommandOutput::Nothing, OutputFormat::Json), "");
    }

    #[test]
    fn test_print_error() {
        let mut buf = Vec::new();
        Printer::new(&mut buf, OutputFormat::Json).print_error("broken").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["error"], "broken");
    }

    #[test]
    fn test_formatters() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GiB");
        assert_eq!(format_timestamp(0), "N/A");
        assert_eq!(format_timestamp(1672531200), "2023-01-01 00:00:00");
    }
}
