use std::io::Write;

use super::table::ReportTable;
use super::ReportError;

const REPORT_VERSION: &str = "v1.1";
const COLUMN_SEPARATOR: &str = "  ";

/// Destination for finished report tables.
pub trait TableSink {
    /// Called once with the number of tables that follow.
    fn begin(&mut self, table_count: usize) -> Result<(), ReportError>;

    /// Consume one table.
    fn write_table(&mut self, table: &ReportTable) -> Result<(), ReportError>;

    /// Called after the last table.
    fn finish(&mut self) -> Result<(), ReportError> {
        Ok(())
    }

    /// Write `tables` between `begin` and `finish`.
    fn write_all_tables(&mut self, tables: &[ReportTable]) -> Result<(), ReportError> {
        self.begin(tables.len())?;
        for table in tables {
            self.write_table(table)?;
        }
        self.finish()
    }
}

/// Collects tables in memory.
impl TableSink for Vec<ReportTable> {
    fn begin(&mut self, table_count: usize) -> Result<(), ReportError> {
        self.reserve(table_count);
        Ok(())
    }

    fn write_table(&mut self, table: &ReportTable) -> Result<(), ReportError> {
        self.push(table.clone());
        Ok(())
    }
}

/// Writes tables in the GATK report text format.
#[derive(Debug)]
pub struct GatkReportWriter<W: Write> {
    writer: W,
}

impl<W: Write> GatkReportWriter<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TableSink for GatkReportWriter<W> {
    fn begin(&mut self, table_count: usize) -> Result<(), ReportError> {
        writeln!(self.writer, "#:GATKReport.{REPORT_VERSION}:{table_count}")?;
        Ok(())
    }

    fn write_table(&mut self, table: &ReportTable) -> Result<(), ReportError> {
        let columns = table.columns();
        let formats: Vec<String> = columns.iter().map(|c| c.format.specifier()).collect();
        writeln!(
            self.writer,
            "#:GATKTable:{}:{}:{}:;",
            columns.len(),
            table.rows().len(),
            formats.join(":")
        )?;
        writeln!(
            self.writer,
            "#:GATKTable:{}:{}",
            table.name(),
            table.description()
        )?;

        let cells: Vec<Vec<String>> = table
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, cell)| table.format_cell(col, cell))
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(col, column)| {
                cells
                    .iter()
                    .map(|row| row[col].len())
                    .fold(column.name.len(), usize::max)
            })
            .collect();

        let headers: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        write_line(&mut self.writer, table, &widths, &headers)?;
        for row in &cells {
            let row: Vec<&str> = row.iter().map(String::as_str).collect();
            write_line(&mut self.writer, table, &widths, &row)?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ReportError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn write_line<W: Write>(
    writer: &mut W,
    table: &ReportTable,
    widths: &[usize],
    values: &[&str],
) -> Result<(), ReportError> {
    let mut line = String::new();
    for (col, (value, &width)) in values.iter().zip(widths).enumerate() {
        if col > 0 {
            line.push_str(COLUMN_SEPARATOR);
        }
        let last = col + 1 == values.len();
        if table.right_aligned(col) {
            line.push_str(&format!("{value:>width$}"));
        } else if last {
            line.push_str(value);
        } else {
            line.push_str(&format!("{value:<width$}"));
        }
    }
    writeln!(writer, "{line}")?;
    Ok(())
}
