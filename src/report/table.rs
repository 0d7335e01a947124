use super::ReportError;

/// How a column's values are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFormat {
    /// Free text (`%s`).
    Text,
    /// Unsigned integer (`%d`).
    Integer,
    /// Fixed-point float with the given number of decimals (`%.Nf`).
    Float(usize),
}

impl ColumnFormat {
    /// printf-style specifier used in the table header.
    pub fn specifier(self) -> String {
        match self {
            Self::Text => "%s".to_string(),
            Self::Integer => "%d".to_string(),
            Self::Float(precision) => format!("%.{precision}f"),
        }
    }

    fn right_aligned(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Header text.
    pub name: String,
    /// Value format.
    pub format: ColumnFormat,
}

/// One value in a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(u64),
    /// Floating-point value.
    Float(f64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<char> for Cell {
    fn from(value: char) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Cell::Integer(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

/// Named table of typed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    name: String,
    description: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl ReportTable {
    /// Empty table.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a column; builder style.
    pub fn with_column(mut self, name: impl Into<String>, format: ColumnFormat) -> Self {
        self.columns.push(Column {
            name: name.into(),
            format,
        });
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Append a row with one cell per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), ReportError> {
        if row.len() != self.columns.len() {
            return Err(ReportError::RowArity {
                table: self.name.clone(),
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Render one cell with its column's format.
    pub fn format_cell(&self, column: usize, cell: &Cell) -> String {
        match (self.columns[column].format, cell) {
            (_, Cell::Text(s)) => s.clone(),
            (ColumnFormat::Float(p), Cell::Float(v)) => format!("{v:.p$}"),
            (ColumnFormat::Float(p), Cell::Integer(v)) => format!("{:.p$}", *v as f64),
            (_, Cell::Integer(v)) => v.to_string(),
            (_, Cell::Float(v)) => v.to_string(),
        }
    }

    /// Whether column `column` is right-aligned.
    pub fn right_aligned(&self, column: usize) -> bool {
        self.columns[column].format.right_aligned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_must_match_columns() {
        let mut table = ReportTable::new("t", "")
            .with_column("A", ColumnFormat::Text)
            .with_column("B", ColumnFormat::Float(2));
        assert!(table.push_row(vec!["x".into(), 1.5.into()]).is_ok());
        assert!(matches!(
            table.push_row(vec!["x".into()]),
            Err(ReportError::RowArity { expected: 2, got: 1, .. })
        ));
        assert_eq!(table.format_cell(1, &Cell::Float(1.005)), "1.00");
        assert_eq!(table.format_cell(1, &Cell::Integer(3)), "3.00");
        assert_eq!(ColumnFormat::Float(4).specifier(), "%.4f");
    }
}
