use crate::common::cursor::CursorValue;

/// A source row. Values are already rendered as SQL literals.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cursor: CursorValue,
    pub values: Vec<String>,
}

/// Rows fetched in one round trip, in ascending cursor order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_cursor(&self) -> Option<&CursorValue> {
        self.rows.iter().map(|row| &row.cursor).max()
    }
}
