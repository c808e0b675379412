use anyhow::{bail, Result};

use crate::common::rows::RowBatch;

// Separator and terminator slack per statement
const RESERVED_BYTES: usize = 10;

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Builds the `INSERT ... ON DUPLICATE KEY UPDATE` statements for a batch,
/// split so that no statement exceeds `max_packet_bytes`. Rows keep their
/// order across statements.
pub fn build_upsert_statements(
    table: &str,
    batch: &RowBatch,
    max_packet_bytes: usize,
) -> Result<Vec<String>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let columns: Vec<String> = batch
        .columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect();

    let insert_statement = format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_identifier(table),
        columns.join(", ")
    );
    let update_clause = format!(
        " ON DUPLICATE KEY UPDATE {}",
        columns
            .iter()
            .map(|column| format!("{} = VALUES({})", column, column))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let fixed_bytes = RESERVED_BYTES + insert_statement.len() + update_clause.len();

    let mut statements = Vec::new();
    let mut value_sets: Vec<String> = Vec::new();
    let mut total_bytes = fixed_bytes;

    for row in &batch.rows {
        if row.values.len() != columns.len() {
            bail!(
                "Row has {} values but {} columns were fetched for {}",
                row.values.len(),
                columns.len(),
                table
            );
        }

        let value_set = format!("({})", row.values.join(", "));

        if fixed_bytes + value_set.len() > max_packet_bytes {
            bail!(
                "A single row of {} needs {} bytes, above the {} byte packet limit",
                table,
                fixed_bytes + value_set.len(),
                max_packet_bytes
            );
        }

        if !value_sets.is_empty() && total_bytes + 1 + value_set.len() > max_packet_bytes {
            statements.push(finish_statement(
                &insert_statement,
                &value_sets,
                &update_clause,
            ));
            value_sets.clear();
            total_bytes = fixed_bytes;
        }

        total_bytes += value_set.len() + 1;
        value_sets.push(value_set);
    }

    if !value_sets.is_empty() {
        statements.push(finish_statement(
            &insert_statement,
            &value_sets,
            &update_clause,
        ));
    }

    Ok(statements)
}

fn finish_statement(insert_statement: &str, value_sets: &[String], update_clause: &str) -> String {
    format!("{}{}{}", insert_statement, value_sets.join(","), update_clause)
}

pub fn build_delete_query(table: &str) -> String {
    format!("DELETE FROM {}", quote_identifier(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cursor::CursorValue;
    use crate::common::rows::Row;

    fn batch(rows: i64) -> RowBatch {
        RowBatch {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: (1..=rows)
                .map(|id| Row {
                    cursor: CursorValue::Ordinal(id),
                    values: vec![id.to_string(), format!("'user{}'", id)],
                })
                .collect(),
        }
    }

    #[test]
    fn single_statement_upsert() {
        let statements = build_upsert_statements("users", &batch(2), 1 << 20).unwrap();

        assert_eq!(
            statements,
            vec![
                "INSERT INTO `users` (`id`, `name`) VALUES (1, 'user1'),(2, 'user2') \
                 ON DUPLICATE KEY UPDATE `id` = VALUES(`id`), `name` = VALUES(`name`)"
            ]
        );
    }

    #[test]
    fn splits_on_packet_limit_without_losing_rows() {
        let single = build_upsert_statements("users", &batch(1), 1 << 20).unwrap();
        // Room for roughly three rows per statement
        let limit = single[0].len() + RESERVED_BYTES + 2 * "(10, 'user10'),".len();

        let statements = build_upsert_statements("users", &batch(10), limit).unwrap();

        assert!(statements.len() > 1);
        assert!(statements.iter().all(|statement| statement.len() <= limit));
        let rows: usize = statements
            .iter()
            .map(|statement| statement.matches("'user").count())
            .sum();
        assert_eq!(rows, 10);
    }

    #[test]
    fn oversized_row_is_an_error() {
        assert!(build_upsert_statements("users", &batch(1), 32).is_err());
    }

    #[test]
    fn delete_and_identifier_quoting() {
        assert_eq!(build_delete_query("order`s"), "DELETE FROM `order``s`");
    }
}
