use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::schema::SchemaSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub table_count_matches: bool,
    pub view_count_matches: bool,
    pub foreign_key_shape_matches: BTreeMap<String, bool>,
    pub overall_compatible: bool,
}

impl CompatibilityReport {
    pub fn mismatched_tables(&self) -> Vec<&str> {
        self.foreign_key_shape_matches
            .iter()
            .filter(|(_, matches)| !**matches)
            .map(|(table, _)| table.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut problems = Vec::new();

        if !self.table_count_matches {
            problems.push("table count differs".to_string());
        }
        if !self.view_count_matches {
            problems.push("view count differs".to_string());
        }

        let mismatched = self.mismatched_tables();
        if !mismatched.is_empty() {
            problems.push(format!(
                "foreign key count differs for {}",
                mismatched.join(", ")
            ));
        }

        if problems.is_empty() {
            "compatible".to_string()
        } else {
            problems.join("; ")
        }
    }
}

pub struct CompatibilityValidator;

impl CompatibilityValidator {
    /// Compares table and view *counts* plus per-table foreign key arity.
    /// Names are deliberately not compared. A table missing from the target
    /// passes here and fails later when its rows are written.
    pub fn validate(source: &SchemaSnapshot, target: &SchemaSnapshot) -> CompatibilityReport {
        let table_count_matches = source.tables.len() == target.tables.len();
        let view_count_matches = source.views.len() == target.views.len();

        let foreign_key_shape_matches: BTreeMap<String, bool> = source
            .foreign_keys
            .iter()
            .map(|(table, keys)| {
                let matches = target
                    .foreign_key_count(table)
                    .map_or(true, |count| count == keys.len());
                (table.clone(), matches)
            })
            .collect();

        let overall_compatible = table_count_matches
            && view_count_matches
            && foreign_key_shape_matches.values().all(|matches| *matches);

        CompatibilityReport {
            table_count_matches,
            view_count_matches,
            foreign_key_shape_matches,
            overall_compatible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{ForeignKey, ForeignKeyColumn};

    fn snapshot(tables: &[&str], views: &[&str], fks: &[(&str, &str)]) -> SchemaSnapshot {
        SchemaSnapshot::new(
            tables.iter().map(|t| t.to_string()).collect(),
            views.iter().map(|v| v.to_string()).collect(),
            fks.iter()
                .map(|(table, referenced)| ForeignKeyColumn {
                    table: table.to_string(),
                    foreign_key: ForeignKey {
                        column: format!("{}_id", referenced),
                        referenced_table: referenced.to_string(),
                        referenced_column: "id".to_string(),
                    },
                })
                .collect(),
        )
    }

    #[test]
    fn equal_counts_and_arity_are_compatible() {
        let source = snapshot(&["users", "orders"], &["v1"], &[("orders", "users")]);
        let target = snapshot(&["users", "orders"], &["v1"], &[("orders", "users")]);

        let report = CompatibilityValidator::validate(&source, &target);

        assert!(report.table_count_matches);
        assert!(report.view_count_matches);
        assert!(report.overall_compatible);
        assert_eq!(report.summary(), "compatible");
    }

    #[test]
    fn counts_are_compared_not_names() {
        let source = snapshot(&["users", "orders"], &[], &[]);
        let target = snapshot(&["customers", "invoices"], &[], &[]);

        assert!(CompatibilityValidator::validate(&source, &target).overall_compatible);
    }

    #[test]
    fn differing_table_count_is_incompatible() {
        let source = snapshot(&["users", "orders", "payments"], &["v1"], &[]);
        let target = snapshot(&["users", "orders"], &["v1"], &[]);

        let report = CompatibilityValidator::validate(&source, &target);

        assert!(!report.table_count_matches);
        assert!(report.view_count_matches);
        assert!(!report.overall_compatible);
        assert_eq!(report.summary(), "table count differs");
    }

    #[test]
    fn differing_view_count_is_incompatible() {
        let source = snapshot(&["users"], &["v1", "v2"], &[]);
        let target = snapshot(&["users"], &["v1"], &[]);

        let report = CompatibilityValidator::validate(&source, &target);

        assert!(!report.view_count_matches);
        assert!(!report.overall_compatible);
    }

    #[test]
    fn foreign_key_arity_mismatch_is_incompatible() {
        let source = snapshot(
            &["users", "orders"],
            &[],
            &[("orders", "users"), ("orders", "users")],
        );
        let target = snapshot(&["users", "orders"], &[], &[("orders", "users")]);

        let report = CompatibilityValidator::validate(&source, &target);

        assert!(!report.foreign_key_shape_matches["orders"]);
        assert!(report.foreign_key_shape_matches["users"]);
        assert!(!report.overall_compatible);
        assert_eq!(report.mismatched_tables(), vec!["orders"]);
    }

    #[test]
    fn tables_missing_from_target_pass_by_omission() {
        let source = snapshot(&["users", "orders"], &[], &[("orders", "users")]);
        let target = snapshot(&["users", "invoices"], &[], &[]);

        let report = CompatibilityValidator::validate(&source, &target);

        assert!(report.foreign_key_shape_matches["orders"]);
        assert!(report.overall_compatible);
    }
}
