use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One column of a foreign key constraint, as seen from the owning table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// A foreign key row as returned by an introspection query, before it is
/// grouped under its owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumn {
    pub table: String,
    pub foreign_key: ForeignKey,
}

/// Point-in-time structure of a database. Captured fresh for every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeSet<String>,
    pub views: BTreeSet<String>,
    pub foreign_keys: BTreeMap<String, Vec<ForeignKey>>,
}

impl SchemaSnapshot {
    pub fn new(
        tables: Vec<String>,
        views: Vec<String>,
        foreign_keys: Vec<ForeignKeyColumn>,
    ) -> Self {
        let tables: BTreeSet<String> = tables.into_iter().collect();
        let views: BTreeSet<String> = views.into_iter().collect();

        let mut grouped: BTreeMap<String, Vec<ForeignKey>> = tables
            .iter()
            .map(|table| (table.clone(), Vec::new()))
            .collect();

        for fk in foreign_keys {
            if let Some(keys) = grouped.get_mut(&fk.table) {
                keys.push(fk.foreign_key);
            }
        }

        SchemaSnapshot {
            tables,
            views,
            foreign_keys: grouped,
        }
    }

    pub fn foreign_key_count(&self, table: &str) -> Option<usize> {
        self.foreign_keys.get(table).map(Vec::len)
    }

    /// Tables ordered so that every referenced table precedes the tables
    /// referencing it. Members of a reference cycle are appended in name order.
    pub fn dependency_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .tables
            .iter()
            .map(|table| {
                let parents = self
                    .foreign_keys
                    .get(table)
                    .into_iter()
                    .flatten()
                    .map(|fk| fk.referenced_table.as_str())
                    .filter(|parent| *parent != table.as_str() && self.tables.contains(*parent))
                    .collect();
                (table.as_str(), parents)
            })
            .collect();

        let mut ordered = Vec::with_capacity(self.tables.len());

        loop {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, parents)| parents.is_empty())
                .map(|(table, _)| *table)
                .collect();

            if ready.is_empty() {
                break;
            }

            for table in ready {
                remaining.remove(table);
                for parents in remaining.values_mut() {
                    parents.remove(table);
                }
                ordered.push(table.to_string());
            }
        }

        if !remaining.is_empty() {
            warn!(
                "Foreign key cycle between tables: {}",
                remaining.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            ordered.extend(remaining.keys().map(|table| table.to_string()));
        }

        ordered
    }
}
