use anyhow::Context;

use crate::common::schema::SchemaSnapshot;
use crate::database::Introspect;
use crate::error::{MigrationError, Side};

pub struct SchemaInspector;

impl SchemaInspector {
    /// Captures tables, views and foreign keys. Any failing metadata query
    /// fails the whole capture; no partial snapshot is ever returned.
    pub async fn capture<C>(conn: &mut C, side: Side) -> Result<SchemaSnapshot, MigrationError>
    where
        C: Introspect + ?Sized,
    {
        conn.ping()
            .await
            .map_err(|source| MigrationError::Connection { side, source })?;

        let introspection = |source| MigrationError::Introspection { side, source };

        let tables = conn
            .tables()
            .await
            .context("Failed to list tables")
            .map_err(introspection)?;
        let views = conn
            .views()
            .await
            .context("Failed to list views")
            .map_err(introspection)?;
        let foreign_keys = conn
            .foreign_keys()
            .await
            .context("Failed to list foreign keys")
            .map_err(introspection)?;

        let snapshot = SchemaSnapshot::new(tables, views, foreign_keys);

        debug!(
            "Captured {} schema: {} tables, {} views, {} foreign key columns",
            side,
            snapshot.tables.len(),
            snapshot.views.len(),
            snapshot.foreign_keys.values().map(Vec::len).sum::<usize>()
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;

    #[tokio::test]
    async fn captures_tables_views_and_foreign_keys() {
        let mut db = MemoryDatabase::new()
            .with_table("users", &["id", "name"])
            .with_table("orders", &["id", "user_id"])
            .with_view("active_users")
            .with_foreign_key("orders", "user_id", "users");

        let snapshot = SchemaInspector::capture(&mut db, Side::Source).await.unwrap();

        assert_eq!(snapshot.tables.len(), 2);
        assert!(snapshot.views.contains("active_users"));
        assert_eq!(snapshot.foreign_keys["orders"][0].referenced_table, "users");
        assert!(snapshot.foreign_keys["users"].is_empty());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connection_error() {
        let mut db = MemoryDatabase::new().with_table("users", &["id"]);
        db.set_unreachable(true);

        let err = SchemaInspector::capture(&mut db, Side::Target)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Connection {
                side: Side::Target,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failing_metadata_query_is_an_introspection_error() {
        let mut db = MemoryDatabase::new().with_table("users", &["id"]);
        db.break_metadata();

        let err = SchemaInspector::capture(&mut db, Side::Source)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Introspection { .. }));
    }
}
