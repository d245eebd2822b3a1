use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Schema migrations, applied in order. Every script is idempotent.
pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_remote_servers.sql",
        include_str!("sql/001_create_remote_servers.sql"),
    ),
    ("002_create_areas.sql", include_str!("sql/002_create_areas.sql")),
    ("003_create_events.sql", include_str!("sql/003_create_events.sql")),
    ("004_create_presence.sql", include_str!("sql/004_create_presence.sql")),
    (
        "005_create_notifications.sql",
        include_str!("sql/005_create_notifications.sql"),
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_by_prefix() {
        let prefixes: Vec<usize> = MIGRATIONS
            .iter()
            .map(|(name, _)| name.split('_').next().and_then(|p| p.parse().ok()).unwrap_or(usize::MAX))
            .collect();
        let mut sorted = prefixes.clone();
        sorted.sort();
        assert_eq!(prefixes, sorted);
    }

    #[test]
    fn test_presence_is_unique_per_area_and_plate() {
        let (_, sql) = MIGRATIONS
            .iter()
            .find(|(name, _)| name.contains("presence"))
            .unwrap();
        assert!(sql.contains("UNIQUE (area_id, plate_number)"));
    }
}
