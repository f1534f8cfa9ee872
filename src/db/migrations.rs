use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

/// Which database a connection belongs to. Each has its own version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Staging,
    Archive,
}

const STAGING_MIGRATIONS: &[(&str, &str)] = &[
    ("staging_v1.sql", include_str!("schemas/staging_v1.sql")),
    ("staging_v2.sql", include_str!("schemas/staging_v2.sql")),
    ("staging_v3.sql", include_str!("schemas/staging_v3.sql")),
];

const ARCHIVE_MIGRATIONS: &[(&str, &str)] = &[
    ("archive_v1.sql", include_str!("schemas/archive_v1.sql")),
    ("archive_v2.sql", include_str!("schemas/archive_v2.sql")),
];

impl Schema {
    pub fn name(self) -> &'static str {
        match self {
            Schema::Staging => "staging",
            Schema::Archive => "archive",
        }
    }

    fn migrations(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Schema::Staging => STAGING_MIGRATIONS,
            Schema::Archive => ARCHIVE_MIGRATIONS,
        }
    }

    fn current_version(self) -> i32 {
        self.migrations().len() as i32
    }
}

pub fn run_migrations(conn: &mut Connection, schema: Schema) -> Result<()> {
    let target = schema.current_version();
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > target {
        bail!(
            "{} database version ({}) is newer than supported schema ({})",
            schema.name(),
            version,
            target
        );
    }

    if version == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < target {
        let next_version = version + 1;
        apply_migration(&tx, schema, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, schema: Schema, version: i32) -> Result<()> {
    let Some((file, sql)) = usize::try_from(version - 1)
        .ok()
        .and_then(|index| schema.migrations().get(index))
    else {
        bail!("unknown migration target version: {version}");
    };

    tx.execute_batch(sql)
        .with_context(|| format!("failed to execute {file}"))?;
    Ok(())
}
