use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Every process that opens the database runs this; the read server and any
/// external importer rely on the tables existing with these columns.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Certificate and DNS record tables").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Shared run lock table").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    // OR IGNORE: two processes may race through the same migration
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: certificate and DNS record tables
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL UNIQUE,
            port INTEGER NOT NULL DEFAULT 443,
            valid INTEGER NOT NULL DEFAULT 0,
            days_until_expires INTEGER,
            valid_from INTEGER,
            valid_to INTEGER,
            issuer TEXT,
            last_checked INTEGER,
            check_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            check_failed INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            alert_on_expiring INTEGER NOT NULL DEFAULT 1,
            alert_days_before INTEGER NOT NULL DEFAULT 30,
            device TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dns_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            dns_server TEXT NOT NULL,
            resolved_ip TEXT,
            resolve_time_ms REAL,
            last_checked INTEGER,
            check_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            check_failed INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            device TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (domain, dns_server)
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_certificates_enabled ON certificates(enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_certificates_valid_to ON certificates(valid_to)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_certificates_check_failed ON certificates(check_failed)", ()).await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_dns_checks_enabled ON dns_checks(enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_dns_checks_resolve_time ON dns_checks(resolve_time_ms)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_dns_checks_check_failed ON dns_checks(check_failed)", ()).await?;

    Ok(())
}

/// Migration v2: run locks shared across processes
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_locks (
            lock_key TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}
