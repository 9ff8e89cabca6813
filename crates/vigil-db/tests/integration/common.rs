use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Schema from `migrations/0001_init.sql`, one statement at a time.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sites (
        url VARCHAR PRIMARY KEY,
        name VARCHAR NOT NULL,
        is_active BOOLEAN NOT NULL,
        resolved_url VARCHAR,
        category VARCHAR(100) NOT NULL,
        contacts JSONB NOT NULL DEFAULT '[]'::jsonb,
        staff JSONB NOT NULL DEFAULT '[]'::jsonb,
        method_used VARCHAR(20),
        data_hash VARCHAR(64) NOT NULL,
        correlation_id VARCHAR(32) NOT NULL,
        job_id VARCHAR(64) NOT NULL,
        checked_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sites_job ON sites(job_id, checked_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sites_category ON sites(category) WHERE is_active"#,
    r#"CREATE TABLE IF NOT EXISTS verification_jobs (
        job_id VARCHAR(64) PRIMARY KEY,
        status VARCHAR(20) NOT NULL,
        total_processed BIGINT NOT NULL DEFAULT 0,
        active_count BIGINT NOT NULL DEFAULT 0,
        failed_count BIGINT NOT NULL DEFAULT 0,
        stats JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT chk_verification_jobs_status CHECK (
            status IN ('running', 'completed', 'interrupted', 'failed')
        )
    )"#,
    r#"CREATE TABLE IF NOT EXISTS error_logs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        error_type VARCHAR(50) NOT NULL,
        message TEXT NOT NULL,
        job_id VARCHAR(64) NOT NULL,
        context JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_error_logs_job ON error_logs(job_id, created_at DESC)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// Keep the `ContainerAsync` alive for the whole test; dropping it stops
/// the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "vigil_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/vigil_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
