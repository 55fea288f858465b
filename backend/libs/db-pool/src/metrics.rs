//! Prometheus metrics for the database connection pool

use deadpool_postgres::{Client, Pool, PoolError};
use prometheus::{register_histogram_vec, register_int_gauge_vec, HistogramVec, IntGaugeVec};
use std::time::Instant;

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time to acquire a connection from the pool
    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn update_pool_metrics(pool: &Pool, service: &str) {
    let status = pool.status();
    let size = status.size as i64;
    let idle = status.available as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(status.max_size as i64);
}

/// Acquire a connection and record how long it took.
pub async fn acquire_with_metrics(pool: &Pool, service: &str) -> Result<Client, PoolError> {
    let started = Instant::now();
    let result = pool.get().await;
    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(started.elapsed().as_secs_f64());
    update_pool_metrics(pool, service);
    result
}
