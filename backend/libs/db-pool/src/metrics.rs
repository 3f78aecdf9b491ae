//! Pool gauges, refreshed by the monitor task that `create_pool` starts.

use prometheus::{register_int_gauge_vec, IntGaugeVec};
use sqlx::PgPool;

lazy_static::lazy_static! {
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Connections held by the pool, by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Connection counts as (state, value): idle, active, max.
fn pool_counts(pool: &PgPool) -> [(&'static str, i64); 3] {
    let size = i64::from(pool.size());
    let idle = pool.num_idle() as i64;
    [
        ("idle", idle),
        ("active", size - idle),
        ("max", i64::from(pool.options().get_max_connections())),
    ]
}

pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    for (state, value) in pool_counts(pool) {
        DB_POOL_CONNECTIONS
            .with_label_values(&[service, state])
            .set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_gauges_follow_unconnected_pool() {
        let pool = PgPoolOptions::new()
            .max_connections(3)
            .connect_lazy("postgres://localhost/notifyall_test")
            .unwrap();

        update_pool_metrics(&pool, "db-pool-test");

        let gauge = |state: &str| {
            DB_POOL_CONNECTIONS
                .with_label_values(&["db-pool-test", state])
                .get()
        };
        assert_eq!(gauge("idle"), 0);
        assert_eq!(gauge("active"), 0);
        assert_eq!(gauge("max"), 3);
    }
}
