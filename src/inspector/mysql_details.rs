//! MySQL engine details via `SHOW GLOBAL STATUS`.

use serde::Serialize;

use crate::error::Result;
use crate::manager::DatabaseManager;

#[derive(Debug, Clone, Serialize)]
pub struct MySqlDetails {
    pub threads_running: i64,
    pub threads_cached: i64,
    pub threads_connected: i64,
    pub innodb_buffer_pool_read_requests: i64,
    pub innodb_buffer_pool_reads: i64,
    pub buffer_pool_hit_rate: f64,
    pub innodb_row_lock_current_waits: i64,
    pub innodb_row_lock_time: i64,
    pub innodb_row_lock_waits: i64,
    pub innodb_deadlocks: i64,
    pub table_locks_immediate: i64,
    pub table_locks_waited: i64,
    pub connection_errors_max_connections: i64,
    pub connection_errors_internal: i64,
    /// Pool's configured ceiling; `None` can't happen in practice here since
    /// this struct is only ever built from a MySQL-backed manager.
    pub max_open_connections: Option<usize>,
    pub in_use_connections: i64,
    pub idle_connections: i64,
}

pub async fn collect(manager: &DatabaseManager) -> Result<MySqlDetails> {
    use mysql_async::prelude::*;
    let mut conn = manager.mysql_conn().await?;
    let status: Vec<(String, String)> = conn.query("SHOW GLOBAL STATUS").await?;

    let lookup = |name: &str| -> i64 {
        status
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0)
    };

    let read_requests = lookup("Innodb_buffer_pool_read_requests");
    let reads = lookup("Innodb_buffer_pool_reads");
    let hit_rate = if read_requests > 0 {
        (1.0 - (reads as f64 / read_requests as f64)) * 100.0
    } else {
        0.0
    };

    let (max_open_connections, in_use_connections) = match manager.mysql_pool_stats() {
        Some((max, in_use)) => (Some(max), in_use),
        None => (None, 0),
    };
    let idle_connections = max_open_connections
        .map(|max| (max as i64 - in_use_connections).max(0))
        .unwrap_or(0);

    Ok(MySqlDetails {
        threads_running: lookup("Threads_running"),
        threads_cached: lookup("Threads_cached"),
        threads_connected: lookup("Threads_connected"),
        innodb_buffer_pool_read_requests: read_requests,
        innodb_buffer_pool_reads: reads,
        buffer_pool_hit_rate: hit_rate,
        innodb_row_lock_current_waits: lookup("Innodb_row_lock_current_waits"),
        innodb_row_lock_time: lookup("Innodb_row_lock_time"),
        innodb_row_lock_waits: lookup("Innodb_row_lock_waits"),
        innodb_deadlocks: lookup("Innodb_deadlocks"),
        table_locks_immediate: lookup("Table_locks_immediate"),
        table_locks_waited: lookup("Table_locks_waited"),
        connection_errors_max_connections: lookup("Connection_errors_max_connections"),
        connection_errors_internal: lookup("Connection_errors_internal"),
        max_open_connections,
        in_use_connections,
        idle_connections,
    })
}
