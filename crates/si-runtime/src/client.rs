//! Process-wide HTTP client pool keyed by timeout

use crate::error::{Result, RuntimeError};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

static POOL: OnceLock<Mutex<HashMap<Duration, reqwest::Client>>> = OnceLock::new();

/// Shared client for `timeout` (zero means [`DEFAULT_TIMEOUT`]). Clients are
/// cheap handles over one connection pool each.
pub fn shared_client(timeout: Duration) -> Result<reqwest::Client> {
    let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
    let pool = POOL.get_or_init(|| Mutex::new(HashMap::new()));
    let mut clients = pool.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(client) = clients.get(&timeout) {
        return Ok(client.clone());
    }
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("si/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RuntimeError::Network(format!("failed to build http client: {e}")))?;
    clients.insert(timeout, client.clone());
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_are_reused_per_timeout() {
        shared_client(Duration::from_secs(7)).unwrap();
        shared_client(Duration::from_secs(7)).unwrap();
        shared_client(Duration::ZERO).unwrap();
        let pool = POOL.get().unwrap().lock().unwrap();
        assert!(pool.contains_key(&Duration::from_secs(7)));
        assert!(pool.contains_key(&DEFAULT_TIMEOUT));
    }
}
