use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use wreq::{Client, Proxy};

use crate::error::DispatchError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type ClientKey = (u64, Option<String>);

/// One connection pool per distinct `(header-timeout, proxy)` pair, shared
/// across bindings. Read-mostly; insertion is double-checked under the write
/// lock so concurrent misses build the client once.
#[derive(Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<ClientKey, Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        header_timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Client, DispatchError> {
        let key = (header_timeout.as_secs(), proxy.map(str::to_string));
        if let Ok(clients) = self.clients.read()
            && let Some(client) = clients.get(&key)
        {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().map_err(|_| DispatchError::Upstream {
            status: None,
            message: "client cache lock poisoned".to_string(),
        })?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(header_timeout, proxy).map_err(|err| {
            DispatchError::Upstream {
                status: None,
                message: format!("build upstream client: {err}"),
            }
        })?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(header_timeout: Duration, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    // No whole-request timeout: streamed bodies may stay open for a long
    // time. The read timeout doubles as the stream idle deadline.
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(header_timeout);

    if let Some(proxy) = proxy.map(str::trim).filter(|proxy| !proxy.is_empty()) {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_per_timeout_and_proxy() {
        let cache = ClientCache::new();
        cache.get(Duration::from_secs(30), None).unwrap();
        cache.get(Duration::from_secs(30), None).unwrap();
        cache.get(Duration::from_secs(10), None).unwrap();
        cache
            .get(Duration::from_secs(30), Some("http://127.0.0.1:7890"))
            .unwrap();
        let clients = cache.clients.read().unwrap();
        assert_eq!(clients.len(), 3);
    }
}
