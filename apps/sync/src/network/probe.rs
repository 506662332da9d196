use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{ConnectivityProbe, NetworkState, Transport};

/// Treats "the backend health URL answered at all" as connected.
///
/// Any HTTP status counts: a 503 still proves the network path works. Only
/// transport failures (DNS, refused, timeout) mean offline.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn query(&self) -> anyhow::Result<NetworkState> {
        match self.client.get(&self.url).send().await {
            Ok(_) => Ok(NetworkState::online(Transport::Unknown)),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(NetworkState::offline()),
            Err(e) => Err(e.into()),
        }
    }
}
