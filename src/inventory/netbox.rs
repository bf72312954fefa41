//! REST client for a NetBox-style inventory API.
//!
//! Every request is retried a bounded number of times with a fixed delay when
//! the failure looks transient (connection errors, 5xx). List endpoints are
//! followed through their `next` links until exhausted.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{parse_speed_field, Device, Inventory, InventoryError};
use crate::config::InventoryConfig;

/// One page of a list endpoint.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

pub struct NetboxClient {
    http: Client,
    base_url: String,
    token: String,
    attempts: u32,
    retry_delay: Duration,
}

impl NetboxClient {
    pub fn new(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|source| InventoryError::Transport {
                url: config.url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            attempts: config.repeat_counter + 1,
            retry_delay: config.retry_delay(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn try_get(&self, url: &str, query: &[(String, String)]) -> Result<Value, InventoryError> {
        let mut req = self.http.get(url).header("Accept", "application/json");
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Token {}", self.token));
        }
        if !query.is_empty() {
            req = req.query(query);
        }

        let resp = req.send().await.map_err(|source| InventoryError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(InventoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json::<Value>().await.map_err(|e| InventoryError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET with bounded retry.
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value, InventoryError> {
        let mut attempt = 1;
        loop {
            match self.try_get(url, query).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        url,
                        attempt,
                        attempts = self.attempts,
                        error = %e,
                        "inventory request failed, attempting to connect again"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    error!(url, attempts = self.attempts, "cannot connect to inventory");
                    return Err(InventoryError::Exhausted {
                        attempts: self.attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn list<T>(&self, path: &str, query: &[(String, String)]) -> Result<Vec<T>, InventoryError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut url = self.endpoint(path);
        let mut query = query.to_vec();
        let mut out = Vec::new();

        loop {
            let value = self.get_json(&url, &query).await?;
            let page: Page<T> = serde_json::from_value(value).map_err(|e| InventoryError::Decode {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            out.extend(page.results);

            match page.next {
                // `next` already carries the full query string.
                Some(next) => {
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        Ok(out)
    }
}

#[async_trait::async_trait]
impl Inventory for NetboxClient {
    async fn devices(&self, params: &[(String, String)]) -> Result<Vec<Device>, InventoryError> {
        debug!(?params, "getting devices data");
        self.list::<Device>("dcim/devices/", params).await
    }

    async fn site_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError> {
        debug!(site_id, "getting site data");
        let params = [("id".to_string(), site_id.to_string())];
        let sites: Vec<Value> = self.list("dcim/sites/", &params).await?;

        let Some(field) = sites.first().map(|s| &s["custom_fields"]["cf_speed"]) else {
            return Ok(None);
        };
        let speed = parse_speed_field(field);
        if speed.is_none() {
            warn!(site_id, "site has no integer value in its cf_speed field");
        }
        Ok(speed)
    }

    async fn circuit_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError> {
        debug!(site_id, "getting circuits data");
        let circuits: Vec<Value> = self.list("circuits/circuits/", &[]).await?;

        let speed = circuits
            .iter()
            .find(|c| c["custom_fields"]["cf_site"]["id"].as_u64() == Some(site_id))
            .and_then(|c| parse_speed_field(&c["custom_fields"]["cf_speed"]));
        if speed.is_none() {
            warn!(site_id, "no circuit with a cf_speed value points at this site");
        }
        Ok(speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let cfg = InventoryConfig {
            url: "https://netbox.example.net/".to_string(),
            ..InventoryConfig::default()
        };
        let client = NetboxClient::new(&cfg).unwrap();
        assert_eq!(
            client.endpoint("/dcim/devices/"),
            "https://netbox.example.net/api/dcim/devices/"
        );
        assert_eq!(client.attempts, 4);
    }

    #[tokio::test]
    async fn test_unreachable_inventory_exhausts_retries() {
        let cfg = InventoryConfig {
            // Port 9 (discard) is closed on any sane test host.
            url: "http://127.0.0.1:9".to_string(),
            repeat_counter: 1,
            retry_delay_ms: 1,
            ..InventoryConfig::default()
        };
        let client = NetboxClient::new(&cfg).unwrap();

        let err = client.devices(&[]).await.unwrap_err();
        match err {
            InventoryError::Exhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
