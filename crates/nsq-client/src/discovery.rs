//! Polling `nsqlookupd` for the producers of a topic.

use crate::endpoint::Endpoint;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: LookupData,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<Producer>,
}

#[derive(Debug, Deserialize)]
struct Producer {
    broadcast_address: String,
    tcp_port: u16,
}

/// Polls one or more `nsqlookupd` HTTP addresses for a topic's producers.
///
/// A single `reqwest::Client` is reused across calls so TCP connections to
/// lookupd pool rather than being rebuilt on every poll.
pub struct Discovery {
    http: reqwest::Client,
    lookupd_http_addresses: Vec<String>,
    topic: String,
}

impl Discovery {
    pub fn new(lookupd_http_addresses: Vec<String>, topic: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            lookupd_http_addresses,
            topic,
        }
    }

    /// Query every configured lookupd and return the union of producer
    /// endpoints. A lookupd that fails to respond is logged and skipped —
    /// discovery failures never propagate to the caller (spec: nsqd outages
    /// are transient and the remaining lookupds still give a usable answer).
    pub async fn discover(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::new();
        for base in &self.lookupd_http_addresses {
            match self.query_one(base).await {
                Ok(producers) => endpoints.extend(producers),
                Err(e) => {
                    warn!(lookupd = %base, error = %e, "nsqlookupd query failed");
                }
            }
        }
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    async fn query_one(&self, base: &str) -> Result<Vec<Endpoint>, reqwest::Error> {
        let url = format!(
            "{}/lookup?topic={}",
            base.trim_end_matches('/'),
            urlencode(&self.topic)
        );
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body: LookupResponse = response.json().await?;
        Ok(body
            .data
            .producers
            .into_iter()
            .map(|p| Endpoint::new(p.broadcast_address, p.tcp_port))
            .collect())
    }
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn discover_merges_producers_from_a_single_lookupd() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "producers": [
                        {"broadcast_address": "nsqd-1", "tcp_port": 4150},
                        {"broadcast_address": "nsqd-2", "tcp_port": 4150},
                    ]
                }
            })))
            .mount(&server)
            .await;

        let discovery = Discovery::new(vec![server.uri()], "events".to_string());
        let endpoints = discovery.discover().await;

        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.contains(&Endpoint::new("nsqd-1", 4150)));
    }

    #[tokio::test]
    async fn discover_skips_a_failing_lookupd_without_erroring() {
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"producers": [{"broadcast_address": "nsqd-1", "tcp_port": 4150}]}
            })))
            .mount(&good)
            .await;

        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad)
            .await;

        let discovery = Discovery::new(vec![bad.uri(), good.uri()], "events".to_string());
        let endpoints = discovery.discover().await;

        assert_eq!(endpoints, vec![Endpoint::new("nsqd-1", 4150)]);
    }

    #[tokio::test]
    async fn discover_returns_empty_for_a_topic_with_no_producers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"producers": []}})),
            )
            .mount(&server)
            .await;

        let discovery = Discovery::new(vec![server.uri()], "events".to_string());
        assert!(discovery.discover().await.is_empty());
    }
}
