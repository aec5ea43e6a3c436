//! Participant endpoint resolution with a per-FSP cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use fspiop::EndpointType;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::NotifierError;
use crate::kernel::EndpointLookup;
use crate::span::TraceSpan;

#[derive(Debug, Deserialize)]
struct EndpointRecord {
    #[serde(rename = "type")]
    endpoint_type: String,
    value: String,
}

#[derive(Debug, Clone)]
struct CachedEndpoints {
    fetched_at: Instant,
    by_type: HashMap<String, String>,
}

/// Reads `GET {switch}/participants/{fsp}/endpoints` and caches the answer.
pub struct CachedEndpointLookup {
    client: reqwest::Client,
    base_url: Url,
    expires_in: Duration,
    cache: DashMap<String, CachedEndpoints>,
}

impl CachedEndpointLookup {
    pub fn new(
        base_url: &str,
        expires_in: Duration,
        request_timeout: Duration,
    ) -> Result<Self, NotifierError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| NotifierError::internal_from(format!("invalid switch endpoint {}", base_url), e))?;
        if base_url.cannot_be_a_base() {
            return Err(NotifierError::internal(format!(
                "switch endpoint {} cannot be a base URL",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotifierError::internal_from("failed to build endpoint lookup client", e))?;

        Ok(Self {
            client,
            base_url,
            expires_in,
            cache: DashMap::new(),
        })
    }

    fn endpoints_url(&self, fsp: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["participants", fsp, "endpoints"]);
        }
        url
    }

    fn cached(&self, fsp: &str) -> Option<CachedEndpoints> {
        let entry = self.cache.get(fsp)?;
        if entry.fetched_at.elapsed() < self.expires_in {
            Some(entry.clone())
        } else {
            None
        }
    }

    async fn fetch(
        &self,
        fsp: &str,
        endpoint_type: EndpointType,
    ) -> Result<CachedEndpoints, NotifierError> {
        let url = self.endpoints_url(fsp);
        debug!(fsp = %fsp, url = %url, "fetching participant endpoints");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NotifierError::lookup_from(fsp, endpoint_type, "request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifierError::lookup(
                fsp,
                endpoint_type,
                format!("switch answered {}", status),
            ));
        }

        let records: Vec<EndpointRecord> = response.json().await.map_err(|e| {
            NotifierError::lookup_from(fsp, endpoint_type, "unreadable endpoint list", e)
        })?;

        let entry = CachedEndpoints {
            fetched_at: Instant::now(),
            by_type: records
                .into_iter()
                .map(|r| (r.endpoint_type, r.value))
                .collect(),
        };
        self.cache.insert(fsp.to_string(), entry.clone());
        Ok(entry)
    }
}

/// Fill `{{fsp}}` and `{{transferId}}` placeholders.
pub fn render_endpoint(template: &str, fsp: &str, transfer_id: &str) -> String {
    template
        .replace("{{fsp}}", fsp)
        .replace("{{transferId}}", transfer_id)
}

#[async_trait]
impl EndpointLookup for CachedEndpointLookup {
    async fn get_endpoint(
        &self,
        fsp: &str,
        endpoint_type: EndpointType,
        transfer_id: &str,
        span: &TraceSpan,
    ) -> Result<String, NotifierError> {
        let endpoints = match self.cached(fsp) {
            Some(hit) => hit,
            None => self.fetch(fsp, endpoint_type).await?,
        };

        let template = endpoints
            .by_type
            .get(endpoint_type.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| NotifierError::lookup(fsp, endpoint_type, "no endpoint registered"))?;

        let url = render_endpoint(template, fsp, transfer_id);
        debug!(
            fsp = %fsp,
            endpoint_type = %endpoint_type,
            trace_id = %span.trace_id(),
            url = %url,
            "resolved callback endpoint"
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_endpoint() {
        assert_eq!(
            render_endpoint("http://dfspb.local/{{fsp}}/transfers/{{transferId}}/error", "dfspB", "abc-123"),
            "http://dfspb.local/dfspB/transfers/abc-123/error"
        );
    }

    #[test]
    fn test_endpoints_url_keeps_base_path() {
        let lookup = CachedEndpointLookup::new(
            "http://central-ledger:3001/api/",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            lookup.endpoints_url("dfspB").as_str(),
            "http://central-ledger:3001/api/participants/dfspB/endpoints"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(CachedEndpointLookup::new("not a url", Duration::ZERO, Duration::ZERO).is_err());
    }
}
