//! Attack events read from an Elasticsearch-compatible search backend.

use crate::config::SourceConfig;
use crate::core::{AlarmBatch, EventRecord};
use crate::source::{AlarmSource, SourceError, TimeWindow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<Total>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// Newer backends report `{"value": n, "relation": ".."}`, older ones a bare
/// integer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Total {
    Count(i64),
    Object { value: i64 },
}

impl Total {
    fn value(&self) -> i64 {
        match self {
            Total::Count(n) | Total::Object { value: n } => *n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: EventRecord,
}

pub struct SearchAlarmSource {
    client: reqwest::Client,
    base_url: String,
    index_prefix: String,
    timestamp_field: String,
}

impl SearchAlarmSource {
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.search_url.trim_end_matches('/').to_string(),
            index_prefix: config.index_prefix.clone(),
            timestamp_field: config.timestamp_field.clone(),
        })
    }

    fn search_url(&self, app_id: &str) -> String {
        format!("{}/{}-{}/_search", self.base_url, self.index_prefix, app_id)
    }

    fn query_body(&self, window: TimeWindow, page: u32, page_size: u32) -> Value {
        let field = &self.timestamp_field;
        json!({
            "query": {
                "bool": {
                    "filter": [
                        { "range": { field: { "gte": window.from_ms, "lt": window.until_ms } } }
                    ]
                }
            },
            "sort": [ { field: { "order": "desc" } } ],
            "from": page.saturating_sub(1).saturating_mul(page_size),
            "size": page_size,
            "track_total_hits": true
        })
    }
}

#[async_trait]
impl AlarmSource for SearchAlarmSource {
    #[instrument(skip(self, window), fields(window = %window))]
    async fn query_attack_events(
        &self,
        app_id: &str,
        window: TimeWindow,
        page: u32,
        page_size: u32,
    ) -> Result<AlarmBatch, SourceError> {
        let failed = |reason: String| SourceError::QueryFailed {
            app_id: app_id.to_string(),
            reason,
        };

        let response = self
            .client
            .post(self.search_url(app_id))
            .json(&self.query_body(window, page, page_size))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("status {}: {}", status.as_u16(), body)));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| SourceError::Decode {
            what: format!("search response for app {}", app_id),
            reason: e.to_string(),
        })?;

        let records: Vec<EventRecord> = parsed.hits.hits.into_iter().map(|hit| hit.source).collect();
        let total = parsed
            .hits
            .total
            .map(|t| t.value())
            .unwrap_or(records.len() as i64);
        debug!(total, sampled = records.len(), "Attack event query finished");
        Ok(AlarmBatch::new(total, records))
    }
}
