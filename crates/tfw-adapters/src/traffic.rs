use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use tfw_core::{GeoPoint, TrafficObservation};
use tfw_storage::HttpFetcher;
use tracing::{error, info_span, Instrument};
use url::Url;

use crate::{ExtractError, TrafficSource};

pub const DEFAULT_FLOW_ENDPOINT: &str =
    "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json";

#[derive(Debug, Default, Deserialize)]
struct FlowEnvelope {
    #[serde(rename = "flowSegmentData", default)]
    flow_segment_data: FlowSegment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowSegment {
    current_speed: Option<f64>,
    free_flow_speed: Option<f64>,
    confidence: Option<f64>,
}

/// Turn a flow-segment response body into one observation.
///
/// A body without `flowSegmentData` still yields a record (all speeds unknown,
/// score 0); only undecodable JSON is an error.
pub fn extract_flow(
    body: &[u8],
    point: GeoPoint,
    observed_at: DateTime<Utc>,
) -> Result<TrafficObservation, ExtractError> {
    let envelope: FlowEnvelope = serde_json::from_slice(body)?;
    let flow = envelope.flow_segment_data;
    Ok(TrafficObservation::from_flow(
        observed_at.trunc_subsecs(0),
        point,
        flow.current_speed,
        flow.free_flow_speed,
        flow.confidence,
    ))
}

#[derive(Debug, Clone)]
pub struct TrafficApiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub point: GeoPoint,
    pub timeout: Duration,
}

/// Flow-segment API client: one attempt, fixed timeout, empty result on any failure.
#[derive(Debug, Clone)]
pub struct TrafficAdapter {
    http: Arc<HttpFetcher>,
    config: TrafficApiConfig,
}

impl TrafficAdapter {
    pub fn new(http: Arc<HttpFetcher>, config: TrafficApiConfig) -> Self {
        Self { http, config }
    }

    pub fn request_url(&self) -> Result<Url, url::ParseError> {
        let point = format!("{},{}", self.config.point.lat, self.config.point.lon);
        Url::parse_with_params(
            &self.config.endpoint,
            &[
                ("point", point.as_str()),
                ("unit", "KMPH"),
                ("key", self.config.api_key.as_str()),
            ],
        )
    }

    fn redact(&self, text: &str) -> String {
        if self.config.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.config.api_key, "***")
    }
}

#[async_trait]
impl TrafficSource for TrafficAdapter {
    async fn fetch_current(&self) -> Vec<TrafficObservation> {
        let url = match self.request_url() {
            Ok(url) => url,
            Err(err) => {
                error!(error = %err, "cannot build flow-segment request url");
                return Vec::new();
            }
        };

        let span = info_span!("traffic_fetch", lat = self.config.point.lat, lon = self.config.point.lon);
        async {
            let resp = match self.http.fetch_direct(url.as_str(), self.config.timeout).await {
                Ok(resp) => resp,
                Err(err) => {
                    error!(error = %self.redact(&err.to_string()), "flow-segment request failed");
                    return Vec::new();
                }
            };
            match extract_flow(&resp.body, self.config.point, Utc::now()) {
                Ok(record) => vec![record],
                Err(err) => {
                    error!(error = %err, "flow-segment response could not be decoded");
                    Vec::new()
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tfw_storage::{HttpClientConfig, StaticEndpointPool};

    fn point() -> GeoPoint {
        GeoPoint::new(50.6685, 17.9375)
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 7, 0, 0).single().unwrap()
    }

    #[test]
    fn flow_with_all_fields() {
        let body = br#"{"flowSegmentData":{"currentSpeed":20,"freeFlowSpeed":50,"confidence":0.9,"frc":"FRC2"}}"#;
        let obs = extract_flow(body, point(), at()).unwrap();
        assert!((obs.jam_factor - 6.0).abs() < 1e-9);
        assert_eq!(obs.confidence, 0.9);
        assert_eq!(obs.current_speed, Some(20.0));
        assert_eq!(obs.free_flow_speed, Some(50.0));
        assert_eq!(obs.provider, "tomtom_flow");
    }

    #[test]
    fn null_current_speed_uses_substitute() {
        let body = br#"{"flowSegmentData":{"currentSpeed":null,"freeFlowSpeed":40}}"#;
        let obs = extract_flow(body, point(), at()).unwrap();
        assert!((obs.jam_factor - 9.975).abs() < 1e-9);
        assert_eq!(obs.confidence, 0.0);
    }

    #[test]
    fn missing_segment_still_produces_a_zero_score_record() {
        let obs = extract_flow(b"{}", point(), at()).unwrap();
        assert_eq!(obs.jam_factor, 0.0);
        assert_eq!(obs.current_speed, None);
    }

    #[test]
    fn malformed_json_is_an_extract_error() {
        assert!(matches!(
            extract_flow(b"<html>rate limited</html>", point(), at()),
            Err(ExtractError::Json(_))
        ));
    }

    #[test]
    fn request_url_carries_point_unit_and_key() {
        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig::default(), Arc::new(StaticEndpointPool::empty())).unwrap(),
        );
        let adapter = TrafficAdapter::new(
            http,
            TrafficApiConfig {
                endpoint: DEFAULT_FLOW_ENDPOINT.to_string(),
                api_key: "secret-key".to_string(),
                point: point(),
                timeout: Duration::from_secs(10),
            },
        );
        let url = adapter.request_url().unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("point".to_string(), "50.6685,17.9375".to_string()),
                ("unit".to_string(), "KMPH".to_string()),
                ("key".to_string(), "secret-key".to_string()),
            ]
        );
        assert!(!adapter.redact(url.as_str()).contains("secret-key"));
    }
}
