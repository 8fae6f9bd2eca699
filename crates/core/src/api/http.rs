use crate::api::{
    normalize_records, Envelope, FetchError, RecommendationApi, RefreshAllOutcome, Scope,
    WatchlistAction,
};
use crate::config::Settings;
use crate::domain::RecommendationRecord;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const RECOMMENDATIONS_PATH: &str = "recommendations/";
const REFRESH_PATH: &str = "recommendations/refresh/";
const REFRESH_ALL_PATH: &str = "recommendations/refresh-all/";
const WATCHLIST_TOGGLE_PATH: &str = "watchlist/toggle/";

const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Debug, Clone)]
pub struct HttpRecommendationApi {
    http: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
    refresh_all_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SymbolBody<'a> {
    symbol: &'a str,
}

#[derive(Debug, Serialize)]
struct FilterBody {
    filter: Scope,
}

impl HttpRecommendationApi {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_api_base_url()?.to_string();
        Self::new(
            base_url,
            settings.csrf_token.clone(),
            settings.http_timeout,
            settings.refresh_all_timeout,
        )
    }

    pub fn new(
        base_url: String,
        csrf_token: Option<String>,
        timeout: Duration,
        refresh_all_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build recommendation api http client")?;

        Ok(Self {
            http,
            base_url,
            csrf_token,
            refresh_all_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn csrf_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.csrf_token {
            match HeaderValue::from_str(token) {
                Ok(value) => {
                    headers.insert(CSRF_HEADER, value);
                }
                Err(_) => tracing::warn!("CSRF token is not a valid header value; sending without it"),
            }
        }
        headers
    }

    async fn send_post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let res = req.headers(self.csrf_headers()).send().await?;
        let status = res.status();
        let text = res.text().await?;
        Ok((status, text))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Envelope<Value>, FetchError> {
        let (status, text) = self.send_post(path, body, None).await?;
        decode_envelope(status, &text)
    }
}

#[async_trait::async_trait]
impl RecommendationApi for HttpRecommendationApi {
    async fn fetch_records(&self, scope: Scope) -> Result<Vec<RecommendationRecord>, FetchError> {
        let res = self
            .http
            .get(self.url(RECOMMENDATIONS_PATH))
            .query(&[("filter", scope.as_query())])
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;

        let envelope =
            decode_envelope(status, &text)?.into_success("Failed to fetch recommendations")?;

        let records = match envelope.data {
            Some(data) => parse_records(data)?,
            None => Vec::new(),
        };
        tracing::debug!(%scope, records = records.len(), "fetched recommendations");
        Ok(records)
    }

    async fn refresh_symbol(&self, symbol: &str) -> Result<(), FetchError> {
        self.post(REFRESH_PATH, &SymbolBody { symbol })
            .await?
            .into_success("Failed to refresh recommendation")?;
        Ok(())
    }

    async fn refresh_all(&self, scope: Scope) -> Result<RefreshAllOutcome, FetchError> {
        let sent = self
            .send_post(
                REFRESH_ALL_PATH,
                &FilterBody { filter: scope },
                Some(self.refresh_all_timeout),
            )
            .await;

        let (status, text) = match sent {
            Ok(v) => v,
            // The backend keeps working after the client gives up.
            Err(err) if err.is_timeout() => {
                tracing::warn!(%scope, "refresh-all timed out; backend continues in background");
                return Ok(RefreshAllOutcome::TimedOut);
            }
            Err(err) => return Err(err.into()),
        };

        decode_envelope(status, &text)?.into_success("Failed to refresh recommendations")?;
        Ok(RefreshAllOutcome::Completed)
    }

    async fn toggle_watchlist(&self, symbol: &str) -> Result<WatchlistAction, FetchError> {
        let envelope = self
            .post(WATCHLIST_TOGGLE_PATH, &SymbolBody { symbol })
            .await?
            .into_success("Failed to update watchlist")?;

        envelope
            .action
            .ok_or_else(|| FetchError::Backend("Watchlist response is missing action".to_string()))
    }
}

fn decode_envelope(status: StatusCode, text: &str) -> Result<Envelope<Value>, FetchError> {
    if !status.is_success() {
        return Err(FetchError::Network(status_error_message(status, text)));
    }

    serde_json::from_str::<Envelope<Value>>(text).map_err(|err| {
        tracing::debug!(error = %err, body = %text, "unexpected response shape");
        FetchError::Network("Unexpected response from server".to_string())
    })
}

fn parse_records(data: Value) -> Result<Vec<RecommendationRecord>, FetchError> {
    let Value::Array(items) = data else {
        return Err(FetchError::Network(
            "Unexpected response from server".to_string(),
        ));
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<RecommendationRecord>(item) {
            Ok(record) => out.push(record),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed recommendation record");
            }
        }
    }
    Ok(normalize_records(out))
}

/// Error text for a non-2xx answer: the JSON `message` when there is one.
fn status_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Server error: {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> HttpRecommendationApi {
        HttpRecommendationApi::new(
            base.to_string(),
            Some("token".to_string()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn joins_urls_without_double_slashes() {
        assert_eq!(
            client("http://localhost:8000/api/").url(RECOMMENDATIONS_PATH),
            "http://localhost:8000/api/recommendations/"
        );
        assert_eq!(
            client("http://localhost:8000/api").url("/watchlist/toggle/"),
            "http://localhost:8000/api/watchlist/toggle/"
        );
    }

    #[test]
    fn mutating_requests_carry_csrf_header() {
        let headers = client("http://x").csrf_headers();
        assert_eq!(headers.get(CSRF_HEADER).unwrap(), "token");
    }

    #[test]
    fn status_errors_use_json_message_when_available() {
        assert_eq!(
            status_error_message(StatusCode::BAD_REQUEST, r#"{"message": "Invalid filter"}"#),
            "Invalid filter"
        );
        assert_eq!(
            status_error_message(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>"),
            "Server error: 500"
        );
    }

    #[test]
    fn decode_envelope_maps_status_and_shape_errors() {
        let err = decode_envelope(StatusCode::NOT_FOUND, "").unwrap_err();
        assert_eq!(err, FetchError::Network("Server error: 404".to_string()));

        let err = decode_envelope(StatusCode::OK, "not json").unwrap_err();
        assert_eq!(err.kind(), "network");

        let ok = decode_envelope(StatusCode::OK, r#"{"success": true, "data": []}"#).unwrap();
        assert!(ok.success);
    }

    #[test]
    fn parse_records_skips_malformed_items() {
        let data = json!([
            {"symbol": "NBL", "predicted_price": 260, "current_price": 240, "last_updated": "2024-01-01", "recommendation": 1},
            {"predicted_price": 10},
            {"symbol": "SCB", "predicted_price": null}
        ]);
        let records = parse_records(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, "NBL");
        assert_eq!(records[1].symbol, "SCB");
    }

    #[test]
    fn parse_records_keeps_records_with_odd_signal_fields() {
        let data = json!([
            {"symbol": "NBL", "predicted_price": 260, "current_price": 240, "last_updated": "2024-01-01", "recommendation": 1, "signal": 1},
            {"symbol": "HBL", "predicted_price": 90, "current_price": 100, "last_updated": "2024-01-01", "recommendation": true},
            {"symbol": "SCB", "predicted_price": null}
        ]);
        let records = parse_records(data).unwrap();
        let symbols: Vec<_> = records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NBL", "HBL", "SCB"]);

        let counts = crate::kpi::compute_counts(&records);
        assert_eq!(counts.total, 3);
        assert_eq!((counts.buy, counts.sell, counts.hold), (1, 0, 0));
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn parse_records_rejects_non_array_data() {
        assert!(parse_records(json!({"symbol": "NBL"})).is_err());
    }
}
