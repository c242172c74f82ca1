//! Resilient client for the Deadlock API.
//!
//! Transient failures (timeouts, transport errors, 429/5xx) are retried with
//! linear backoff; any other non-2xx status or an unparseable body is
//! permanent and returned immediately. A pacing sleep follows every
//! successful call so batch jobs do not hammer the API.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::util::env as env_util;

/// Cap on response-body text carried inside error values and logs.
const BODY_SNIPPET_MAX: usize = 2000;

/// Truncate for logging without splitting a UTF-8 code point.
pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(
        "request to {endpoint} failed after {attempts} attempts \
         (last status {last_status:?}, last error {last_error}): {body_snippet}"
    )]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
        body_snippet: String,
    },
    #[error("request to {endpoint} failed permanently (status {status:?}): {detail}: {body_snippet}")]
    Permanent {
        endpoint: String,
        status: Option<u16>,
        detail: String,
        body_snippet: String,
    },
}

/// One entry in the esports match listing.
#[derive(Debug, Clone, Deserialize)]
pub struct EsportsMatch {
    pub match_id: i64,
    pub status: String,
}

/// Per-match metadata; the API omits whole sections for short or degenerate
/// matches, so everything below the top level defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub match_info: MatchInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchInfo {
    #[serde(default)]
    pub players: Vec<MatchPlayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchPlayer {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<ItemEvent>,
}

/// A raw timeline event; despite the endpoint name these cover both shop
/// purchases and ability unlocks, distinguished downstream by id lookup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemEvent {
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub game_time_s: i64,
    #[serde(default)]
    pub sold_time_s: i64,
    #[serde(default)]
    pub upgrade_id: i64,
    #[serde(default)]
    pub imbued_ability_id: i64,
}

/// One match summary from a player's history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub match_id: i64,
    pub start_time: i64,
    pub match_duration_s: i64,
    pub player_kills: i64,
    pub player_deaths: i64,
    pub player_assists: i64,
    pub net_worth: i64,
    pub player_team: i64,
    pub match_result: i64,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub sleep: Duration,
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_util::env_parse(
                "DEADLOCK_API_BASE_URL",
                "https://api.deadlock-api.com".to_string(),
            ),
            timeout: Duration::from_secs_f64(env_util::env_parse("DEADLOCK_API_TIMEOUT_S", 15.0)),
            sleep: Duration::from_secs_f64(env_util::env_parse("DEADLOCK_API_SLEEP_S", 1.0)),
            max_retries: env_util::env_parse("DEADLOCK_API_MAX_RETRIES", 3u32),
        }
    }
}

pub struct DeadlockClient {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    sleep: Duration,
    max_retries: u32,
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

impl DeadlockClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeout: config.timeout,
            sleep: config.sleep,
            max_retries: config.max_retries.max(1),
        }
    }

    /// Matches from the esports listing, newest first as the API returns them.
    pub async fn esports_matches(&self) -> Result<Vec<EsportsMatch>, FetchError> {
        self.get_json("/v1/esports/matches", &[]).await
    }

    /// Full metadata for one match, including per-player timeline events.
    pub async fn match_metadata(&self, match_id: i64) -> Result<MatchMetadata, FetchError> {
        self.get_json(&format!("/v1/matches/{match_id}/metadata"), &[])
            .await
    }

    /// A player's match history. `only_stored_history` restricts the API to
    /// its own store instead of reaching out to the game backend.
    pub async fn player_match_history(
        &self,
        account_id: i64,
        only_stored_history: bool,
    ) -> Result<Vec<HistoryEntry>, FetchError> {
        let only = if only_stored_history { "true" } else { "false" };
        self.get_json(
            &format!("/v1/players/{account_id}/match-history"),
            &[("only_stored_history", only)],
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        let mut last_status: Option<u16> = None;
        let mut last_error = String::new();
        let mut body_snippet = String::new();

        loop {
            attempt += 1;
            match self
                .http
                .get(&url)
                .query(params)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = match response.text().await {
                            Ok(body) => body,
                            Err(err) => {
                                last_status = Some(status.as_u16());
                                last_error = err.to_string();
                                body_snippet.clear();
                                warn!(endpoint = path, attempt, error = %err, "body read failed");
                                if attempt >= self.max_retries {
                                    return Err(FetchError::RetriesExhausted {
                                        endpoint: path.to_string(),
                                        attempts: attempt,
                                        last_status,
                                        last_error,
                                        body_snippet,
                                    });
                                }
                                tokio::time::sleep(self.sleep * attempt).await;
                                continue;
                            }
                        };
                        return match serde_json::from_str(&body) {
                            Ok(parsed) => {
                                tokio::time::sleep(self.sleep).await;
                                Ok(parsed)
                            }
                            Err(err) => Err(FetchError::Permanent {
                                endpoint: path.to_string(),
                                status: Some(status.as_u16()),
                                detail: format!("response did not parse: {err}"),
                                body_snippet: truncate_for_log(&body, BODY_SNIPPET_MAX),
                            }),
                        };
                    }

                    let body = response.text().await.unwrap_or_default();
                    let snippet = truncate_for_log(&body, BODY_SNIPPET_MAX);
                    if is_transient_status(status) {
                        last_status = Some(status.as_u16());
                        last_error = format!("status {status}");
                        body_snippet = snippet;
                        warn!(
                            endpoint = path,
                            attempt,
                            status = status.as_u16(),
                            "transient failure"
                        );
                    } else {
                        return Err(FetchError::Permanent {
                            endpoint: path.to_string(),
                            status: Some(status.as_u16()),
                            detail: format!("unexpected status {status}"),
                            body_snippet: snippet,
                        });
                    }
                }
                Err(err) => {
                    last_error = err.to_string();
                    body_snippet.clear();
                    warn!(endpoint = path, attempt, error = %err, "transport failure");
                }
            }

            if attempt >= self.max_retries {
                return Err(FetchError::RetriesExhausted {
                    endpoint: path.to_string(),
                    attempts: attempt,
                    last_status,
                    last_error,
                    body_snippet,
                });
            }
            tokio::time::sleep(self.sleep * attempt).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> DeadlockClient {
        DeadlockClient::new(ClientConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            sleep: Duration::from_millis(1),
            max_retries: 3,
        })
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("short", 100), "short");
        // "é" is two bytes; cutting at 1 must back off to the boundary.
        assert_eq!(truncate_for_log("é", 1), "…");
        assert_eq!(truncate_for_log("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn persistent_503_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/esports/matches"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .esports_matches()
            .await
            .unwrap_err();
        match err {
            FetchError::RetriesExhausted {
                attempts,
                last_status,
                ref body_snippet,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(503));
                assert_eq!(body_snippet, "overloaded");
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/esports/matches"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/esports/matches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"match_id": 1, "status": "Completed"}
            ])))
            .mount(&server)
            .await;

        let matches = test_client(&server.uri()).esports_matches().await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_id, 1);
    }

    #[tokio::test]
    async fn not_found_is_permanent_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/matches/99/metadata"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such match"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .match_metadata(99)
            .await
            .unwrap_err();
        match err {
            FetchError::Permanent { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("expected Permanent, got {other}"),
        }
    }

    #[tokio::test]
    async fn unparseable_success_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/esports/matches"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .esports_matches()
            .await
            .unwrap_err();
        match err {
            FetchError::Permanent {
                status,
                ref body_snippet,
                ..
            } => {
                assert_eq!(status, Some(200));
                assert_eq!(body_snippet, "not json");
            }
            other => panic!("expected Permanent, got {other}"),
        }
    }

    #[tokio::test]
    async fn history_sends_only_stored_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/players/10/match-history"))
            .and(query_param("only_stored_history", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "match_id": 5, "start_time": 1_700_000_000, "match_duration_s": 1800,
                    "player_kills": 3, "player_deaths": 1, "player_assists": 7,
                    "net_worth": 21_000, "player_team": 0, "match_result": 0
                }
            ])))
            .mount(&server)
            .await;

        let entries = test_client(&server.uri())
            .player_match_history(10, false)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].match_id, 5);
        assert_eq!(entries[0].net_worth, 21_000);
    }
}
