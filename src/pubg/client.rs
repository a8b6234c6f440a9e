use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::db::models::{MatchCategory, MatchRecord, MatchSummary, ParticipantStats};
use crate::roster::TrackedPlayer;

use super::limiter::{RateLimiter, RetryPolicy, MAX_RETRY_AFTER};
use super::transport::{ApiResponse, ApiTransport};
use super::{FetchError, FetchOutcome, MatchSource};

/// Client for the PUBG players and matches endpoints.
///
/// Every request passes through one shared [`RateLimiter`]; transient failures
/// are retried with exponential backoff.
#[derive(Clone)]
pub struct PubgClient {
    transport: Arc<dyn ApiTransport>,
    base_url: String,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    /// Lower-cased roster names; their stats are collected from every match.
    tracked_names: Arc<RwLock<Vec<String>>>,
}

enum Fetched {
    Body(Value),
    NotFound(u16),
}

enum Disposition {
    Success,
    NotFound,
    Transient,
}

fn classify_status(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::Transient,
        400..=499 => Disposition::NotFound,
        _ => Disposition::Transient,
    }
}

impl PubgClient {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        base_url: &str,
        poll: &PollConfig,
        roster: &[TrackedPlayer],
    ) -> Self {
        PubgClient {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::new(poll.request_delay)),
            policy: RetryPolicy::new(poll.request_delay, poll.max_retries),
            tracked_names: Arc::new(RwLock::new(lowercase_names(roster))),
        }
    }

    /// `base_url` with `segments` appended, each percent-encoded as one path
    /// segment.
    fn endpoint(&self, segments: &[&str], context: &str) -> Result<url::Url, FetchError> {
        let bad_url = |reason: String| FetchError::Decode {
            context: context.to_string(),
            reason,
        };
        let mut url =
            url::Url::parse(&self.base_url).map_err(|e| bad_url(format!("bad base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| bad_url(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn players_url(&self, player: &TrackedPlayer, context: &str) -> Result<String, FetchError> {
        let mut url = self.endpoint(&["shards", player.platform.as_str(), "players"], context)?;
        url.query_pairs_mut()
            .append_pair("filter[playerNames]", &player.name);
        Ok(url.into())
    }

    fn match_url(
        &self,
        player: &TrackedPlayer,
        match_id: &str,
        context: &str,
    ) -> Result<String, FetchError> {
        self.endpoint(&["shards", player.platform.as_str(), "matches", match_id], context)
            .map(String::from)
    }

    /// GET with limiter + retry. Non-429 4xx is reported as `NotFound`.
    async fn get_json(&self, url: &str, context: &str) -> Result<Fetched, FetchError> {
        let mut retry = 0u32;
        loop {
            self.limiter.acquire().await;
            debug!("GET {}", url);

            let (reason, server_wait) = match self.transport.get(url).await {
                Ok(resp) => {
                    log_rate_limit(&resp);
                    match classify_status(resp.status) {
                        Disposition::Success => {
                            return serde_json::from_str(&resp.body).map(Fetched::Body).map_err(
                                |e| FetchError::Decode {
                                    context: context.to_string(),
                                    reason: e.to_string(),
                                },
                            );
                        }
                        Disposition::NotFound => return Ok(Fetched::NotFound(resp.status)),
                        Disposition::Transient => {
                            (format!("HTTP {}", resp.status), resp.retry_after)
                        }
                    }
                }
                Err(e) => (e.to_string(), None),
            };

            if retry >= self.policy.max_retries {
                return Err(FetchError::Transient {
                    context: context.to_string(),
                    attempts: retry + 1,
                    reason,
                });
            }
            retry += 1;

            let mut wait = self.policy.backoff(retry);
            if let Some(server_wait) = server_wait {
                wait = wait.max(server_wait.min(MAX_RETRY_AFTER));
            }
            warn!(
                "{} failed ({}), retrying in {:?} ({}/{})",
                context, reason, wait, retry, self.policy.max_retries
            );
            tokio::time::sleep(wait).await;
        }
    }

    fn wants_stats_for(&self, participant: &str, player: &TrackedPlayer) -> bool {
        let name = participant.to_lowercase();
        if name == player.name.to_lowercase() {
            return true;
        }
        match self.tracked_names.read() {
            Ok(names) => names.contains(&name),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl MatchSource for PubgClient {
    async fn fetch_latest_match(&self, player: &TrackedPlayer) -> Result<FetchOutcome, FetchError> {
        let context = format!("player '{}'", player);
        let url = self.players_url(player, &context)?;

        let raw = match self.get_json(&url, &context).await? {
            Fetched::Body(v) => v,
            Fetched::NotFound(status) => {
                info!("Player {} not found (HTTP {})", player, status);
                return Ok(FetchOutcome::NotFound);
            }
        };

        let Some(match_id) = latest_match_id(&raw) else {
            info!("No recent matches for {}", player);
            return Ok(FetchOutcome::NotFound);
        };
        debug!("Latest match for {}: {}", player, match_id);

        let match_context = format!("match {}", short_id(&match_id));
        let url = self.match_url(player, &match_id, &match_context)?;
        let raw = match self.get_json(&url, &match_context).await?
        {
            Fetched::Body(v) => v,
            Fetched::NotFound(status) => {
                warn!("Match {} for {} unavailable (HTTP {})", match_id, player, status);
                return Ok(FetchOutcome::NotFound);
            }
        };

        let (summary, played_at) = parse_match(&raw, |name| self.wants_stats_for(name, player))
            .map_err(|reason| FetchError::Decode {
                context: match_context,
                reason,
            })?;

        Ok(FetchOutcome::Found(MatchRecord {
            match_id,
            player: player.clone(),
            played_at,
            summary,
        }))
    }

    fn roster_changed(&self, roster: &[TrackedPlayer]) {
        match self.tracked_names.write() {
            Ok(mut names) => *names = lowercase_names(roster),
            Err(_) => warn!("Tracked name list lock poisoned, keeping the old roster"),
        }
    }
}

fn lowercase_names(roster: &[TrackedPlayer]) -> Vec<String> {
    roster.iter().map(|p| p.name.to_lowercase()).collect()
}

fn log_rate_limit(resp: &ApiResponse) {
    if let Some(remaining) = resp.rate_limit_remaining {
        let limit = resp
            .rate_limit_limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".into());
        debug!("Rate limit: {}/{} remaining", remaining, limit);
        if remaining < 3 {
            warn!("Only {} PUBG API requests left in this window", remaining);
        }
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

/// First match id listed for the first player in a players response.
fn latest_match_id(raw: &Value) -> Option<String> {
    raw["data"]
        .as_array()?
        .first()?["relationships"]["matches"]["data"]
        .as_array()?
        .first()?["id"]
        .as_str()
        .map(str::to_string)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStats {
    name: String,
    win_place: u32,
    kills: u32,
    damage_dealt: f64,
    assists: u32,
    #[serde(rename = "DBNOs")]
    dbnos: u32,
    headshot_kills: u32,
    longest_kill: f64,
    revives: u32,
    heals: u32,
    boosts: u32,
    walk_distance: f64,
    ride_distance: f64,
    swim_distance: f64,
    time_survived: f64,
    death_type: String,
}

impl From<RawStats> for ParticipantStats {
    fn from(r: RawStats) -> Self {
        ParticipantStats {
            name: r.name,
            win_place: r.win_place,
            kills: r.kills,
            damage_dealt: r.damage_dealt,
            assists: r.assists,
            dbnos: r.dbnos,
            headshot_kills: r.headshot_kills,
            longest_kill: r.longest_kill,
            revives: r.revives,
            heals: r.heals,
            boosts: r.boosts,
            walk_distance: r.walk_distance,
            ride_distance: r.ride_distance,
            swim_distance: r.swim_distance,
            time_survived_secs: r.time_survived,
            death_type: r.death_type,
        }
    }
}

/// Build a summary from a match response, keeping participants accepted by
/// `keep`.
fn parse_match(
    raw: &Value,
    keep: impl Fn(&str) -> bool,
) -> Result<(MatchSummary, Option<DateTime<Utc>>), String> {
    let attrs = &raw["data"]["attributes"];
    if !attrs.is_object() {
        return Err("response has no data.attributes".into());
    }

    let game_mode = attrs["gameMode"].as_str().unwrap_or("Unknown").to_string();
    let match_type = attrs["matchType"].as_str().unwrap_or("Unknown").to_string();
    let is_custom = attrs["isCustomMatch"].as_bool().unwrap_or(false);
    let map_name = attrs["mapName"].as_str().unwrap_or("Unknown").to_string();
    let duration_secs = attrs["duration"].as_u64().unwrap_or(0);
    let played_at = attrs["createdAt"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let participants = raw["included"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item["type"] == "participant")
                .filter_map(|item| {
                    serde_json::from_value::<RawStats>(item["attributes"]["stats"].clone()).ok()
                })
                .filter(|stats| keep(&stats.name))
                .map(ParticipantStats::from)
                .collect()
        })
        .unwrap_or_default();

    let category = MatchCategory::classify(&game_mode, &match_type, is_custom);
    Ok((
        MatchSummary {
            game_mode,
            match_type,
            is_custom,
            map_name,
            duration_secs,
            category,
            participants,
        },
        played_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubg::transport::TransportError;
    use crate::roster::Platform;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    type Scripted = Result<ApiResponse, TransportError>;

    /// Replays canned responses and records when each request was made.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }

        fn urls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
        }
    }

    #[async_trait]
    impl ApiTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<ApiResponse, TransportError> {
            self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".into())))
        }
    }

    fn ok(body: Value) -> Scripted {
        Ok(ApiResponse {
            status: 200,
            body: body.to_string(),
            ..Default::default()
        })
    }

    fn status(code: u16) -> Scripted {
        Ok(ApiResponse {
            status: code,
            ..Default::default()
        })
    }

    fn players_body(match_id: &str) -> Value {
        json!({
            "data": [{
                "type": "player",
                "attributes": { "name": "Alice" },
                "relationships": { "matches": { "data": [
                    { "type": "match", "id": match_id },
                    { "type": "match", "id": "older" }
                ]}}
            }]
        })
    }

    fn match_body() -> Value {
        json!({
            "data": { "attributes": {
                "gameMode": "squad-fpp",
                "matchType": "official",
                "isCustomMatch": false,
                "mapName": "Desert_Main",
                "duration": 1834,
                "createdAt": "2026-10-14T18:30:00Z"
            }},
            "included": [
                { "type": "participant", "attributes": { "stats": {
                    "name": "Alice", "winPlace": 3, "kills": 5, "damageDealt": 612.4,
                    "DBNOs": 4, "headshotKills": 2, "timeSurvived": 1500.0
                }}},
                { "type": "participant", "attributes": { "stats": {
                    "name": "bob", "winPlace": 3, "kills": 1, "damageDealt": 150.0
                }}},
                { "type": "participant", "attributes": { "stats": {
                    "name": "Stranger", "winPlace": 1, "kills": 9
                }}},
                { "type": "roster", "attributes": { "stats": { "rank": 3 } } }
            ]
        })
    }

    fn poll(delay_secs: u64, max_retries: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(300),
            request_delay: Duration::from_secs(delay_secs),
            max_retries,
        }
    }

    fn alice() -> TrackedPlayer {
        TrackedPlayer::new("Alice", Platform::Steam)
    }

    fn client(transport: Arc<ScriptedTransport>, poll: PollConfig) -> PubgClient {
        let roster = vec![alice(), TrackedPlayer::new("Bob", Platform::Steam)];
        PubgClient::new(transport, "https://api.test/", &poll, &roster)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_found_collects_tracked_participants() {
        let transport = ScriptedTransport::new(vec![ok(players_body("m-123")), ok(match_body())]);
        let client = client(transport.clone(), poll(1, 0));

        let outcome = client.fetch_latest_match(&alice()).await.unwrap();
        let FetchOutcome::Found(record) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(record.match_id, "m-123");
        assert_eq!(record.summary.map_name, "Desert_Main");
        assert_eq!(record.summary.category, MatchCategory::Normal { match_type: None });
        let names: Vec<&str> = record
            .summary
            .participants
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alice", "bob"]);
        assert_eq!(record.summary.participants[0].dbnos, 4);
        assert_eq!(
            record.played_at.map(|t| t.to_rfc3339()),
            Some("2026-10-14T18:30:00+00:00".to_string())
        );

        let urls = transport.urls();
        assert_eq!(
            urls[0],
            "https://api.test/shards/steam/players?filter%5BplayerNames%5D=Alice"
        );
        assert_eq!(urls[1], "https://api.test/shards/steam/matches/m-123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_id_is_escaped_in_path() {
        let transport =
            ScriptedTransport::new(vec![ok(players_body("a/b?c")), ok(match_body())]);
        let client = client(transport.clone(), poll(1, 0));
        client.fetch_latest_match(&alice()).await.unwrap();
        assert_eq!(
            transport.urls()[1],
            "https://api.test/shards/steam/matches/a%2Fb%3Fc"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_change_updates_collected_participants() {
        let transport = ScriptedTransport::new(vec![ok(players_body("m-9")), ok(match_body())]);
        let client = client(transport, poll(1, 0));
        client.roster_changed(&[alice(), TrackedPlayer::new("Stranger", Platform::Steam)]);

        let FetchOutcome::Found(record) = client.fetch_latest_match(&alice()).await.unwrap() else {
            panic!("expected a match");
        };
        let names: Vec<&str> = record
            .summary
            .participants
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alice", "Stranger"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_stops_during_backoff() {
        let transport = ScriptedTransport::new(vec![status(503), ok(players_body("m-1"))]);
        let client = client(transport.clone(), poll(30, 3));

        // gives up while the first retry is still sleeping off its 30s backoff
        let player = alice();
        tokio::select! {
            _ = client.fetch_latest_match(&player) => panic!("fetch should still be backing off"),
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_twice_then_succeeds_with_increasing_backoff() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError("connection reset".into())),
            status(503),
            ok(players_body("m-1")),
            ok(match_body()),
        ]);
        let client = client(transport.clone(), poll(1, 3));

        let outcome = client.fetch_latest_match(&alice()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Found(ref r) if r.match_id == "m-1"));

        let times = transport.call_times();
        // 3 players requests (2 retries) + 1 match request
        assert_eq!(times.len(), 4);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_secs(1));
        assert!(second_gap >= Duration::from_secs(2));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_transient_error() {
        let transport = ScriptedTransport::new(vec![status(500), status(502), status(504)]);
        let client = client(transport.clone(), poll(1, 2));

        let err = client.fetch_latest_match(&alice()).await.unwrap_err();
        match err {
            FetchError::Transient { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "HTTP 504");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_fails_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![status(500)]);
        let client = client(transport.clone(), poll(1, 0));
        assert!(client.fetch_latest_match(&alice()).await.is_err());
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_player_is_not_found() {
        let transport = ScriptedTransport::new(vec![status(404)]);
        let client = client(transport.clone(), poll(1, 3));
        let outcome = client.fetch_latest_match(&alice()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NotFound));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_is_retried_and_honours_retry_after() {
        let transport = ScriptedTransport::new(vec![
            Ok(ApiResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(60)),
                ..Default::default()
            }),
            ok(players_body("m-2")),
            ok(match_body()),
        ]);
        let client = client(transport.clone(), poll(1, 1));
        let outcome = client.fetch_latest_match(&alice()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Found(_)));
        let times = transport.call_times();
        assert!(times[1] - times[0] >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_without_matches_is_not_found() {
        let body = json!({ "data": [{ "relationships": { "matches": { "data": [] } } }] });
        let transport = ScriptedTransport::new(vec![ok(body)]);
        let client = client(transport, poll(1, 0));
        assert!(matches!(
            client.fetch_latest_match(&alice()).await.unwrap(),
            FetchOutcome::NotFound
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_decode_error() {
        let transport = ScriptedTransport::new(vec![Ok(ApiResponse {
            status: 200,
            body: "<html>".into(),
            ..Default::default()
        })]);
        let client = client(transport, poll(1, 0));
        assert!(matches!(
            client.fetch_latest_match(&alice()).await,
            Err(FetchError::Decode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_across_players() {
        let transport = ScriptedTransport::new(vec![
            status(404),
            status(404),
        ]);
        let client = client(transport.clone(), poll(7, 0));
        client.fetch_latest_match(&alice()).await.unwrap();
        client
            .fetch_latest_match(&TrackedPlayer::new("Bob", Platform::Steam))
            .await
            .unwrap();
        let times = transport.call_times();
        assert!(times[1] - times[0] >= Duration::from_secs(7));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdefghijklmnop"), "abcdefghijkl");
        assert_eq!(short_id("abc"), "abc");
    }
}
