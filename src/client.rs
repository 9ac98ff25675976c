use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::auth::TokenManager;
use crate::diff::{diff_room, diff_rooms};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::pending::{PendingBatch, RoomWrite, WriteOutcome, wait_for_outcome};
use crate::protocol::{CONTENT_PATH, CONTROL_PATH, DEFAULT_BASE_URL, control_body, parse_content};
use crate::retry::RetryBudget;
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&RoomEvent) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&[Room]) + Send + Sync>;

/// Timing and retry knobs. The vendor has changed its rate limit over time,
/// so none of these are fixed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Minimum spacing between requests from one account.
    pub rate_limit_window: Duration,
    /// Shortest debounce before a write is sent.
    pub write_delay_floor: Duration,
    pub request_timeout: Duration,
    /// Attempts per request, first try included.
    pub max_attempts: u32,
    /// Pause before retrying a non-200, non-429 response.
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5);
    pub const DEFAULT_WRITE_DELAY_FLOOR: Duration = Duration::from_millis(100);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit_window: Self::DEFAULT_RATE_LIMIT_WINDOW,
            write_delay_floor: Self::DEFAULT_WRITE_DELAY_FLOOR,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct DeviceClientBuilder {
    account_id: String,
    password: String,
    config: ClientConfig,
    http: Option<reqwest::Client>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl DeviceClientBuilder {
    pub fn new(account_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            password: password.into(),
            config: ClientConfig::default(),
            http: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn rate_limit_window(mut self, window: Duration) -> Self {
        self.config.rate_limit_window = window;
        self
    }

    pub fn write_delay_floor(mut self, floor: Duration) -> Self {
        self.config.write_delay_floor = floor;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Share an existing HTTP session instead of building one.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&RoomEvent) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&[Room]) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<DeviceClient> {
        let mut config = self.config;
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?,
        };

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, path)?)),
            _ => None,
        };

        let tokens = TokenManager::new(http.clone(), &config.base_url, self.account_id, self.password)
            .with_timeout(config.request_timeout)
            .with_max_attempts(config.max_attempts);

        Ok(DeviceClient {
            inner: Arc::new(Inner {
                http,
                config,
                tokens,
                state: Mutex::new(State::default()),
                flight: tokio::sync::Mutex::new(()),
                event_callbacks: self.event_callbacks,
                snapshot_callbacks: self.snapshot_callbacks,
                logger,
            }),
        })
    }
}

/// Client for one Adax account.
///
/// Cheap to clone; clones share the token, room cache and write queue.
#[derive(Clone)]
pub struct DeviceClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: TokenManager,
    state: Mutex<State>,
    /// Held for the duration of a control request.
    flight: tokio::sync::Mutex<()>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<Mutex<MessageLogger>>,
}

struct State {
    rooms: Vec<Room>,
    last_request: Option<Instant>,
    pending: PendingBatch,
    /// Cancels the debounced task that has not yet taken the batch.
    write_task: Option<CancellationToken>,
    writing: bool,
    fetching: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            last_request: None,
            pending: PendingBatch::new(),
            write_task: None,
            writing: false,
            fetching: false,
        }
    }
}

impl State {
    fn write_busy(&self) -> bool {
        self.writing || self.write_task.is_some() || !self.pending.is_empty()
    }

    fn phase(&self) -> WritePhase {
        if self.writing {
            WritePhase::Writing
        } else if self.write_task.is_some() {
            WritePhase::Debouncing
        } else if !self.pending.is_empty() {
            WritePhase::Pending
        } else {
            WritePhase::Idle
        }
    }
}

/// Clears the in-flight fetch marker even if the refresh future is dropped.
struct FetchGuard<'a>(&'a Inner);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().fetching = false;
    }
}

impl DeviceClient {
    pub fn builder(account_id: impl Into<String>, password: impl Into<String>) -> DeviceClientBuilder {
        DeviceClientBuilder::new(account_id, password)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Refresh if due, then return the cached rooms.
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.refresh(false).await?;
        Ok(self.rooms())
    }

    /// Fetch room state unless a write is outstanding or the rate-limit
    /// window since the last request has not elapsed (`force_update` skips
    /// the window check only). Skips are not errors.
    pub async fn refresh(&self, force_update: bool) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.write_busy() {
                trace!("write outstanding, skipping refresh");
                return Ok(());
            }
            if state.fetching {
                trace!("refresh already in flight");
                return Ok(());
            }
            if !force_update
                && let Some(last) = state.last_request
                && last.elapsed() < self.inner.config.rate_limit_window
            {
                trace!(since_last = ?last.elapsed(), "inside rate-limit window, skipping refresh");
                return Ok(());
            }
            state.fetching = true;
        }
        let _guard = FetchGuard(self.inner.as_ref());
        self.inner.fetch_rooms().await
    }

    /// Queue a target change and wait until the batch carrying it is sent.
    ///
    /// Calls arriving before the flush coalesce into one control request;
    /// repeated calls for the same room keep only the latest value.
    pub async fn set_room_target(&self, room_id: u64, temperature: f64, heating_enabled: bool) -> Result<()> {
        let write = RoomWrite {
            room_id,
            heating_enabled,
            target_temperature: Temperature::from_celsius(temperature),
        };

        let outcome = {
            let mut state = self.inner.state.lock();
            if let Some(previous) = state.write_task.take() {
                debug!(room_id, "superseding debounced write");
                previous.cancel();
            }
            let outcome = state.pending.merge(write);
            let cancel = CancellationToken::new();
            state.write_task = Some(cancel.clone());
            debug!(room_id, batch = state.pending.len(), "write queued");
            tokio::spawn(Inner::run_write_task(Arc::clone(&self.inner), cancel));
            outcome
        };

        match wait_for_outcome(outcome).await {
            Some(WriteOutcome::Applied) => Ok(()),
            Some(WriteOutcome::Dropped(reason)) => Err(Error::WriteFailed { room_id, reason }),
            None => Err(Error::WriteFailed {
                room_id,
                reason: "write task ended without reporting".to_string(),
            }),
        }
    }

    /// Set a validated target with heating on, then force a refresh.
    pub async fn set_temperature(&self, room_id: u64, temperature: f64) -> Result<()> {
        let target = Temperature::from_celsius(temperature).validate()?;
        self.known_room(room_id)?;
        self.set_room_target(room_id, target.celsius(), true).await?;
        self.refresh(true).await
    }

    /// Switch heating on (keeping the current target, at least the minimum)
    /// or off (target parked at the minimum), then force a refresh.
    pub async fn set_heating_mode(&self, room_id: u64, mode: HeatingMode) -> Result<()> {
        let room = self.known_room(room_id)?;
        let target = match mode {
            HeatingMode::Heat => room.target_temperature.celsius().max(MIN_TEMPERATURE),
            HeatingMode::Off => MIN_TEMPERATURE,
        };
        self.set_room_target(room_id, target, mode.is_heating()).await?;
        self.refresh(true).await
    }

    /// Check the account credentials without touching the cached token.
    pub async fn validate_credentials(&self) -> Result<()> {
        self.inner.tokens.validate().await
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.inner.state.lock().rooms.clone()
    }

    pub fn room(&self, room_id: u64) -> Option<Room> {
        self.inner
            .state
            .lock()
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
    }

    pub fn write_phase(&self) -> WritePhase {
        self.inner.state.lock().phase()
    }

    pub fn has_pending_write(&self) -> bool {
        self.inner.state.lock().write_busy()
    }

    pub fn has_token(&self) -> bool {
        self.inner.tokens.has_token()
    }

    fn known_room(&self, room_id: u64) -> Result<Room> {
        self.room(room_id).ok_or(Error::UnknownRoom(room_id))
    }
}

impl Inner {
    async fn fetch_rooms(&self) -> Result<()> {
        let Some(body) = self.request(Method::GET, CONTENT_PATH, None).await? else {
            return Ok(());
        };
        let Some(rooms) = parse_content(&body)? else {
            debug!("empty content response, keeping cached rooms");
            return Ok(());
        };
        if let Ok(json) = serde_json::from_str::<Value>(&body) {
            self.wire_log(|l| l.log_content(&json));
        }

        let (events, snapshot) = {
            let mut state = self.state.lock();
            if state.write_busy() {
                debug!("write queued during fetch, discarding content");
                return Ok(());
            }
            let events = diff_rooms(&state.rooms, &rooms);
            state.rooms = rooms;
            (events, state.rooms.clone())
        };
        debug!(rooms = snapshot.len(), changes = events.len(), "room cache refreshed");
        self.emit(&events, &snapshot);
        Ok(())
    }

    /// Debounce, then send whatever the pending batch holds.
    async fn run_write_task(self: Arc<Self>, cancel: CancellationToken) {
        let delay = self.write_delay();
        trace!(?delay, "debouncing write");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let _flight = tokio::select! {
            _ = cancel.cancelled() => return,
            guard = self.flight.lock() => guard,
        };

        // A previous write may have retried while we queued on the flight lock.
        let settle = self.window_remaining();
        if !settle.is_zero() {
            trace!(?settle, "waiting out window left by previous write");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
        }

        // Past this point the task can only be superseded, not cancelled.
        let batch = {
            let mut state = self.state.lock();
            if cancel.is_cancelled() {
                return;
            }
            state.write_task = None;
            state.writing = true;
            state.pending.take()
        };

        let outcome = if batch.writes.is_empty() {
            WriteOutcome::Applied
        } else {
            self.send_batch(&batch.writes).await
        };

        let (events, snapshot) = {
            let mut state = self.state.lock();
            state.writing = false;
            if outcome == WriteOutcome::Applied {
                let events = reconcile(&mut state.rooms, &batch.writes);
                (events, state.rooms.clone())
            } else {
                (Vec::new(), Vec::new())
            }
        };
        if !events.is_empty() {
            self.emit(&events, &snapshot);
        }
        batch.finish(outcome);
    }

    /// Wait out the rest of the rate-limit window, never less than the floor.
    fn write_delay(&self) -> Duration {
        self.window_remaining().max(self.config.write_delay_floor)
    }

    fn window_remaining(&self) -> Duration {
        let window = self.config.rate_limit_window;
        self.state
            .lock()
            .last_request
            .map(|last| window.saturating_sub(last.elapsed()))
            .unwrap_or_default()
    }

    async fn send_batch(&self, writes: &[RoomWrite]) -> WriteOutcome {
        let body = control_body(writes);
        let write_id = Uuid::new_v4();
        debug!(%write_id, rooms = writes.len(), "sending coalesced write");
        self.wire_log(|l| l.log_write(write_id, &body));

        match self.request(Method::POST, CONTROL_PATH, Some(&body)).await {
            Ok(Some(_)) => WriteOutcome::Applied,
            Ok(None) => {
                error!(%write_id, "write rejected by server, dropping batch");
                WriteOutcome::Dropped("rejected by server".to_string())
            }
            Err(e) => {
                error!(%write_id, error = %e, "write failed, dropping batch");
                WriteOutcome::Dropped(e.to_string())
            }
        }
    }

    /// Single authenticated request path with bounded retries. Returns the
    /// body of the 200 response.
    ///
    /// `Ok(None)` means the server kept refusing with a non-200 status.
    /// Transport failures and timeouts are returned once the budget is spent.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        let url = format!("{}{}", self.config.base_url, path);
        let timeout = self.config.request_timeout;

        let mut budget = RetryBudget::new(self.config.max_attempts);
        loop {
            let token = self.tokens.token().await?;
            self.state.lock().last_request = Some(Instant::now());
            let attempt = budget.attempt();
            debug!(%method, url = %url, attempt, "sending request");
            self.wire_log(|l| l.log_request(method.as_str(), path, attempt));

            let mut req = self.http.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = body {
                req = req.json(body);
            }

            // Headers and body share one deadline.
            let exchange = async {
                let resp = req.send().await?;
                let status = resp.status();
                let text = resp.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            };

            let err = match tokio::time::timeout(timeout, exchange).await {
                Ok(Ok((status, text))) if status == StatusCode::OK => return Ok(Some(text)),
                Ok(Ok((status, _))) if status == StatusCode::TOO_MANY_REQUESTS => {
                    self.wire_log(|l| l.log_status(path, 429));
                    if !budget.spend() {
                        error!(url = %url, "still rate limited after all attempts");
                        return Ok(None);
                    }
                    let backoff = budget.rate_limit_backoff(self.config.rate_limit_window);
                    warn!(url = %url, ?backoff, "rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Ok(Ok((status, _))) => {
                    self.wire_log(|l| l.log_status(path, status.as_u16()));
                    self.tokens.invalidate();
                    if !budget.spend() {
                        error!(
                            url = %url,
                            status = status.as_u16(),
                            reason = status.canonical_reason().unwrap_or("unknown"),
                            "request failed after all attempts"
                        );
                        return Ok(None);
                    }
                    warn!(url = %url, status = status.as_u16(), attempts_left = budget.attempts_left(), "request failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
                Ok(Err(e)) => Error::Http(e),
                Err(_) => Error::Timeout(timeout),
            };

            self.tokens.invalidate();
            if !budget.spend() {
                error!(url = %url, error = %err, "giving up on request");
                return Err(err);
            }
            warn!(url = %url, error = %err, attempts_left = budget.attempts_left(), "request error, retrying");
        }
    }

    fn emit(&self, events: &[RoomEvent], snapshot: &[Room]) {
        for event in events {
            trace!(room_id = event.room_id(), ?event, "room event");
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        if !events.is_empty() {
            for cb in &self.snapshot_callbacks {
                cb(snapshot);
            }
        }
    }

    fn wire_log(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            f(&mut logger.lock());
        }
    }
}

/// Apply confirmed writes to the cache in place.
fn reconcile(rooms: &mut [Room], writes: &[RoomWrite]) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    for write in writes {
        let Some(room) = rooms.iter_mut().find(|r| r.id == write.room_id) else {
            continue;
        };
        let before = room.clone();
        room.target_temperature = write.target_temperature;
        room.heating_enabled = write.heating_enabled;
        events.extend(diff_room(&before, room));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: u64, target: f64) -> Room {
        Room {
            id,
            home_id: 1,
            name: format!("room{id}"),
            heating_enabled: true,
            target_temperature: Temperature::from_celsius(target),
            temperature: Temperature::from_celsius(20.0),
        }
    }

    #[test]
    fn reconcile_updates_only_written_rooms() {
        let mut rooms = vec![room(1, 20.0), room(2, 18.0)];
        let writes = [RoomWrite {
            room_id: 1,
            heating_enabled: false,
            target_temperature: Temperature::from_celsius(5.0),
        }];
        let events = reconcile(&mut rooms, &writes);
        assert_eq!(rooms[0].target_temperature.celsius(), 5.0);
        assert!(!rooms[0].heating_enabled);
        assert_eq!(rooms[1].target_temperature.celsius(), 18.0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn reconcile_ignores_unknown_rooms() {
        let mut rooms = vec![room(1, 20.0)];
        let writes = [RoomWrite {
            room_id: 9,
            heating_enabled: true,
            target_temperature: Temperature::from_celsius(22.0),
        }];
        assert!(reconcile(&mut rooms, &writes).is_empty());
        assert_eq!(rooms, vec![room(1, 20.0)]);
    }

    #[test]
    fn state_phase_tracks_write_progress() {
        let mut state = State::default();
        assert_eq!(state.phase(), WritePhase::Idle);
        state.pending.merge(RoomWrite {
            room_id: 1,
            heating_enabled: true,
            target_temperature: Temperature::from_celsius(21.0),
        });
        assert_eq!(state.phase(), WritePhase::Pending);
        state.write_task = Some(CancellationToken::new());
        assert_eq!(state.phase(), WritePhase::Debouncing);
        state.write_task = None;
        let _batch = state.pending.take();
        state.writing = true;
        assert_eq!(state.phase(), WritePhase::Writing);
        assert!(state.write_busy());
    }

    #[test]
    fn default_config_matches_vendor_limits() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.rate_limit_window, Duration::from_secs(5));
        assert_eq!(config.write_delay_floor, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let client = DeviceClient::builder("42", "pw")
            .base_url("http://127.0.0.1:9/client-api/")
            .build()
            .unwrap();
        assert_eq!(client.config().base_url, "http://127.0.0.1:9/client-api");
        assert!(!client.has_token());
        assert_eq!(client.write_phase(), WritePhase::Idle);
    }
}
