use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::listings::{ListingQuery, ListingsTransport, PageResponse};

const STATUS_OK: u16 = 200;
const STATUS_RATE_LIMITED: u16 = 429;
const BATCH_KEYS: &[&str] = &["models", "data", "results", "items", "docs"];

pub type RawRecord = Value;
pub type ProgressObserver = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub max_pages: usize,
    pub max_retries: u32,
    pub page_delay: Duration,
    pub rate_limit_cooldown: Duration,
    pub retry_backoff: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_pages: config.max_pages.max(1),
            max_retries: config.max_retries.max(1),
            page_delay: config.page_delay(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Position in the listing feed; `offset == page_index * page_size` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page_index: usize,
    page_size: usize,
}

impl PageCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_index: 0,
            page_size: page_size.max(1),
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// One-based page number for progress output.
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }

    pub fn offset(&self) -> usize {
        self.page_index * self.page_size
    }

    pub fn advance(&mut self) {
        self.page_index += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Requesting,
    Success,
    RateLimited,
    Failed,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum StopReason {
    /// The feed returned an empty batch.
    Exhausted,
    PageCeiling,
    RetriesExhausted { page: usize },
    UnexpectedResponse { page: usize, detail: String },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("feed exhausted"),
            StopReason::PageCeiling => f.write_str("page ceiling reached"),
            StopReason::RetriesExhausted { page } => {
                write!(f, "retry budget exhausted on page {page}")
            }
            StopReason::UnexpectedResponse { page, detail } => {
                write!(f, "unexpected response on page {page}: {detail}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlProgress {
    pub page: usize,
    pub state: CrawlState,
    pub attempt: u32,
    pub batch_len: usize,
    pub total_records: usize,
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub records: Vec<RawRecord>,
    pub pages_fetched: usize,
    pub final_state: CrawlState,
    pub stop_reason: StopReason,
    pub reported_total: Option<u64>,
    /// Requests sent, across all pages and retries.
    pub attempts: u32,
    /// Time spent in cooldowns, backoffs and inter-page delays.
    pub waited: Duration,
}

impl CrawlReport {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// True when the run ended on the feed's signal or the page ceiling.
    pub fn completed(&self) -> bool {
        self.final_state == CrawlState::Done
    }
}

#[derive(Debug)]
struct Batch {
    records: Vec<RawRecord>,
    total: Option<u64>,
}

#[derive(Debug)]
enum BatchError {
    /// Body was not JSON; retried like a transport failure.
    Malformed(String),
    UnexpectedShape(String),
}

enum PageOutcome {
    Records(Vec<RawRecord>),
    Exhausted,
    Halted(StopReason),
}

struct RunState {
    records: Vec<RawRecord>,
    pages_fetched: usize,
    reported_total: Option<u64>,
    attempts: u32,
    waited: Duration,
}

/// Sequential pager over the listings API with a shared per-page retry budget.
pub struct Crawler {
    transport: Arc<dyn ListingsTransport>,
    query: ListingQuery,
    settings: CrawlSettings,
    observer: Option<ProgressObserver>,
}

impl Crawler {
    pub fn new(
        transport: Arc<dyn ListingsTransport>,
        query: ListingQuery,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            transport,
            query,
            settings,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs until exhaustion, the page ceiling, or a page that cannot be
    /// fetched. Records gathered before a halt are always kept.
    pub async fn run(&self) -> CrawlReport {
        let mut cursor = PageCursor::new(self.query.page_size);
        let mut run = RunState {
            records: Vec::new(),
            pages_fetched: 0,
            reported_total: None,
            attempts: 0,
            waited: Duration::ZERO,
        };

        let (final_state, stop_reason) = loop {
            match self.fetch_page(&cursor, &mut run).await {
                PageOutcome::Records(batch) => {
                    let batch_len = batch.len();
                    run.records.extend(batch);
                    info!(
                        page = cursor.page_number(),
                        batch = batch_len,
                        total = run.records.len(),
                        "collected page"
                    );
                    run.pages_fetched += 1;
                    self.notify(&cursor, CrawlState::Success, 0, batch_len, &run);

                    if run.pages_fetched >= self.settings.max_pages {
                        info!(max_pages = self.settings.max_pages, "page ceiling reached");
                        break (CrawlState::Done, StopReason::PageCeiling);
                    }
                    cursor.advance();
                    self.pause(self.settings.page_delay, &mut run).await;
                }
                PageOutcome::Exhausted => {
                    info!(page = cursor.page_number(), "listing feed exhausted");
                    break (CrawlState::Done, StopReason::Exhausted);
                }
                PageOutcome::Halted(reason) => {
                    warn!(%reason, collected = run.records.len(), "crawl halted");
                    break (CrawlState::Failed, reason);
                }
            }
        };

        self.notify(&cursor, final_state, 0, 0, &run);
        CrawlReport {
            pages_fetched: run.pages_fetched,
            records: run.records,
            final_state,
            stop_reason,
            reported_total: run.reported_total,
            attempts: run.attempts,
            waited: run.waited,
        }
    }

    async fn fetch_page(&self, cursor: &PageCursor, run: &mut RunState) -> PageOutcome {
        let request = self.query.page(cursor.offset());
        let page = cursor.page_number();
        let max_retries = self.settings.max_retries;

        for attempt in 1..=max_retries {
            run.attempts += 1;
            self.notify(cursor, CrawlState::Requesting, attempt, 0, run);

            let delay = match self.transport.send(&request).await {
                Ok(response) if response.status == STATUS_OK => {
                    match extract_batch(&response.body) {
                        Ok(batch) => {
                            if cursor.page_index() == 0 {
                                if let Some(total) = batch.total {
                                    info!(total, "listing API reports total records");
                                    run.reported_total = Some(total);
                                }
                            }
                            if batch.records.is_empty() {
                                return PageOutcome::Exhausted;
                            }
                            return PageOutcome::Records(batch.records);
                        }
                        Err(BatchError::UnexpectedShape(detail)) => {
                            return PageOutcome::Halted(StopReason::UnexpectedResponse {
                                page,
                                detail,
                            });
                        }
                        Err(BatchError::Malformed(detail)) => {
                            warn!(page, attempt, %detail, "undecodable listing response");
                            self.notify(cursor, CrawlState::Failed, attempt, 0, run);
                            self.settings.retry_backoff
                        }
                    }
                }
                Ok(response) if response.status == STATUS_RATE_LIMITED => {
                    warn!(page, attempt, "rate limited by listing API");
                    self.notify(cursor, CrawlState::RateLimited, attempt, 0, run);
                    self.settings.rate_limit_cooldown
                }
                Ok(response) => {
                    log_status_failure(page, attempt, &response);
                    self.notify(cursor, CrawlState::Failed, attempt, 0, run);
                    self.settings.retry_backoff
                }
                Err(err) => {
                    if err.is_timeout() {
                        warn!(page, attempt, "listing request timed out");
                    } else {
                        warn!(page, attempt, ?err, "listing request failed");
                    }
                    self.notify(cursor, CrawlState::Failed, attempt, 0, run);
                    self.settings.retry_backoff
                }
            };

            if attempt < max_retries {
                self.pause(delay, run).await;
            }
        }

        PageOutcome::Halted(StopReason::RetriesExhausted { page })
    }

    async fn pause(&self, delay: Duration, run: &mut RunState) {
        if delay.is_zero() {
            return;
        }
        debug!(?delay, "waiting before next request");
        sleep(delay).await;
        run.waited += delay;
    }

    fn notify(
        &self,
        cursor: &PageCursor,
        state: CrawlState,
        attempt: u32,
        batch_len: usize,
        run: &RunState,
    ) {
        if let Some(callback) = &self.observer {
            callback(CrawlProgress {
                page: cursor.page_number(),
                state,
                attempt,
                batch_len,
                total_records: run.records.len(),
            });
        }
    }
}

fn log_status_failure(page: usize, attempt: u32, response: &PageResponse) {
    warn!(
        page,
        attempt,
        status = response.status,
        body = %response.body_excerpt(),
        "listing API returned an error status"
    );
}

/// Whole-number floats such as `1234.0` are accepted as counts.
fn count_value(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|count| *count >= 0.0 && count.fract() == 0.0 && *count <= u64::MAX as f64)
            .map(|count| count as u64)
    })
}

fn extract_batch(body: &str) -> Result<Batch, BatchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|err| BatchError::Malformed(err.to_string()))?;
    match value {
        Value::Array(records) => Ok(Batch {
            records,
            total: None,
        }),
        Value::Object(mut map) => {
            let total = map.get("count").and_then(count_value);
            let key = BATCH_KEYS
                .iter()
                .find(|key| map.get(**key).map(Value::is_array).unwrap_or(false));
            match key.and_then(|key| map.remove(*key)) {
                Some(Value::Array(records)) => Ok(Batch { records, total }),
                _ => {
                    let keys = map.keys().cloned().collect::<Vec<_>>().join(", ");
                    Err(BatchError::UnexpectedShape(format!(
                        "no record collection among keys [{keys}]"
                    )))
                }
            }
        }
        other => Err(BatchError::UnexpectedShape(format!(
            "top-level {} instead of object or array",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::config::BoundingBox;
    use crate::errors::{AppError, AppResult};
    use crate::listings::PageRequest;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<AppResult<PageResponse>>>,
        offsets: Mutex<Vec<usize>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<AppResult<PageResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                offsets: Mutex::new(Vec::new()),
            })
        }

        fn offsets(&self) -> Vec<usize> {
            self.offsets.lock().clone()
        }
    }

    #[async_trait]
    impl ListingsTransport for ScriptedTransport {
        async fn send(&self, request: &PageRequest) -> AppResult<PageResponse> {
            self.offsets.lock().push(request.offset());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(PageResponse::new(500, "script exhausted")))
        }
    }

    fn page_of(start: usize, len: usize) -> AppResult<PageResponse> {
        let models: Vec<Value> = (start..start + len).map(|id| json!({ "_id": id })).collect();
        Ok(PageResponse::new(
            200,
            json!({ "models": models, "count": 1234 }).to_string(),
        ))
    }

    fn empty_page() -> AppResult<PageResponse> {
        Ok(PageResponse::new(200, json!({ "models": [] }).to_string()))
    }

    fn query() -> ListingQuery {
        ListingQuery {
            bounding_box: BoundingBox::default(),
            page_size: 100,
        }
    }

    fn crawler(transport: Arc<ScriptedTransport>) -> Crawler {
        Crawler::new(transport, query(), CrawlSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn collects_pages_until_exhaustion() {
        let transport = ScriptedTransport::new(vec![
            page_of(0, 100),
            page_of(100, 100),
            page_of(200, 100),
            empty_page(),
        ]);
        let report = crawler(transport.clone()).run().await;

        assert_eq!(report.record_count(), 300);
        assert_eq!(report.final_state, CrawlState::Done);
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.reported_total, Some(1234));
        assert_eq!(transport.offsets(), vec![0, 100, 200, 300]);
        assert_eq!(report.records[250], json!({ "_id": 250 }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_share_budget_and_wait_for_cooldown() {
        let settings = CrawlSettings::default();
        let rate_limited = 2;
        let mut script: Vec<AppResult<PageResponse>> = (0..rate_limited)
            .map(|_| Ok(PageResponse::new(429, "slow down")))
            .collect();
        script.push(page_of(0, 10));
        script.push(empty_page());
        let transport = ScriptedTransport::new(script);

        let started = Instant::now();
        let report = crawler(transport.clone()).run().await;

        assert_eq!(report.record_count(), 10);
        assert_eq!(report.final_state, CrawlState::Done);
        assert_eq!(report.attempts, 4);
        assert!(report.waited >= settings.rate_limit_cooldown * rate_limited);
        assert!(started.elapsed() >= settings.rate_limit_cooldown * rate_limited);
        assert_eq!(transport.offsets(), vec![0, 0, 0, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn halts_after_retry_budget_and_keeps_prior_pages() {
        let transport = ScriptedTransport::new(vec![
            page_of(0, 100),
            Ok(PageResponse::new(503, "unavailable")),
            Err(AppError::Config("connection reset".into())),
            Ok(PageResponse::new(200, "<html>not json</html>")),
            page_of(100, 100),
        ]);
        let report = crawler(transport.clone()).run().await;

        assert_eq!(report.record_count(), 100);
        assert_eq!(report.final_state, CrawlState::Failed);
        assert_eq!(report.stop_reason, StopReason::RetriesExhausted { page: 2 });
        assert_eq!(report.attempts, 4);
        assert_eq!(transport.offsets(), vec![0, 100, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_page_uses_exactly_max_retries() {
        let settings = CrawlSettings {
            max_retries: 5,
            ..CrawlSettings::default()
        };
        let script = (0..10)
            .map(|_| Ok(PageResponse::new(500, "boom")))
            .collect();
        let transport = ScriptedTransport::new(script);
        let report = Crawler::new(transport.clone(), query(), settings.clone())
            .run()
            .await;

        assert_eq!(report.attempts, 5);
        assert_eq!(report.record_count(), 0);
        assert!(!report.completed());
        // no backoff after the final attempt
        assert_eq!(report.waited, settings.retry_backoff * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn page_ceiling_forces_done() {
        let settings = CrawlSettings {
            max_pages: 2,
            ..CrawlSettings::default()
        };
        let transport = ScriptedTransport::new(vec![
            page_of(0, 100),
            page_of(100, 100),
            page_of(200, 100),
        ]);
        let report = Crawler::new(transport.clone(), query(), settings.clone())
            .run()
            .await;

        assert_eq!(report.record_count(), 200);
        assert_eq!(report.stop_reason, StopReason::PageCeiling);
        assert_eq!(report.final_state, CrawlState::Done);
        assert_eq!(transport.offsets(), vec![0, 100]);
        assert_eq!(report.waited, settings.page_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn page_ceiling_reports_last_fetched_page() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let settings = CrawlSettings {
            max_pages: 2,
            ..CrawlSettings::default()
        };
        let transport = ScriptedTransport::new(vec![page_of(0, 100), page_of(100, 100)]);
        let report = Crawler::new(transport, query(), settings)
            .with_observer(Arc::new(move |progress: CrawlProgress| {
                sink.lock().push((progress.page, progress.state));
            }))
            .run()
            .await;

        assert_eq!(report.pages_fetched, 2);
        let events = events.lock().clone();
        assert_eq!(
            events[events.len() - 2..].to_vec(),
            vec![(2, CrawlState::Success), (2, CrawlState::Done)]
        );
        assert!(events.iter().all(|(page, _)| *page <= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_shape_halts_without_retrying() {
        let transport = ScriptedTransport::new(vec![
            page_of(0, 5),
            Ok(PageResponse::new(200, json!({ "message": "ok" }).to_string())),
            page_of(5, 5),
        ]);
        let report = crawler(transport.clone()).run().await;

        assert_eq!(report.record_count(), 5);
        assert_eq!(report.final_state, CrawlState::Failed);
        assert!(matches!(
            report.stop_reason,
            StopReason::UnexpectedResponse { page: 2, .. }
        ));
        assert_eq!(transport.offsets(), vec![0, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_transitions() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let transport = ScriptedTransport::new(vec![
            Ok(PageResponse::new(429, "")),
            page_of(0, 3),
            empty_page(),
        ]);
        let report = crawler(transport)
            .with_observer(Arc::new(move |progress: CrawlProgress| {
                sink.lock().push((progress.page, progress.state, progress.total_records));
            }))
            .run()
            .await;

        assert_eq!(report.record_count(), 3);
        let events = events.lock().clone();
        assert_eq!(
            events,
            vec![
                (1, CrawlState::Requesting, 0),
                (1, CrawlState::RateLimited, 0),
                (1, CrawlState::Requesting, 0),
                (1, CrawlState::Success, 3),
                (2, CrawlState::Requesting, 3),
                (2, CrawlState::Done, 3),
            ]
        );
    }

    #[test]
    fn extracts_batches_from_known_shapes() {
        let top_level = extract_batch(r#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(top_level.records.len(), 2);

        let fallback = extract_batch(r#"{"docs":[{"a":1}],"count":"n/a"}"#).unwrap();
        assert_eq!(fallback.records.len(), 1);
        assert_eq!(fallback.total, None);

        let float_count = extract_batch(r#"{"models":[1],"count":1234.0}"#).unwrap();
        assert_eq!(float_count.total, Some(1234));

        let fractional = extract_batch(r#"{"models":[1],"count":12.5}"#).unwrap();
        assert_eq!(fractional.total, None);

        let negative = extract_batch(r#"{"models":[1],"count":-3}"#).unwrap();
        assert_eq!(negative.total, None);

        let preferred = extract_batch(r#"{"data":[1],"models":[1,2]}"#).unwrap();
        assert_eq!(preferred.records.len(), 2);

        assert!(matches!(
            extract_batch(r#"{"models":null,"error":"x"}"#),
            Err(BatchError::UnexpectedShape(_))
        ));
        assert!(matches!(
            extract_batch(r#""just a string""#),
            Err(BatchError::UnexpectedShape(_))
        ));
        assert!(matches!(
            extract_batch("not json"),
            Err(BatchError::Malformed(_))
        ));
    }

    #[test]
    fn cursor_offset_tracks_page_index() {
        let mut cursor = PageCursor::new(100);
        assert_eq!(cursor.offset(), 0);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.page_index(), 2);
        assert_eq!(cursor.page_number(), 3);
        assert_eq!(cursor.offset(), 200);
    }
}
