use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_LISTINGS_ENDPOINT: &str = "https://moso.vn/api";
const DEFAULT_LISTINGS_REFERER: &str = "https://moso.vn/";
const DEFAULT_GEO_API_BASE: &str = "https://provinces.open-api.vn/api";
const DEFAULT_TARGET_PROVINCE_CODE: u32 = 79;
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_MAX_PAGES: usize = 100;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PAGE_DELAY_MS: u64 = 1_500;
const DEFAULT_RATE_LIMIT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFERENCE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Geographic box the listing filter is restricted to, in `(lng, lat)` corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Parses `min_lng,min_lat,max_lng,max_lat`.
    pub fn parse(value: &str) -> Option<Self> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        match parts.as_slice() {
            [min_lng, min_lat, max_lng, max_lat] => Some(Self {
                min_lng: *min_lng,
                min_lat: *min_lat,
                max_lng: *max_lng,
                max_lat: *max_lat,
            }),
            _ => None,
        }
    }

    pub fn corners(&self) -> [[f64; 2]; 2] {
        [[self.min_lng, self.min_lat], [self.max_lng, self.max_lat]]
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lng: 106.52215625292972,
            min_lat: 10.33126945476703,
            max_lng: 106.79818774707034,
            max_lat: 11.193358141916859,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub listings_endpoint: String,
    pub listings_referer: String,
    pub user_agent: String,
    pub geo_api_base: String,
    pub target_province_code: u32,
    pub bounding_box: BoundingBox,
    pub page_size: usize,
    pub max_pages: usize,
    pub max_retries: u32,
    pub page_delay_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub reference_timeout_secs: u64,
    pub output_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listings_endpoint: DEFAULT_LISTINGS_ENDPOINT.to_string(),
            listings_referer: DEFAULT_LISTINGS_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            geo_api_base: DEFAULT_GEO_API_BASE.to_string(),
            target_province_code: DEFAULT_TARGET_PROVINCE_CODE,
            bounding_box: BoundingBox::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            max_retries: DEFAULT_MAX_RETRIES,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            rate_limit_cooldown_ms: DEFAULT_RATE_LIMIT_COOLDOWN_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            reference_timeout_secs: DEFAULT_REFERENCE_TIMEOUT_SECS,
            output_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            listings_endpoint: parse_string("LISTINGS_ENDPOINT", defaults.listings_endpoint),
            listings_referer: parse_string("LISTINGS_REFERER", defaults.listings_referer),
            user_agent: parse_string("LISTINGS_USER_AGENT", defaults.user_agent),
            geo_api_base: parse_string("GEO_API_BASE", defaults.geo_api_base),
            target_province_code: parse_u32("TARGET_PROVINCE_CODE", defaults.target_province_code),
            bounding_box: env::var("LISTING_BBOX")
                .ok()
                .and_then(|v| BoundingBox::parse(&v))
                .unwrap_or(defaults.bounding_box),
            page_size: parse_usize("PAGE_SIZE", defaults.page_size).max(1),
            max_pages: parse_usize("MAX_PAGES", defaults.max_pages).max(1),
            max_retries: parse_u32("MAX_RETRIES", defaults.max_retries).max(1),
            page_delay_ms: parse_u64("PAGE_DELAY_MS", defaults.page_delay_ms),
            rate_limit_cooldown_ms: parse_u64(
                "RATE_LIMIT_COOLDOWN_MS",
                defaults.rate_limit_cooldown_ms,
            ),
            retry_backoff_ms: parse_u64("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            request_timeout_secs: parse_u64("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            reference_timeout_secs: parse_u64(
                "REFERENCE_TIMEOUT_SECS",
                defaults.reference_timeout_secs,
            ),
            output_dir: env::var("OUTPUT_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_secs(self.reference_timeout_secs)
    }

    /// `Origin` header value derived from the referer.
    pub fn listings_origin(&self) -> &str {
        self.listings_referer.trim_end_matches('/')
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
