use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{AppConfig, BoundingBox};
use crate::errors::{AppError, AppResult};

const MODEL_NAME: &str = "Transaction";
const LISTING_STATUS: &str = "published";
const REF_FIELDS: &[&str] = &[
    "@user_TransactionUserMark",
    "@transaction_TransactionPropertyImage",
    "@contact",
    "@page",
];
const BACK_REF_FIELDS: &[&str] = &[
    "@user_TransactionUserMark",
    "@transaction_TransactionPropertyImage",
    "@model_TransactionUserMarkSummary",
];

/// Fixed part of every page request.
#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub bounding_box: BoundingBox,
    pub page_size: usize,
}

impl ListingQuery {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bounding_box: config.bounding_box,
            page_size: config.page_size,
        }
    }

    pub fn page(&self, offset: usize) -> PageRequest {
        PageRequest {
            action: "find",
            model_name: MODEL_NAME,
            filter: ListingFilter {
                location: json!({
                    "$geoWithin": { "$box": self.bounding_box.corners() }
                }),
                listing_status: LISTING_STATUS,
            },
            options: PageOptions {
                offset,
                limit: self.page_size,
                ref_fields: REF_FIELDS,
                user_marks: true,
                sort: json!({ "_createdAt": -1 }),
                back_ref_fields: BACK_REF_FIELDS,
                text: "",
                count: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    action: &'static str,
    #[serde(rename = "modelName")]
    model_name: &'static str,
    filter: ListingFilter,
    options: PageOptions,
}

impl PageRequest {
    pub fn offset(&self) -> usize {
        self.options.offset
    }
}

#[derive(Debug, Clone, Serialize)]
struct ListingFilter {
    #[serde(rename = "pLocation")]
    location: Value,
    #[serde(rename = "listingStatus")]
    listing_status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct PageOptions {
    offset: usize,
    limit: usize,
    #[serde(rename = "refFields")]
    ref_fields: &'static [&'static str],
    #[serde(rename = "userMarks")]
    user_marks: bool,
    sort: Value,
    #[serde(rename = "backRefFields")]
    back_ref_fields: &'static [&'static str],
    text: &'static str,
    count: bool,
}

/// Status and undecoded body of one listings response.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// First 200 characters, for failure logs.
    pub fn body_excerpt(&self) -> String {
        self.body.chars().take(200).collect()
    }
}

#[async_trait]
pub trait ListingsTransport: Send + Sync {
    async fn send(&self, request: &PageRequest) -> AppResult<PageResponse>;
}

pub struct HttpListingsClient {
    http: Client,
    endpoint: String,
}

impl HttpListingsClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(header::REFERER, header_value(&config.listings_referer)?);
        headers.insert(header::ORIGIN, header_value(config.listings_origin())?);

        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.listings_endpoint.clone(),
        })
    }
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| AppError::Config(format!("invalid header value {value:?}: {err}")))
}

#[async_trait]
impl ListingsTransport for HttpListingsClient {
    async fn send(&self, request: &PageRequest) -> AppResult<PageResponse> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(PageResponse { status, body })
    }
}
