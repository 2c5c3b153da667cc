use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const DEFAULT_TARGET_PROVINCE_NAME: &str = "Thành phố Hồ Chí Minh";
const PROVINCE_TREE_DEPTH: &str = "3";

static DISTRICT_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Quận|District)\s+(\d+)").expect("district ordinal pattern"));
static WARD_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Phường|Ward)\s+(\d+)").expect("ward ordinal pattern"));

/// Prefixes used when a bare numeral has to be turned into a display name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminLabels {
    pub ward: String,
    pub district: String,
}

impl AdminLabels {
    pub fn english() -> Self {
        Self {
            ward: "Ward".into(),
            district: "District".into(),
        }
    }

    pub fn ward_name(&self, numeral: &str) -> String {
        format!("{} {numeral}", self.ward)
    }

    pub fn district_name(&self, numeral: &str) -> String {
        format!("{} {numeral}", self.district)
    }
}

impl Default for AdminLabels {
    fn default() -> Self {
        Self {
            ward: "Phường".into(),
            district: "Quận".into(),
        }
    }
}

/// Lookup tables for one province's administrative hierarchy.
///
/// Built once before crawling and only read afterwards. Ward numerals repeat
/// across districts, so numbered wards are keyed by `{district}-{ward}`.
#[derive(Clone, Debug, Default)]
pub struct GeoReference {
    provinces: HashMap<String, String>,
    districts: HashMap<String, String>,
    wards: HashMap<String, String>,
    districts_by_numeral: HashMap<String, String>,
    wards_by_key: HashMap<String, String>,
    target_province: Option<String>,
    labels: AdminLabels,
}

impl GeoReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels(labels: AdminLabels) -> Self {
        Self {
            labels,
            ..Self::default()
        }
    }

    pub fn labels(&self) -> &AdminLabels {
        &self.labels
    }

    pub fn insert_province(&mut self, code: impl Into<String>, name: impl Into<String>) {
        let name = name.into();
        if self.target_province.is_none() && is_target_province_alias(&name) {
            self.target_province = Some(name.clone());
        }
        self.provinces.insert(code.into(), name);
    }

    /// Records a district and returns its bare numeral when the name carries one.
    pub fn insert_district(
        &mut self,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> Option<String> {
        let name = name.into();
        let numeral = ordinal(&DISTRICT_ORDINAL, &name);
        if let Some(numeral) = &numeral {
            self.districts_by_numeral
                .insert(numeral.clone(), name.clone());
        }
        self.districts.insert(code.into(), name);
        numeral
    }

    pub fn insert_ward(
        &mut self,
        district_numeral: Option<&str>,
        code: impl Into<String>,
        name: impl Into<String>,
    ) {
        let name = name.into();
        if let (Some(district), Some(ward)) = (district_numeral, ordinal(&WARD_ORDINAL, &name)) {
            self.wards_by_key
                .insert(ward_key(district, &ward), name.clone());
        }
        self.wards.insert(code.into(), name);
    }

    pub fn province(&self, code: &str) -> Option<&str> {
        self.provinces.get(code).map(String::as_str)
    }

    pub fn district(&self, code: &str) -> Option<&str> {
        self.districts.get(code).map(String::as_str)
    }

    pub fn ward(&self, code: &str) -> Option<&str> {
        self.wards.get(code).map(String::as_str)
    }

    pub fn district_by_numeral(&self, numeral: &str) -> Option<&str> {
        self.districts_by_numeral.get(numeral).map(String::as_str)
    }

    pub fn ward_by_numerals(&self, district: &str, ward: &str) -> Option<&str> {
        self.wards_by_key
            .get(&ward_key(district, ward))
            .map(String::as_str)
    }

    /// Canonical name substituted for any alias of the target province.
    pub fn target_province_name(&self) -> &str {
        self.target_province
            .as_deref()
            .unwrap_or(DEFAULT_TARGET_PROVINCE_NAME)
    }

    pub fn province_count(&self) -> usize {
        self.provinces.len()
    }

    pub fn district_count(&self) -> usize {
        self.districts.len()
    }

    pub fn ward_count(&self) -> usize {
        self.wards.len()
    }

    /// Indexes a `depth=3` province tree.
    pub fn absorb_province_tree(&mut self, tree: ProvinceTree) {
        if self.target_province.is_none() && is_target_province_alias(&tree.name) {
            self.target_province = Some(tree.name.clone());
        }
        for district in tree.districts {
            let numeral = self.insert_district(district.code, district.name);
            for ward in district.wards {
                self.insert_ward(numeral.as_deref(), ward.code, ward.name);
            }
        }
    }
}

pub fn ward_key(district: &str, ward: &str) -> String {
    format!("{district}-{ward}")
}

/// Full native name, its unaccented form, or the `hcm` abbreviation.
pub fn is_target_province_alias(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.contains("hồ chí minh") || lowered.contains("ho chi minh") || lowered == "hcm"
}

fn ordinal(pattern: &Regex, name: &str) -> Option<String> {
    pattern
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvinceEntry {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvinceTree {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub districts: Vec<DistrictEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistrictEntry {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub wards: Vec<ProvinceEntry>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected administrative code: {other}"
        ))),
    }
}

/// Fetches the province list and the target province's subdivision tree.
pub struct GeoReferenceLoader {
    http: Client,
    api_base: String,
    province_code: u32,
    labels: AdminLabels,
}

impl GeoReferenceLoader {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.reference_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: config.geo_api_base.trim_end_matches('/').to_string(),
            province_code: config.target_province_code,
            labels: AdminLabels::default(),
        })
    }

    pub fn with_labels(mut self, labels: AdminLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Best-effort load. On failure the (possibly partial) tables come back
    /// with `false`, and callers should skip normalization entirely.
    pub async fn load(&self) -> (GeoReference, bool) {
        let mut reference = GeoReference::with_labels(self.labels.clone());

        match self.fetch_provinces().await {
            Ok(provinces) => {
                info!(count = provinces.len(), "loaded province list");
                for province in provinces {
                    reference.insert_province(province.code, province.name);
                }
            }
            Err(err) => warn!(?err, "province list unavailable; continuing with province tree"),
        }

        match self.fetch_province_tree().await {
            Ok(tree) => {
                reference.absorb_province_tree(tree);
                info!(
                    districts = reference.district_count(),
                    wards = reference.ward_count(),
                    "address reference loaded"
                );
                (reference, true)
            }
            Err(err) => {
                warn!(?err, "address reference unavailable; addresses pass through unchanged");
                (reference, false)
            }
        }
    }

    async fn fetch_provinces(&self) -> AppResult<Vec<ProvinceEntry>> {
        let url = self.endpoint(&["p", ""])?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn fetch_province_tree(&self) -> AppResult<ProvinceTree> {
        let mut url = self.endpoint(&["p", &self.province_code.to_string()])?;
        url.query_pairs_mut()
            .append_pair("depth", PROVINCE_TREE_DEPTH);
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid geo API base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid geo API base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_tree() -> ProvinceTree {
        serde_json::from_value(json!({
            "code": 79,
            "name": "Thành phố Hồ Chí Minh",
            "districts": [
                {
                    "code": 778,
                    "name": "Quận 7",
                    "wards": [
                        {"code": 27484, "name": "Phường Tân Thuận Đông"},
                        {"code": 27487, "name": "Phường 3"}
                    ]
                },
                {
                    "code": 771,
                    "name": "Quận 10",
                    "wards": [{"code": 27190, "name": "Phường 3"}]
                },
                {
                    "code": "765",
                    "name": "Quận Bình Thạnh",
                    "wards": [{"code": 26905, "name": "Phường 3"}]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn indexes_districts_by_numeral() {
        let mut reference = GeoReference::new();
        reference.absorb_province_tree(sample_tree());

        assert_eq!(reference.district("778"), Some("Quận 7"));
        assert_eq!(reference.district_by_numeral("10"), Some("Quận 10"));
        assert_eq!(reference.district("765"), Some("Quận Bình Thạnh"));
        assert_eq!(reference.district_count(), 3);
    }

    #[test]
    fn ward_numerals_are_scoped_to_their_district() {
        let mut reference = GeoReference::new();
        reference.absorb_province_tree(sample_tree());

        assert_eq!(reference.ward_by_numerals("7", "3"), Some("Phường 3"));
        assert_eq!(reference.ward_by_numerals("10", "3"), Some("Phường 3"));
        assert_eq!(reference.ward_by_numerals("7", "9"), None);
        assert_eq!(reference.ward("26905"), Some("Phường 3"));
        assert_eq!(reference.ward("27484"), Some("Phường Tân Thuận Đông"));
        assert_eq!(reference.ward_count(), 4);
    }

    #[test]
    fn target_province_comes_from_alias_match() {
        let mut reference = GeoReference::new();
        assert_eq!(reference.target_province_name(), "Thành phố Hồ Chí Minh");

        reference.insert_province("1", "Thành phố Hà Nội");
        reference.insert_province("79", "TP. Hồ Chí Minh");
        assert_eq!(reference.province("1"), Some("Thành phố Hà Nội"));
        assert_eq!(reference.target_province_name(), "TP. Hồ Chí Minh");
    }

    #[test]
    fn alias_matching_ignores_case() {
        assert!(is_target_province_alias("HCM"));
        assert!(is_target_province_alias(" Ho Chi Minh City "));
        assert!(is_target_province_alias("TP HỒ CHÍ MINH"));
        assert!(!is_target_province_alias("hcmc"));
        assert!(!is_target_province_alias("Bình Dương"));
    }

    #[test]
    fn rejects_codes_of_unexpected_type() {
        let parsed = serde_json::from_value::<ProvinceEntry>(json!({"code": null, "name": "x"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn builds_endpoint_urls_from_base() {
        let config = AppConfig {
            geo_api_base: "https://geo.example.com/api/".into(),
            ..AppConfig::default()
        };
        let loader = GeoReferenceLoader::new(&config).unwrap();
        assert_eq!(
            loader.endpoint(&["p", ""]).unwrap().as_str(),
            "https://geo.example.com/api/p/"
        );
        assert_eq!(
            loader.endpoint(&["p", "79"]).unwrap().as_str(),
            "https://geo.example.com/api/p/79"
        );
    }
}
