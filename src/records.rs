use serde::Serialize;
use serde_json::Value;

use crate::address::normalize_detailed;
use crate::cleaner::clean_text;
use crate::crawler::RawRecord;
use crate::geo::GeoReference;

/// One CSV row derived from a listing record. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub index: usize,
    pub address_original: String,
    pub address: String,
    pub price: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "pType")]
    pub property_type: String,
    #[serde(rename = "pWidth")]
    pub width: String,
    #[serde(rename = "pLength")]
    pub length: String,
    #[serde(rename = "pArea")]
    pub area: String,
    #[serde(rename = "pLandArea")]
    pub land_area: String,
    #[serde(rename = "pNumberOfFloors")]
    pub floors: String,
    #[serde(rename = "pNumberOfBathrooms")]
    pub bathrooms: String,
    #[serde(rename = "pNumberOfBedrooms")]
    pub bedrooms: String,
    #[serde(rename = "pCertificateType")]
    pub certificate_type: String,
    #[serde(rename = "pFurnitureStatus")]
    pub furniture_status: String,
    pub description: String,
    #[serde(rename = "_createdAt")]
    pub created_at: String,
    #[serde(skip)]
    pub address_synthesized: bool,
}

impl NormalizedRecord {
    /// Projects `raw`; without a reference the address is only cleaned.
    pub fn from_raw(index: usize, raw: &RawRecord, reference: Option<&GeoReference>) -> Self {
        let address_original = listing_address(raw);
        let (address, address_synthesized) = match reference {
            Some(reference) => {
                let normalized = normalize_detailed(&address_original, reference);
                (normalized.to_string(), normalized.has_synthesized())
            }
            None => (address_original.clone(), false),
        };

        Self {
            index,
            address_original: clean_text(&address_original),
            address: clean_text(&address),
            price: field_text(raw, "price"),
            kind: clean_text(&field_text(raw, "type")),
            property_type: clean_text(&field_text(raw, "pType")),
            width: field_text(raw, "pWidth"),
            length: field_text(raw, "pLength"),
            area: field_text(raw, "pArea"),
            land_area: field_text(raw, "pLandArea"),
            floors: field_text(raw, "pNumberOfFloors"),
            bathrooms: field_text(raw, "pNumberOfBathrooms"),
            bedrooms: field_text(raw, "pNumberOfBedrooms"),
            certificate_type: clean_text(&field_text(raw, "pCertificateType")),
            furniture_status: clean_text(&field_text(raw, "pFurnitureStatus")),
            description: clean_text(&field_text(raw, "description")),
            created_at: field_text(raw, "_createdAt"),
            address_synthesized,
        }
    }
}

/// Projects every record with 1-based indices.
pub fn project_records(
    records: &[RawRecord],
    reference: Option<&GeoReference>,
) -> Vec<NormalizedRecord> {
    records
        .iter()
        .enumerate()
        .map(|(offset, raw)| NormalizedRecord::from_raw(offset + 1, raw, reference))
        .collect()
}

/// `pAddress.full`, falling back to the flat `_pAddress` field.
fn listing_address(raw: &RawRecord) -> String {
    raw.get("pAddress")
        .and_then(|address| address.get("full"))
        .and_then(Value::as_str)
        .filter(|full| !full.is_empty())
        .or_else(|| raw.get("_pAddress").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn field_text(raw: &RawRecord, key: &str) -> String {
    match raw.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
