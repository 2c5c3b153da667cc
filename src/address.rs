use std::fmt;

use crate::geo::{is_target_province_alias, GeoReference};

const WARD: usize = 1;
const DISTRICT: usize = 2;
const PROVINCE: usize = 3;
const MIN_SEGMENTS: usize = 3;

/// How a segment of the output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Verbatim,
    Lookup,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub text: String,
    pub resolution: Resolution,
}

impl ResolvedSegment {
    fn verbatim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            resolution: Resolution::Verbatim,
        }
    }

    fn lookup(text: &str) -> Self {
        Self {
            text: text.to_string(),
            resolution: Resolution::Lookup,
        }
    }

    fn synthesized(text: String) -> Self {
        Self {
            text,
            resolution: Resolution::Synthesized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedAddress {
    /// Fewer than three segments; the input is kept exactly as given.
    Unstructured(String),
    Segments(Vec<ResolvedSegment>),
}

impl NormalizedAddress {
    /// True when any segment is a fabricated label rather than a table hit.
    pub fn has_synthesized(&self) -> bool {
        match self {
            NormalizedAddress::Unstructured(_) => false,
            NormalizedAddress::Segments(segments) => segments
                .iter()
                .any(|segment| segment.resolution == Resolution::Synthesized),
        }
    }
}

impl fmt::Display for NormalizedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedAddress::Unstructured(raw) => f.write_str(raw),
            NormalizedAddress::Segments(segments) => {
                for (index, segment) in segments.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&segment.text)?;
                }
                Ok(())
            }
        }
    }
}

pub fn normalize(raw: &str, reference: &GeoReference) -> String {
    normalize_detailed(raw, reference).to_string()
}

/// Canonicalizes a `street, ward, district, province, ...` address.
///
/// Numeric ward and district segments are resolved through the reference
/// tables and fall back to a synthesized `"{label} {n}"` when no entry exists;
/// the fallback is reported through [`Resolution::Synthesized`].
pub fn normalize_detailed(raw: &str, reference: &GeoReference) -> NormalizedAddress {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() < MIN_SEGMENTS {
        return NormalizedAddress::Unstructured(raw.to_string());
    }

    let mut segments = Vec::with_capacity(parts.len());
    segments.push(ResolvedSegment::verbatim(parts[0]));
    segments.push(resolve_ward(parts[WARD], parts[DISTRICT], reference));
    segments.push(resolve_district(parts[DISTRICT], reference));
    if let Some(province) = parts.get(PROVINCE) {
        segments.push(resolve_province(province, reference));
    }
    segments.extend(
        parts
            .iter()
            .skip(PROVINCE + 1)
            .map(|part| ResolvedSegment::verbatim(part)),
    );

    NormalizedAddress::Segments(segments)
}

fn resolve_ward(ward: &str, district: &str, reference: &GeoReference) -> ResolvedSegment {
    if !is_numeral(ward) {
        return ResolvedSegment::verbatim(ward);
    }
    if is_numeral(district) {
        if let Some(name) = reference.ward_by_numerals(district, ward) {
            return ResolvedSegment::lookup(name);
        }
    }
    ResolvedSegment::synthesized(reference.labels().ward_name(ward))
}

fn resolve_district(district: &str, reference: &GeoReference) -> ResolvedSegment {
    if !is_numeral(district) {
        return ResolvedSegment::verbatim(district);
    }
    match reference.district_by_numeral(district) {
        Some(name) => ResolvedSegment::lookup(name),
        None => ResolvedSegment::synthesized(reference.labels().district_name(district)),
    }
}

fn resolve_province(province: &str, reference: &GeoReference) -> ResolvedSegment {
    if is_target_province_alias(province) {
        ResolvedSegment::lookup(reference.target_province_name())
    } else {
        ResolvedSegment::verbatim(province)
    }
}

fn is_numeral(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|ch| ch.is_ascii_digit())
}
