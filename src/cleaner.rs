use serde_json::Value;

/// Pictographic and decorative code-point ranges stripped from listing text.
const SYMBOL_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F), // emoticons
    (0x1F300, 0x1F5FF), // symbols & pictographs
    (0x1F680, 0x1F6FF), // transport & map
    (0x1F1E0, 0x1F1FF), // regional indicators
    (0x2702, 0x27B0),   // dingbats
    (0x24C2, 0x24C2),
    (0x2B00, 0x2BFF),   // arrows, stars, large shapes
    (0x3030, 0x3030),
    (0x303D, 0x303D),
    (0x3297, 0x3297),
    (0x3299, 0x3299),
    (0x1F170, 0x1F251), // enclosed alphanumeric / ideographic supplements
    (0x1F900, 0x1F9FF), // supplemental symbols & pictographs
    (0x1FA00, 0x1FA6F), // chess symbols
    (0x2600, 0x26FF),   // miscellaneous symbols
    (0x1F7E0, 0x1F7EB), // coloured circles and squares
    (0x2022, 0x2022),   // bullet
    (0x25A0, 0x25FF),   // geometric shapes
];

fn is_stripped(ch: char) -> bool {
    let code = ch as u32;
    SYMBOL_RANGES
        .iter()
        .any(|(start, end)| (*start..=*end).contains(&code))
}

/// Drops emoji and marker symbols, then collapses runs of whitespace.
pub fn clean_text(text: &str) -> String {
    let stripped: String = text.chars().filter(|ch| !is_stripped(*ch)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans string values; every other JSON value is returned as-is.
pub fn clean_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(clean_text(text)),
        other => other.clone(),
    }
}
