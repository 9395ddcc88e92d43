//! Input validators: pure functions turning raw update payloads into
//! typed step values or a rejection reason.
//!
//! Nothing here touches state or does I/O. The engine maps a `Rejection`
//! to a re-prompt and leaves the conversation untouched.

use serde::{Deserialize, Serialize};

/// Minimum digits for a phone number (country code + subscriber number).
const PHONE_MIN_DIGITS: usize = 10;
/// Maximum digits per E.164.
const PHONE_MAX_DIGITS: usize = 15;

/// Why an input was rejected for the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyText,
    InvalidPhone,
    UnknownCategory,
    OutOfRangeCoordinates,
    ExpectedLocation,
    ExpectedPhotoOrSkip,
}

/// Report categories a citizen can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Garbage,
    RoadDamage,
    Lighting,
    WaterSupply,
    Greenery,
    Other,
}

impl ReportCategory {
    /// All categories, in display order.
    pub const ALL: [ReportCategory; 6] = [
        Self::Garbage,
        Self::RoadDamage,
        Self::Lighting,
        Self::WaterSupply,
        Self::Greenery,
        Self::Other,
    ];

    /// Canonical user-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Garbage => "Garbage",
            Self::RoadDamage => "Road damage",
            Self::Lighting => "Lighting",
            Self::WaterSupply => "Water supply",
            Self::Greenery => "Greenery",
            Self::Other => "Other",
        }
    }

    /// Stable slug used in button callback payloads.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Garbage => "garbage",
            Self::RoadDamage => "road_damage",
            Self::Lighting => "lighting",
            Self::WaterSupply => "water_supply",
            Self::Greenery => "greenery",
            Self::Other => "other",
        }
    }

    /// The callback payload attached to this category's button.
    pub fn payload(&self) -> String {
        format!("category:{}", self.slug())
    }
}

/// Map a category selection to a typed category.
///
/// Accepts either a button payload (`category:<slug>`) or the canonical
/// label as free text, case-insensitively. Anything else is rejected.
pub fn category(input: &str) -> Result<ReportCategory, Rejection> {
    let input = input.trim();
    let candidate = input.strip_prefix("category:").unwrap_or(input);

    ReportCategory::ALL
        .iter()
        .find(|c| {
            candidate.eq_ignore_ascii_case(c.slug()) || candidate.eq_ignore_ascii_case(c.label())
        })
        .copied()
        .ok_or(Rejection::UnknownCategory)
}

/// Validate and canonicalize a phone number.
///
/// Strips spaces, dashes, dots, and parentheses; requires 10–15 digits;
/// returns the canonical `+<digits>` form.
pub fn phone_number(input: &str) -> Result<String, Rejection> {
    let mut digits = String::new();
    for c in input.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(Rejection::InvalidPhone),
        }
    }

    if digits.len() < PHONE_MIN_DIGITS || digits.len() > PHONE_MAX_DIGITS {
        return Err(Rejection::InvalidPhone);
    }

    Ok(format!("+{digits}"))
}

/// Validate geographic coordinates.
pub fn coordinates(latitude: f64, longitude: f64) -> Result<(f64, f64), Rejection> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(Rejection::OutOfRangeCoordinates);
    }
    Ok((latitude, longitude))
}

/// Pass through trimmed free text, rejecting empty/whitespace-only input.
pub fn non_empty_text(input: &str) -> Result<String, Rejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Rejection::EmptyText);
    }
    Ok(trimmed.to_string())
}

/// Whether the input is the explicit skip command for an optional step.
pub fn is_skip(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.eq_ignore_ascii_case("skip") || trimmed.eq_ignore_ascii_case("/skip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_payload() {
        assert_eq!(category("category:garbage"), Ok(ReportCategory::Garbage));
        assert_eq!(
            category("category:road_damage"),
            Ok(ReportCategory::RoadDamage)
        );
    }

    #[test]
    fn test_category_from_label_case_insensitive() {
        assert_eq!(category("Garbage"), Ok(ReportCategory::Garbage));
        assert_eq!(category("garbage"), Ok(ReportCategory::Garbage));
        assert_eq!(category("ROAD DAMAGE"), Ok(ReportCategory::RoadDamage));
        assert_eq!(category("water supply"), Ok(ReportCategory::WaterSupply));
    }

    #[test]
    fn test_category_rejects_unknown() {
        assert_eq!(category("potholes"), Err(Rejection::UnknownCategory));
        assert_eq!(category(""), Err(Rejection::UnknownCategory));
        assert_eq!(category("category:"), Err(Rejection::UnknownCategory));
    }

    #[test]
    fn test_phone_accepts_formatted() {
        assert_eq!(phone_number("+7 705 123 45 67"), Ok("+77051234567".into()));
        assert_eq!(phone_number("8(705)123-45-67"), Ok("+87051234567".into()));
        assert_eq!(phone_number("77051234567"), Ok("+77051234567".into()));
    }

    #[test]
    fn test_phone_rejects_short_and_garbage() {
        assert_eq!(phone_number("12345"), Err(Rejection::InvalidPhone));
        assert_eq!(phone_number("not a phone"), Err(Rejection::InvalidPhone));
        assert_eq!(phone_number(""), Err(Rejection::InvalidPhone));
        // 16 digits exceeds E.164.
        assert_eq!(
            phone_number("1234567890123456"),
            Err(Rejection::InvalidPhone)
        );
    }

    #[test]
    fn test_coordinates_in_range() {
        assert_eq!(coordinates(43.238, 76.889), Ok((43.238, 76.889)));
        assert_eq!(coordinates(-90.0, 180.0), Ok((-90.0, 180.0)));
    }

    #[test]
    fn test_coordinates_out_of_range() {
        assert_eq!(
            coordinates(91.0, 0.0),
            Err(Rejection::OutOfRangeCoordinates)
        );
        assert_eq!(
            coordinates(0.0, -180.5),
            Err(Rejection::OutOfRangeCoordinates)
        );
    }

    #[test]
    fn test_non_empty_text_trims() {
        assert_eq!(non_empty_text("  hello  "), Ok("hello".into()));
        assert_eq!(non_empty_text("   "), Err(Rejection::EmptyText));
        assert_eq!(non_empty_text(""), Err(Rejection::EmptyText));
    }

    #[test]
    fn test_is_skip() {
        assert!(is_skip("skip"));
        assert!(is_skip("SKIP"));
        assert!(is_skip("/skip"));
        assert!(!is_skip("skipping"));
        assert!(!is_skip("no"));
    }
}
