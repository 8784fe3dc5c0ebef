//! Shared vocabulary codes for vehicle attributes
//!
//! Sites spell transmissions, body types and colors differently. Values are
//! mapped onto one numeric code set so rows from different sites compare.

use once_cell::sync::Lazy;
use regex::Regex;

const TRANSMISSIONS: &[(&str, &str)] = &[("1", "Manual"), ("2", "Automatic")];

const TRANSMISSION_ALIASES: &[(&str, &str)] = &[
    ("manual", "Manual"),
    ("auto", "Automatic"),
    ("automatic", "Automatic"),
    ("automatic transmission", "Automatic"),
];

const BODY_TYPES: &[(&str, &str)] = &[
    ("1", "Sports / Coupe"),
    ("2", "Convertible"),
    ("3", "Sedan"),
    ("4", "Hatchback"),
    ("5", "SUV"),
    ("6", "Other"),
    ("7", "Van / Bus"),
    ("8", "Estate"),
    ("9", "MPV"),
    ("10", "Pickup"),
    ("11", "Small City Car"),
];

const BODY_TYPE_ALIASES: &[(&str, &str)] = &[
    ("sports", "Sports / Coupe"),
    ("coupe", "Sports / Coupe"),
    ("sports coupe", "Sports / Coupe"),
    ("estate car", "Estate"),
    ("wagon", "Estate"),
    ("city car", "Small City Car"),
    ("bus", "Van / Bus"),
    ("mpv", "MPV"),
    ("pickup truck", "Pickup"),
    ("van", "Van / Bus"),
];

const COLORS: &[(&str, &str)] = &[
    ("1", "Black"),
    ("2", "Blue"),
    ("3", "Brown"),
    ("4", "Cyan"),
    ("5", "Gold"),
    ("6", "Green"),
    ("7", "Grey"),
    ("8", "Orange"),
    ("9", "Purple"),
    ("10", "Red"),
    ("11", "Silver"),
    ("12", "White"),
    ("13", "Yellow"),
    ("14", "Other"),
    ("15", "Beige"),
    ("16", "Titanium"),
    ("18", "Oily Color"),
    ("19", "Navy"),
    ("20", "Pearl"),
    ("21", "Maroon"),
];

const COLOR_ALIASES: &[(&str, &str)] = &[
    ("navy blue", "Navy"),
    ("pearl white", "White"),
    ("light grey", "Grey"),
    ("dark grey", "Grey"),
    ("silver grey", "Silver"),
    ("metallic blue", "Blue"),
];

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Lowercases, replaces punctuation with spaces and collapses whitespace
pub fn normalize_label(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let spaced = PUNCTUATION.replace_all(&lowered, " ");
    SPACES.replace_all(spaced.trim(), " ").into_owned()
}

fn lookup(codes: &[(&'static str, &str)], aliases: &[(&str, &str)], name: &str) -> Option<&'static str> {
    let name = normalize_label(name);
    if name.is_empty() {
        return None;
    }

    let target = aliases
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, label)| normalize_label(label))
        .unwrap_or_else(|| name.clone());

    if let Some((code, _)) = codes.iter().find(|(_, label)| normalize_label(label) == target) {
        return Some(*code);
    }

    codes
        .iter()
        .find(|(_, label)| {
            let label = normalize_label(label);
            label.contains(&name) || name.contains(&label)
        })
        .map(|(code, _)| *code)
}

pub fn transmission_code(name: &str) -> Option<&'static str> {
    lookup(TRANSMISSIONS, TRANSMISSION_ALIASES, name)
}

pub fn body_type_code(name: &str) -> Option<&'static str> {
    lookup(BODY_TYPES, BODY_TYPE_ALIASES, name)
}

pub fn color_code(name: &str) -> Option<&'static str> {
    lookup(COLORS, COLOR_ALIASES, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Sports / Coupe "), "sports coupe");
    }

    #[test]
    fn test_exact_and_alias() {
        assert_eq!(transmission_code("Automatic"), Some("2"));
        assert_eq!(transmission_code("auto"), Some("2"));
        assert_eq!(body_type_code("Wagon"), Some("8"));
        assert_eq!(color_code("Pearl White"), Some("12"));
    }

    #[test]
    fn test_substring_match() {
        assert_eq!(body_type_code("SUV 4x4"), Some("5"));
        assert_eq!(color_code("Dark Red"), Some("10"));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(transmission_code("CVT"), None);
        assert_eq!(color_code(""), None);
    }
}
