//! Canonical identifiers and display-name normalization.
//!
//! Nothing in this module fails: unparseable input yields `None` (the absent
//! sentinel) rather than zero, and blank identifier parts are encoded with a
//! placeholder token instead of being dropped.

use serde::{Deserialize, Serialize};

/// Token standing in for a blank or absent identifier part.
pub const BLANK_TOKEN: &str = "~";

const PART_SEPARATOR: char = '-';
const LIST_SEPARATOR: char = '+';

/// Known abbreviation fixes, keyed by the lower-cased word without its
/// trailing period.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "St."),
    ("twp", "Township"),
    ("mt", "Mt."),
    ("ft", "Ft."),
    ("jr", "Jr."),
    ("sr", "Sr."),
    ("isd", "ISD"),
    ("ii", "II"),
    ("iii", "III"),
    ("iv", "IV"),
    ("us", "U.S."),
];

const NAME_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv"];

/// One positional component of a canonical identifier.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum IdPart {
    Text(String),
    List(Vec<String>),
    Blank,
}

impl From<&str> for IdPart {
    fn from(s: &str) -> Self {
        IdPart::Text(s.to_string())
    }
}

impl From<String> for IdPart {
    fn from(s: String) -> Self {
        IdPart::Text(s)
    }
}

impl From<&String> for IdPart {
    fn from(s: &String) -> Self {
        IdPart::Text(s.clone())
    }
}

impl From<Option<&str>> for IdPart {
    fn from(s: Option<&str>) -> Self {
        s.map(IdPart::from).unwrap_or(IdPart::Blank)
    }
}

impl From<Option<String>> for IdPart {
    fn from(s: Option<String>) -> Self {
        s.map(IdPart::Text).unwrap_or(IdPart::Blank)
    }
}

impl From<&Option<String>> for IdPart {
    fn from(s: &Option<String>) -> Self {
        s.as_deref().into()
    }
}

impl From<u32> for IdPart {
    fn from(n: u32) -> Self {
        IdPart::Text(n.to_string())
    }
}

impl From<Vec<String>> for IdPart {
    fn from(l: Vec<String>) -> Self {
        IdPart::List(l)
    }
}

impl From<&[&str]> for IdPart {
    fn from(l: &[&str]) -> Self {
        IdPart::List(l.iter().map(|s| s.to_string()).collect())
    }
}

/// Lower-cases and replaces every run of non-alphanumeric characters by `_`.
/// Returns None when nothing identifying is left.
fn id_token(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn part_token(part: &IdPart) -> String {
    match part {
        IdPart::Text(s) => id_token(s).unwrap_or_else(|| BLANK_TOKEN.to_string()),
        IdPart::Blank => BLANK_TOKEN.to_string(),
        IdPart::List(l) if l.is_empty() => BLANK_TOKEN.to_string(),
        IdPart::List(l) => l
            .iter()
            .map(|s| id_token(s).unwrap_or_else(|| BLANK_TOKEN.to_string()))
            .collect::<Vec<String>>()
            .join(&LIST_SEPARATOR.to_string()),
    }
}

/// Builds a deterministic identifier out of positional parts.
///
/// ```
/// use results_engine::ids::{make_id, IdPart};
///
/// let id = make_id(&["20241105".into(), "county".into(), "27".into()]);
/// assert_eq!(id, "20241105-county-27");
/// let with_blank = make_id(&["20241105".into(), IdPart::Blank, "27".into()]);
/// assert_eq!(with_blank, "20241105-~-27");
/// ```
pub fn make_id(parts: &[IdPart]) -> String {
    parts
        .iter()
        .map(part_token)
        .collect::<Vec<String>>()
        .join(&PART_SEPARATOR.to_string())
}

/// Extends an identifier built by `make_id` with one more positional part.
/// `child_id(&make_id(&[a, b]), c)` equals `make_id(&[a, b, c])`.
pub fn child_id(parent: &str, part: IdPart) -> String {
    format!("{}{}{}", parent, PART_SEPARATOR, part_token(&part))
}

// Case mapping restricted to one-to-one characters so that normalization stays
// idempotent.
fn upper(c: char) -> char {
    let mut it = c.to_uppercase();
    match (it.next(), it.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

fn lower(c: char) -> char {
    let mut it = c.to_lowercase();
    match (it.next(), it.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut word_start = true;
    for c in word.chars() {
        out.push(if word_start { upper(c) } else { lower(c) });
        word_start = matches!(c, '-' | '(' | '.' | '/' | '"');
    }
    out
}

fn normalize_word(word: &str) -> String {
    let cased = title_case(word);
    let bare = cased.trim_end_matches('.').to_lowercase();
    ABBREVIATIONS
        .iter()
        .find(|(k, _)| *k == bare)
        .map(|(_, v)| v.to_string())
        .unwrap_or(cased)
}

/// Canonical display text: trimmed, single-spaced, title-cased, with the
/// usual feed abbreviations expanded or fixed.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(normalize_word)
        .collect::<Vec<String>>()
        .join(" ")
}

fn clean_number(s: &str) -> String {
    s.trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect()
}

/// Parses a count. Returns None for empty or unparseable input.
pub fn parse_int(s: &str) -> Option<u64> {
    let cleaned = clean_number(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<u64>().ok()
}

/// Parses a decimal value. Returns None for empty, unparseable or non-finite input.
pub fn parse_float(s: &str) -> Option<f64> {
    let cleaned = clean_number(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|x| x.is_finite())
}

/// The components of a candidate name.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameParts {
    pub first: Option<String>,
    pub middle: Option<String>,
    pub last: Option<String>,
    pub suffix: Option<String>,
}

/// Splits a full name into first / middle / last / suffix.
pub fn split_name(full: &str) -> NameParts {
    let normalized = normalize_text(full);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();

    let mut suffix = None;
    if words.len() > 1 {
        if let Some(last) = words.last() {
            let bare = last.trim_end_matches(['.', ',']).to_lowercase();
            if NAME_SUFFIXES.contains(&bare.as_str()) {
                suffix = Some(last.to_string());
                words.pop();
            }
        }
    }
    // A trailing comma is left over from "Doe, Jr." style names.
    let words: Vec<String> = words
        .iter()
        .map(|w| w.trim_end_matches(',').to_string())
        .collect();

    match words.as_slice() {
        [] => NameParts::default(),
        [only] => NameParts {
            last: Some(only.clone()),
            suffix,
            ..NameParts::default()
        },
        [first, rest @ .., last] => NameParts {
            first: Some(first.clone()),
            middle: if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            },
            last: Some(last.clone()),
            suffix,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_joins_normalized_tokens() {
        let id = make_id(&[
            "20241105".into(),
            "School".into(),
            "ISD #281".into(),
            "Board Member (Elect 3)".into(),
        ]);
        assert_eq!(id, "20241105-school-isd_281-board_member_elect_3");
    }

    #[test]
    fn make_id_keeps_blank_positions() {
        let a = make_id(&["e".into(), IdPart::Blank, "27".into()]);
        let b = make_id(&["e".into(), "27".into(), IdPart::Blank]);
        let c = make_id(&["e".into(), "27".into()]);
        let d = make_id(&["e".into(), "  ".into(), "27".into()]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        // Whitespace-only text is a blank, like an absent value.
        assert_eq!(a, d);
    }

    #[test]
    fn make_id_blank_positions_are_injective() {
        let values = ["x", "y"];
        let mut seen = std::collections::HashSet::new();
        // Every subset of 3 positions blanked out.
        for mask in 0..8u32 {
            let parts: Vec<IdPart> = (0..3)
                .map(|i| {
                    if mask & (1 << i) != 0 {
                        IdPart::Blank
                    } else {
                        values[i % 2].into()
                    }
                })
                .collect();
            assert!(seen.insert(make_id(&parts)), "collision for mask {}", mask);
        }
    }

    #[test]
    fn make_id_lists() {
        let parts: &[&str] = &["27", "", "Hennepin"];
        assert_eq!(make_id(&[parts.into()]), "27+~+hennepin");
        assert_eq!(make_id(&[IdPart::List(vec![])]), BLANK_TOKEN);
        assert_ne!(
            make_id(&[IdPart::List(vec!["a".into(), "b".into()])]),
            make_id(&["a".into(), "b".into()])
        );
    }

    #[test]
    fn child_ids_extend_parents() {
        let parent = make_id(&["20241105".into(), "county".into(), "27".into()]);
        assert_eq!(
            child_id(&parent, "0404".into()),
            make_id(&[
                "20241105".into(),
                "county".into(),
                "27".into(),
                "0404".into()
            ])
        );
        assert_eq!(child_id(&parent, IdPart::Blank), "20241105-county-27-~");
    }

    #[test]
    fn normalize_text_fixes_abbreviations() {
        assert_eq!(normalize_text("  ST   PAUL  "), "St. Paul");
        assert_eq!(normalize_text("minnetonka twp"), "Minnetonka Township");
        assert_eq!(normalize_text("isd #281 (robbinsdale)"), "ISD #281 (Robbinsdale)");
        assert_eq!(normalize_text("us senator"), "U.S. Senator");
        assert_eq!(normalize_text("SMITH-JONES"), "Smith-Jones");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn normalize_text_is_idempotent() {
        let samples = [
            "ST. PAUL",
            "st paul",
            "Twp. of Lake",
            "U.S. Representative District 5",
            "QUESTION 1 (isd #11)",
            "mayor (first choice)",
            "Jean-luc o'neil iii",
            "straße İstanbul",
            "  \t multiple   spaces ",
            "...st...",
        ];
        for s in samples {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn numbers_use_absent_sentinel() {
        assert_eq!(parse_int("120"), Some(120));
        assert_eq!(parse_int(" 1,234 "), Some(1234));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("n/a"), None);
        assert_eq!(parse_int("-3"), None);
        assert_eq!(parse_float("60.00"), Some(60.0));
        assert_eq!(parse_float("45.5%"), Some(45.5));
        assert_eq!(parse_float("NaN"), None);
        assert_eq!(parse_float("inf"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn split_names() {
        let p = split_name("JOHN Q. PUBLIC JR");
        assert_eq!(p.first.as_deref(), Some("John"));
        assert_eq!(p.middle.as_deref(), Some("Q."));
        assert_eq!(p.last.as_deref(), Some("Public"));
        assert_eq!(p.suffix.as_deref(), Some("Jr."));

        let p = split_name("WRITE-IN");
        assert_eq!(p.first, None);
        assert_eq!(p.last.as_deref(), Some("Write-In"));

        assert_eq!(split_name("   "), NameParts::default());
    }
}
