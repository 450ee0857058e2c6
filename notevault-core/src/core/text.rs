//! Text derivations stored alongside notes for search.
//!
//! Note content is ENML-like markup. On write the engine stores a plain-text
//! rendering and a flattened list of words (both lower-cased and stripped of
//! diacritics) plus three flags describing the markup. Search terms go
//! through the same normalization so they compare equal to indexed text.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("hardcoded tag regex"));
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(div|p|br|li|ul|ol|tr|td|th|h[1-6]|blockquote|pre|hr|table)\b[^>]*>")
        .expect("hardcoded block regex")
});
static ENCRYPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<en-crypt\b[^>]*>.*?</en-crypt>").expect("hardcoded en-crypt regex"));
static TODO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<en-todo\b([^>]*)/?>").expect("hardcoded en-todo regex"));
static CHECKED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)checked\s*=\s*["']true["']"#).expect("hardcoded checked regex")
});
static RECO_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<t\b[^>]*>(.*?)</t>").expect("hardcoded recognition regex"));
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("hardcoded entity regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("hardcoded space regex"));

/// Markup-derived flags stored on the note row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentFlags {
    pub finished_todo: bool,
    pub unfinished_todo: bool,
    pub encryption: bool,
}

/// Search-side projections of a note's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedContent {
    pub plain_text: String,
    pub list_of_words: String,
    pub flags: ContentFlags,
}

/// Builds every derived projection of `content` at once.
pub fn derive_content(content: &str) -> DerivedContent {
    let plain = normalize(&plain_text(content));
    DerivedContent {
        list_of_words: list_of_words(&plain),
        plain_text: plain,
        flags: content_flags(content),
    }
}

pub fn content_flags(content: &str) -> ContentFlags {
    let mut flags = ContentFlags {
        encryption: ENCRYPT_RE.is_match(content),
        ..ContentFlags::default()
    };
    for caps in TODO_RE.captures_iter(content) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        if CHECKED_RE.is_match(attrs) {
            flags.finished_todo = true;
        } else {
            flags.unfinished_todo = true;
        }
    }
    flags
}

/// Renders markup as plain text: encrypted sections are dropped, block
/// elements become line breaks, entities are decoded.
pub fn plain_text(content: &str) -> String {
    let without_crypt = ENCRYPT_RE.replace_all(content, " ");
    let with_breaks = BLOCK_RE.replace_all(&without_crypt, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);
    decoded
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Joins the words of already normalized text with single spaces,
/// punctuation removed.
pub fn list_of_words(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    SPACE_RE.replace_all(cleaned.trim(), " ").into_owned()
}

/// Extracts the recognized words of a resource's recognition document as
/// one space separated, normalized string.
pub fn recognition_text(recognition: &[u8]) -> Option<String> {
    let doc = String::from_utf8_lossy(recognition);
    let items: Vec<String> = RECO_ITEM_RE
        .captures_iter(&doc)
        .filter_map(|c| c.get(1))
        .map(|m| normalize(&decode_entities(m.as_str())))
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items.join(" "))
    }
}

/// Lower-cases and strips diacritics.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .collect()
}

/// Normalizes a search term: case and diacritics as [`normalize`], and every
/// punctuation character except the `*` wildcard dropped.
pub fn normalize_search_term(term: &str) -> String {
    let folded = normalize(term);
    let kept: String = folded
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '*')
        .collect();
    SPACE_RE.replace_all(kept.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Maps a lower-case Latin letter with a diacritic to its base letter.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' | 'ħ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' | 'ŧ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        'й' => 'и',
        'ё' => 'е',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<en-note><div>Café <b>Déjà</b> vu&amp;more</div><div><en-todo checked="true"/>done</div>
<div><en-todo/>pending</div></en-note>"#;

    #[test]
    fn test_plain_text_strips_markup() {
        let text = plain_text(CONTENT);
        assert!(text.contains("Café Déjà vu&more"));
        assert!(text.contains("done"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_derive_content_normalizes() {
        let derived = derive_content(CONTENT);
        assert!(derived.plain_text.contains("cafe deja vu&more"));
        assert_eq!(
            derived.list_of_words,
            "cafe deja vu more done pending"
        );
        assert!(derived.flags.finished_todo);
        assert!(derived.flags.unfinished_todo);
        assert!(!derived.flags.encryption);
    }

    #[test]
    fn test_encrypted_section_is_flagged_and_dropped() {
        let content = "<en-note>visible<en-crypt hint=\"x\">c2VjcmV0</en-crypt></en-note>";
        let derived = derive_content(content);
        assert!(derived.flags.encryption);
        assert_eq!(derived.plain_text, "visible");
    }

    #[test]
    fn test_normalize_search_term_keeps_wildcard() {
        assert_eq!(normalize_search_term("Résumé*!"), "resume*");
        assert_eq!(normalize_search_term("\"New  York\""), "new york");
    }

    #[test]
    fn test_recognition_text() {
        let reco = r#"<recoIndex><item><t w="87">Invoice</t><t w="12">lnvoice</t></item><item><t w="50">Öl</t></item></recoIndex>"#;
        assert_eq!(
            recognition_text(reco.as_bytes()).as_deref(),
            Some("invoice lnvoice ol")
        );
        assert_eq!(recognition_text(b"<recoIndex/>"), None);
    }
}
