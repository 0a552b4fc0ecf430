use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Wire-format relationship entry. `kind` is intentionally a bare `String`
/// rather than an enum: the provider is free to add relationship kinds we
/// don't care about, and we only look for `author` and `cover_art`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRelationship {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogAttributes {
    #[serde(default)]
    pub title: BTreeMap<String, String>,
    #[serde(default)]
    pub description: BTreeMap<String, String>,
    pub status: Option<String>,
    #[serde(rename = "lastChapter")]
    pub last_chapter: Option<String>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub attributes: RawTagAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTagAttributes {
    #[serde(default)]
    pub name: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogEntry {
    pub id: String,
    pub attributes: RawCatalogAttributes,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogPage {
    pub data: Vec<RawCatalogEntry>,
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChapterAttributes {
    pub chapter: Option<String>,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<i32>,
    #[serde(rename = "publishAt")]
    pub publish_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChapterEntry {
    pub id: String,
    pub attributes: RawChapterAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFeedPage {
    pub data: Vec<RawChapterEntry>,
}

/// A provider entry normalized into the shape the rest of the system wants
/// to work with: one preferred-language title/description, an author and
/// cover relationship pulled out of the free-form relationship array, and
/// `last_chapter` left as a string for the caller to parse (the provider's
/// own notion of "last chapter" is not always an integer).
#[derive(Debug, Clone)]
pub struct CanonicalCatalogEntry {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub last_chapter: Option<String>,
    pub tags: Vec<String>,
    pub author_external_id: Option<String>,
    pub cover_external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CanonicalChapter {
    pub external_id: String,
    pub chapter: Option<String>,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Picks "en" if present, otherwise the lexicographically-first key.
/// Sorting the fallback keeps the choice deterministic across platforms
/// and across runs, since a `HashMap`'s iteration order is not stable.
pub fn preferred_language<'a>(map: &'a BTreeMap<String, String>) -> Option<&'a str> {
    if let Some(en) = map.get("en") {
        return Some(en.as_str());
    }
    map.iter().next().map(|(_, v)| v.as_str())
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("entry {external_id} has no usable title in any language")]
pub struct ExtractionError {
    pub external_id: String,
}

impl RawChapterEntry {
    pub fn into_canonical(self) -> CanonicalChapter {
        CanonicalChapter {
            external_id: self.id,
            chapter: self.attributes.chapter,
            title: self.attributes.title,
            volume: self.attributes.volume,
            pages: self.attributes.pages,
            published_at: self.attributes.publish_at,
        }
    }
}

impl RawCatalogEntry {
    pub fn into_canonical(self) -> Result<CanonicalCatalogEntry, ExtractionError> {
        let title = preferred_language(&self.attributes.title)
            .map(str::to_owned)
            .ok_or_else(|| ExtractionError {
                external_id: self.id.clone(),
            })?;

        let description = preferred_language(&self.attributes.description).map(str::to_owned);

        let mut author_external_id = None;
        let mut cover_external_id = None;
        for rel in &self.relationships {
            match rel.kind.as_str() {
                "author" => author_external_id.get_or_insert_with(|| rel.id.clone()),
                "cover_art" => cover_external_id.get_or_insert_with(|| rel.id.clone()),
                _ => continue,
            };
        }

        let tags = self
            .attributes
            .tags
            .iter()
            .filter_map(|tag| preferred_language(&tag.attributes.name).map(str::to_owned))
            .collect();

        Ok(CanonicalCatalogEntry {
            external_id: self.id,
            title,
            description,
            status: self.attributes.status,
            last_chapter: self.attributes.last_chapter,
            tags,
            author_external_id,
            cover_external_id,
            created_at: self.attributes.created_at,
            updated_at: self.attributes.updated_at,
        })
    }
}

/// Parses a provider `last_chapter`/chapter-number string into the
/// integer watermark used throughout ingest. Unparseable strings (the
/// provider sometimes uses things like "Oneshot") resolve to 0.
pub fn parse_chapter_number(raw: Option<&str>) -> i32 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .map(|n| n.floor() as i32)
        .filter(|n| *n >= 0)
        .unwrap_or(0)
}

/// Parses a provider chapter-number string into the exact `Decimal` that
/// gets persisted. Unlike `parse_chapter_number`, this keeps fractional
/// chapters (e.g. "181.5") distinct instead of flooring them, since the
/// `chapters` table's uniqueness is keyed on the full decimal value.
/// Unparseable strings resolve to `None`; callers should not persist a
/// chapter whose number could not be parsed.
pub fn parse_chapter_decimal(raw: Option<&str>) -> Option<Decimal> {
    let raw = raw?.trim();
    Decimal::from_str(raw).ok().filter(|n| !n.is_sign_negative())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn prefers_en() {
        let m = map(&[("fr", "Bonjour"), ("en", "Hello"), ("ja", "Konnichiwa")]);
        assert_eq!(preferred_language(&m), Some("Hello"));
    }

    #[test]
    fn falls_back_to_sorted_first_key() {
        let m = map(&[("ja", "Konnichiwa"), ("fr", "Bonjour")]);
        assert_eq!(preferred_language(&m), Some("Bonjour"));
    }

    #[test]
    fn empty_map_has_no_preferred_language() {
        let m = BTreeMap::new();
        assert_eq!(preferred_language(&m), None);
    }

    #[test]
    fn parses_chapter_number() {
        assert_eq!(parse_chapter_number(Some("181")), 181);
        assert_eq!(parse_chapter_number(Some("12.5")), 12);
        assert_eq!(parse_chapter_number(Some("Oneshot")), 0);
        assert_eq!(parse_chapter_number(None), 0);
    }

    #[test]
    fn parses_chapter_decimal_keeping_fractional_precision() {
        assert_eq!(parse_chapter_decimal(Some("181")), Some(Decimal::from(181)));
        assert_eq!(parse_chapter_decimal(Some("181.5")), Some(Decimal::new(1815, 1)));
        assert_eq!(parse_chapter_decimal(Some("Oneshot")), None);
        assert_eq!(parse_chapter_decimal(Some("-1")), None);
        assert_eq!(parse_chapter_decimal(None), None);
    }

    #[test]
    fn entry_without_any_title_is_rejected() {
        let entry = RawCatalogEntry {
            id: "ext-1".to_string(),
            attributes: RawCatalogAttributes {
                title: BTreeMap::new(),
                description: BTreeMap::new(),
                status: None,
                last_chapter: None,
                tags: vec![],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            relationships: vec![],
        };

        assert!(entry.into_canonical().is_err());
    }
}
