//! Record types: the sharpening log and the knife catalog.

use crate::{clock, normalize, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Quality category of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "premium_quality")]
    Premium,
    #[serde(rename = "high_quality")]
    High,
    #[serde(rename = "medium_quality")]
    Medium,
    #[serde(rename = "low_quality")]
    Low,
    #[default]
    #[serde(rename = "custom")]
    Custom,
}

impl Quality {
    /// Lenient parse: accepts `premium_quality`, `Premium`, `premium`, ...
    /// Anything unrecognised is a custom entry.
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.strip_suffix("_quality").unwrap_or(&lowered) {
            "premium" => Quality::Premium,
            "high" => Quality::High,
            "medium" => Quality::Medium,
            "low" => Quality::Low,
            _ => Quality::Custom,
        }
    }
}

/// A reference catalog entry. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnifeRecord {
    pub brand: String,
    pub series: String,
    pub steel: String,
    /// Carbon content, %
    pub carbon: String,
    /// Chromium + molybdenum + vanadium content, %
    pub crmov: String,
    pub length: String,
    pub width: String,
    /// Recommended half-angle
    pub angle: String,
    /// Extra angle for the honing stage
    pub honing_add: String,
    pub comments: String,
    pub category: Quality,
}

/// User-editable fields of a sharpening session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryDraft {
    pub brand: String,
    pub series: String,
    pub steel: String,
    pub carbon: String,
    pub crmov: String,
    pub length: String,
    pub width: String,
    pub angle: String,
    pub honing_add: String,
    pub bess: String,
    pub comments: String,
}

impl HistoryDraft {
    /// A draft with every field trimmed.
    pub fn trimmed(&self) -> Self {
        let t = |s: &String| s.trim().to_string();
        Self {
            brand: t(&self.brand),
            series: t(&self.series),
            steel: t(&self.steel),
            carbon: t(&self.carbon),
            crmov: t(&self.crmov),
            length: t(&self.length),
            width: t(&self.width),
            angle: t(&self.angle),
            honing_add: t(&self.honing_add),
            bess: t(&self.bess),
            comments: t(&self.comments),
        }
    }
}

/// A logged sharpening session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryRecord {
    /// Client-generated identifier; empty only for legacy rows
    pub id: RecordId,
    /// Human-readable local date
    pub date: String,
    /// Machine-sortable last-modified instant (RFC 3339)
    pub updated_at: String,
    pub brand: String,
    pub series: String,
    pub steel: String,
    pub carbon: String,
    pub crmov: String,
    pub length: String,
    pub width: String,
    pub angle: String,
    pub honing_add: String,
    /// Hardness-test reading
    pub bess: String,
    pub comments: String,
}

impl HistoryRecord {
    /// Build a brand-new record from a draft, stamping id, date and instant.
    pub fn create(draft: &HistoryDraft, now: Timestamp) -> Self {
        let mut record = Self {
            id: new_record_id(now),
            date: normalize::format_display_date(now.naive_utc(), true),
            updated_at: clock::format_instant(now),
            ..Self::default()
        };
        record.apply_draft(draft, now);
        record
    }

    /// Replace the descriptive fields, keeping id and display date.
    pub fn apply_draft(&mut self, draft: &HistoryDraft, now: Timestamp) {
        let draft = draft.trimmed();
        self.brand = draft.brand;
        self.series = draft.series;
        self.steel = draft.steel;
        self.carbon = draft.carbon;
        self.crmov = draft.crmov;
        self.length = draft.length;
        self.width = draft.width;
        self.angle = draft.angle;
        self.honing_add = draft.honing_add;
        self.bess = draft.bess;
        self.comments = draft.comments;
        self.updated_at = clock::format_instant(now);
    }

    /// A copy carrying only the identifier (the payload of a delete).
    pub fn identity(&self) -> Self {
        Self {
            id: self.id.clone(),
            ..Self::default()
        }
    }

    /// Non-empty id, or at least a brand for legacy id-less rows.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() || !self.brand.is_empty()
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// The instant used for last-writer-wins: `updated_at` when parseable,
    /// otherwise the display date.
    pub fn derived_instant(&self) -> Option<Timestamp> {
        clock::parse_instant(&self.updated_at)
            .or_else(|| normalize::parse_display_date(&self.date).map(|naive| naive.and_utc()))
    }

    /// Composite key used to deduplicate rows that predate identifiers.
    pub fn fingerprint(&self) -> String {
        [
            &self.date,
            &self.brand,
            &self.series,
            &self.steel,
            &self.angle,
            &self.comments,
        ]
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("\u{1f}")
    }

    /// `self` with every non-empty field of `other` laid on top.
    pub fn overlaid_with(mut self, other: &HistoryRecord) -> Self {
        for (mine, theirs) in self.fields_mut().into_iter().zip(other.fields()) {
            if !theirs.is_empty() {
                mine.clone_from(theirs);
            }
        }
        self
    }

    fn fields(&self) -> [&String; 14] {
        [
            &self.id,
            &self.date,
            &self.updated_at,
            &self.brand,
            &self.series,
            &self.steel,
            &self.carbon,
            &self.crmov,
            &self.length,
            &self.width,
            &self.angle,
            &self.honing_add,
            &self.bess,
            &self.comments,
        ]
    }

    fn fields_mut(&mut self) -> [&mut String; 14] {
        [
            &mut self.id,
            &mut self.date,
            &mut self.updated_at,
            &mut self.brand,
            &mut self.series,
            &mut self.steel,
            &mut self.carbon,
            &mut self.crmov,
            &mut self.length,
            &mut self.width,
            &mut self.angle,
            &mut self.honing_add,
            &mut self.bess,
            &mut self.comments,
        ]
    }
}

/// Generate a record id: epoch milliseconds followed by a short random suffix.
pub fn new_record_id(now: Timestamp) -> RecordId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", now.timestamp_millis(), &suffix[..5])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn create_stamps_identity_and_time() {
        let draft = HistoryDraft {
            brand: "  Tormek ".into(),
            angle: "30".into(),
            ..HistoryDraft::default()
        };
        let record = HistoryRecord::create(&draft, at(2024, 1, 1, 10));

        assert!(record.id.starts_with("1704103200000"));
        assert_eq!(record.id.len(), "1704103200000".len() + 5);
        assert_eq!(record.date, "01.01.2024 10:00");
        assert_eq!(record.updated_at, "2024-01-01T10:00:00.000Z");
        assert_eq!(record.brand, "Tormek");
        assert_eq!(record.angle, "30");
    }

    #[test]
    fn apply_draft_keeps_id_and_date() {
        let mut record = HistoryRecord::create(
            &HistoryDraft {
                brand: "Tormek".into(),
                ..HistoryDraft::default()
            },
            at(2024, 1, 1, 10),
        );
        let id = record.id.clone();
        let date = record.date.clone();

        record.apply_draft(
            &HistoryDraft {
                brand: "Mora".into(),
                comments: "resharpened".into(),
                ..HistoryDraft::default()
            },
            at(2024, 1, 5, 8),
        );

        assert_eq!(record.id, id);
        assert_eq!(record.date, date);
        assert_eq!(record.brand, "Mora");
        assert_eq!(record.updated_at, "2024-01-05T08:00:00.000Z");
    }

    #[test]
    fn derived_instant_prefers_updated_at() {
        let record = HistoryRecord {
            id: "r1".into(),
            date: "01.01.2023".into(),
            updated_at: "2024-01-02T09:00:00Z".into(),
            ..HistoryRecord::default()
        };
        assert_eq!(record.derived_instant(), Some(at(2024, 1, 2, 9)));
    }

    #[test]
    fn derived_instant_falls_back_to_display_date() {
        let record = HistoryRecord {
            id: "r1".into(),
            date: "02.01.2024 09:00".into(),
            updated_at: "not a date".into(),
            ..HistoryRecord::default()
        };
        assert_eq!(record.derived_instant(), Some(at(2024, 1, 2, 9)));

        let undated = HistoryRecord {
            id: "r2".into(),
            ..HistoryRecord::default()
        };
        assert_eq!(undated.derived_instant(), None);
    }

    #[test]
    fn overlay_takes_only_non_empty_fields() {
        let remote = HistoryRecord {
            id: "r1".into(),
            brand: "Tormek".into(),
            comments: "remote".into(),
            steel: "VG10".into(),
            ..HistoryRecord::default()
        };
        let local = HistoryRecord {
            id: "r1".into(),
            comments: "local".into(),
            ..HistoryRecord::default()
        };

        let merged = remote.overlaid_with(&local);
        assert_eq!(merged.comments, "local");
        assert_eq!(merged.brand, "Tormek");
        assert_eq!(merged.steel, "VG10");
    }

    #[test]
    fn fingerprint_ignores_case_and_padding() {
        let a = HistoryRecord {
            date: "01.01.2024".into(),
            brand: "Tormek".into(),
            angle: "30".into(),
            ..HistoryRecord::default()
        };
        let b = HistoryRecord {
            date: "01.01.2024 ".into(),
            brand: "TORMEK".into(),
            angle: "30".into(),
            bess: "120".into(), // not part of the fingerprint
            ..HistoryRecord::default()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validity_requires_id_or_brand() {
        assert!(!HistoryRecord::default().is_valid());
        assert!(HistoryRecord {
            id: "x".into(),
            ..HistoryRecord::default()
        }
        .is_valid());
        assert!(HistoryRecord {
            brand: "Tormek".into(),
            ..HistoryRecord::default()
        }
        .is_valid());
    }

    #[test]
    fn identity_strips_payload() {
        let record = HistoryRecord {
            id: "r9".into(),
            brand: "Tormek".into(),
            ..HistoryRecord::default()
        };
        assert_eq!(
            record.identity(),
            HistoryRecord {
                id: "r9".into(),
                ..HistoryRecord::default()
            }
        );
    }

    #[test]
    fn quality_parse_is_lenient() {
        assert_eq!(Quality::parse("premium_quality"), Quality::Premium);
        assert_eq!(Quality::parse("High"), Quality::High);
        assert_eq!(Quality::parse(" medium "), Quality::Medium);
        assert_eq!(Quality::parse("low_quality"), Quality::Low);
        assert_eq!(Quality::parse(""), Quality::Custom);
        assert_eq!(Quality::parse("mystery"), Quality::Custom);
    }

    #[test]
    fn serialization_format() {
        let record = HistoryRecord {
            id: "r1".into(),
            honing_add: "1".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
            ..HistoryRecord::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"honingAdd\":\"1\""));
        assert!(json.contains("\"updatedAt\""));

        let knife = KnifeRecord {
            category: Quality::Premium,
            ..KnifeRecord::default()
        };
        let json = serde_json::to_string(&knife).unwrap();
        assert!(json.contains("\"category\":\"premium_quality\""));
    }
}
