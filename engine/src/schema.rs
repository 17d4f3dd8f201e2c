//! Field definitions for the two record kinds.
//!
//! Remote rows come from a spreadsheet whose column headers changed over
//! time ("C, %" vs "carbon", "Honing add" vs "honingAdd"). Each canonical
//! field lists every key it may arrive under; the normalizer walks that list
//! and takes the first non-empty value.

/// Definition of a canonical field and the keys it may arrive under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Canonical (serialized) field name
    pub name: &'static str,
    /// Keys checked in order; spreadsheet headers come before the canonical name
    pub keys: &'static [&'static str],
}

impl FieldDef {
    const fn new(name: &'static str, keys: &'static [&'static str]) -> Self {
        Self { name, keys }
    }
}

/// Fields of a logged sharpening session.
pub mod history {
    use super::FieldDef;

    pub const ID: FieldDef = FieldDef::new("id", &["ID", "Id", "id"]);
    pub const DATE: FieldDef = FieldDef::new("date", &["Date", "date"]);
    pub const UPDATED_AT: FieldDef = FieldDef::new(
        "updatedAt",
        &[
            "Updated At",
            "UpdatedAt",
            "Last modified",
            "updatedAt",
            "updated_at",
            "lastModified",
        ],
    );
    pub const BRAND: FieldDef = FieldDef::new("brand", &["Brand", "brand"]);
    pub const SERIES: FieldDef = FieldDef::new("series", &["Series", "series"]);
    pub const STEEL: FieldDef = FieldDef::new("steel", &["Steel", "steel"]);
    pub const CARBON: FieldDef = FieldDef::new("carbon", &["C, %", "C %", "carbon"]);
    pub const CRMOV: FieldDef = FieldDef::new("crmov", &["CrMoV, %", "CrMoV %", "CrMoV", "crmov"]);
    pub const LENGTH: FieldDef = FieldDef::new("length", &["Length", "length"]);
    pub const WIDTH: FieldDef = FieldDef::new("width", &["Width", "width"]);
    pub const ANGLE: FieldDef =
        FieldDef::new("angle", &["Sharp. angle (double)", "Angle", "angle"]);
    pub const HONING_ADD: FieldDef =
        FieldDef::new("honingAdd", &["Honing add", "honingAdd", "honing_add"]);
    pub const BESS: FieldDef = FieldDef::new("bess", &["BESS g", "BESS", "bess"]);
    pub const COMMENTS: FieldDef = FieldDef::new("comments", &["Comments", "comments"]);

    /// Every history field, in display order.
    pub const ALL: [FieldDef; 14] = [
        ID, DATE, UPDATED_AT, BRAND, SERIES, STEEL, CARBON, CRMOV, LENGTH, WIDTH, ANGLE,
        HONING_ADD, BESS, COMMENTS,
    ];
}

/// Fields of a reference catalog entry.
pub mod knife {
    use super::FieldDef;

    pub const BRAND: FieldDef = FieldDef::new("brand", &["Brand", "brand"]);
    pub const SERIES: FieldDef = FieldDef::new("series", &["Series", "series"]);
    pub const STEEL: FieldDef = FieldDef::new("steel", &["Steel", "steel"]);
    pub const CARBON: FieldDef = FieldDef::new("carbon", &["C, %", "C %", "carbon"]);
    pub const CRMOV: FieldDef = FieldDef::new("crmov", &["CrMoV, %", "CrMoV %", "CrMoV", "crmov"]);
    pub const LENGTH: FieldDef = FieldDef::new("length", &["Length", "length"]);
    pub const WIDTH: FieldDef = FieldDef::new("width", &["Width", "width"]);
    pub const ANGLE: FieldDef = FieldDef::new("angle", &["Angle", "angle"]);
    pub const HONING_ADD: FieldDef =
        FieldDef::new("honingAdd", &["Honing add", "honing_add", "honingAdd"]);
    pub const COMMENTS: FieldDef = FieldDef::new("comments", &["Comments", "comments"]);
    pub const CATEGORY: FieldDef =
        FieldDef::new("category", &["Category", "Quality", "category"]);
}
