//! Field values, provenance, and the merged record handed to the NFO writer.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fields::Field;
use crate::ids::ItemId;
use crate::types::{CanonicalId, MediaKind, ProviderName};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A person credited on an entity (actor, director, writer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Display name.
    pub name: String,
    /// Character name or job, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Portrait URL, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
}

impl Person {
    /// A person with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            thumb: None,
        }
    }
}

/// A single image with sizing and language metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Fully-qualified URL to the image.
    pub url: String,
    /// Image width in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Image height in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// ISO-639-1 language code for the image content, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Image {
    /// An image known only by its URL.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
            language: None,
        }
    }
}

/// The value of one metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    List(Vec<String>),
    People(Vec<Person>),
    Images(Vec<Image>),
}

impl Value {
    /// The text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` when the value carries no information (empty text or
    /// empty list). Providers drop such values instead of reporting them.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::People(people) => people.is_empty(),
            Self::Images(images) => images.is_empty(),
            Self::Integer(_) | Self::Decimal(_) | Self::Date(_) => false,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Decimal(n)
    }
}

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        Self::Date(date)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// A field value together with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// The value itself.
    pub value: Value,
    /// The provider that supplied `value`.
    pub provenance: ProviderName,
}

impl FieldValue {
    /// Tag a value with its provider.
    pub fn new(value: Value, provenance: ProviderName) -> Self {
        Self { value, provenance }
    }
}

// ---------------------------------------------------------------------------
// MergedRecord
// ---------------------------------------------------------------------------

/// The canonical metadata record of one local item after merging.
///
/// Every field holds exactly one [`FieldValue`]; [`MergedRecord::insert`]
/// refuses to replace an existing entry so a field can never end up with two
/// provenances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// The local item this record describes.
    pub item_id: ItemId,
    /// Kind of the described entity.
    pub kind: MediaKind,
    /// Every canonical id discovered for the entity, one per provider.
    pub ids: Vec<CanonicalId>,
    /// Field values keyed by field.
    pub fields: BTreeMap<Field, FieldValue>,
}

impl MergedRecord {
    /// An empty record for an item.
    pub fn new(item_id: ItemId, kind: MediaKind) -> Self {
        Self {
            item_id,
            kind,
            ids: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Insert a field value. Returns `false` and leaves the record unchanged
    /// when the field already has a value.
    pub fn insert(&mut self, field: Field, value: FieldValue) -> bool {
        match self.fields.entry(field) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Record a canonical id. The first id seen for a provider wins.
    pub fn add_id(&mut self, id: CanonicalId) {
        if !self.ids.iter().any(|known| known.provider == id.provider) {
            self.ids.push(id);
        }
    }

    /// The value of a field, if present.
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.fields.get(&field).map(|fv| &fv.value)
    }

    /// The provider that supplied a field, if present.
    pub fn provenance(&self, field: Field) -> Option<&ProviderName> {
        self.fields.get(&field).map(|fv| &fv.provenance)
    }

    /// The set of fields present in the record.
    pub fn field_set(&self) -> BTreeSet<Field> {
        self.fields.keys().copied().collect()
    }

    /// The id for a given provider, if one was discovered.
    pub fn id_for(&self, provider: &ProviderName) -> Option<&CanonicalId> {
        crate::types::id_for(&self.ids, provider)
    }

    /// Returns `true` if no field has a value.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
