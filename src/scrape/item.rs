//! Local media items submitted for scraping.

use reelscrape_common::{CanonicalId, ChildKey, ItemId, MediaKind, ProviderName};
use serde::{Deserialize, Serialize};

use super::classify::ScrapeError;

/// What is known locally about the parent of a season, episode or album.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    /// Title of the show or artist.
    pub title: String,
    /// Premiere year, if known.
    #[serde(default)]
    pub year: Option<u16>,
    /// Ids already known for the parent (e.g. read from an existing NFO).
    #[serde(default)]
    pub known_ids: Vec<CanonicalId>,
}

impl ParentRef {
    /// A parent known only by its title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builder: set the year.
    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    /// Builder: add a known id.
    pub fn with_id(mut self, id: CanonicalId) -> Self {
        self.known_ids.push(id);
        self
    }
}

/// One local item to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Local identifier. Generated when absent from a manifest.
    #[serde(default)]
    pub id: ItemId,
    /// Kind of entity the item is.
    pub kind: MediaKind,
    /// Title used for searching.
    #[serde(default)]
    pub title: String,
    /// Release year, used to pick between search candidates.
    #[serde(default)]
    pub year: Option<u16>,
    /// Ids already known for the item. A known id skips the search.
    #[serde(default)]
    pub known_ids: Vec<CanonicalId>,
    /// The show or artist a dependent item belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    /// Season/episode number or album title below the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_key: Option<ChildKey>,
}

impl MediaItem {
    /// A new item with a fresh id.
    pub fn new(kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            kind,
            title: title.into(),
            year: None,
            known_ids: Vec::new(),
            parent: None,
            child_key: None,
        }
    }

    /// A movie with a release year.
    pub fn movie(title: impl Into<String>, year: u16) -> Self {
        Self::new(MediaKind::Movie, title).with_year(year)
    }

    /// An episode of a show.
    pub fn episode(show: ParentRef, season: u32, episode: u32) -> Self {
        Self::new(MediaKind::Episode, String::new())
            .with_parent(show)
            .with_child(ChildKey::Episode { season, episode })
    }

    /// A season of a show.
    pub fn season(show: ParentRef, season: u32) -> Self {
        Self::new(MediaKind::Season, String::new())
            .with_parent(show)
            .with_child(ChildKey::Season { season })
    }

    /// Builder: set the year.
    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    /// Builder: add a known id.
    pub fn with_id(mut self, id: CanonicalId) -> Self {
        self.known_ids.push(id);
        self
    }

    /// Builder: set the parent.
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Builder: set the child key.
    pub fn with_child(mut self, key: ChildKey) -> Self {
        self.child_key = Some(key);
        self
    }

    /// The known id in `provider`'s namespace, if any.
    pub fn known_id(&self, provider: &ProviderName) -> Option<&CanonicalId> {
        reelscrape_common::id_for(&self.known_ids, provider)
    }

    /// Human-readable label for progress output, e.g. `Heat (1995)` or
    /// `The Wire S01E03`.
    pub fn label(&self) -> String {
        let name = match (&self.parent, &self.child_key) {
            (Some(parent), Some(key)) if self.title.is_empty() => format!("{} {key}", parent.title),
            (Some(parent), Some(key)) => format!("{} {key} {}", parent.title, self.title),
            _ => self.title.clone(),
        };
        match self.year {
            Some(year) if self.parent.is_none() => format!("{name} ({year})"),
            _ => name,
        }
    }

    /// Check that a dependent item carries what is needed to locate it.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        let label = self.label();
        match (self.kind.is_dependent(), &self.parent, &self.child_key) {
            (true, None, _) => Err(ScrapeError::invalid_config(format!(
                "{} '{label}' has no parent",
                self.kind
            ))),
            (true, Some(_), None) => Err(ScrapeError::invalid_config(format!(
                "{} '{label}' has no season/episode/album key",
                self.kind
            ))),
            (_, _, Some(key)) if key.kind() != self.kind => Err(ScrapeError::invalid_config(
                format!("{} '{label}' carries a {} key", self.kind, key.kind()),
            )),
            _ => Ok(()),
        }
    }
}
