//! The closed set of metadata fields a provider can supply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A single metadata field of a scraped entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    OriginalTitle,
    Year,
    Plot,
    Tagline,
    Rating,
    Runtime,
    Genres,
    Studios,
    Countries,
    Certification,
    Cast,
    Directors,
    Writers,
    Tags,
    Poster,
    Backdrop,
    Logo,
    Banner,
    Thumbnail,
    SeasonPoster,
    SeasonBackdrop,
    Network,
    FirstAired,
    Status,
    Biography,
    Discography,
    Label,
    ReleaseDate,
    Tracks,
    Trailer,
    Collection,
}

impl Field {
    /// Every field, in declaration order.
    pub const ALL: [Field; 32] = [
        Self::Title,
        Self::OriginalTitle,
        Self::Year,
        Self::Plot,
        Self::Tagline,
        Self::Rating,
        Self::Runtime,
        Self::Genres,
        Self::Studios,
        Self::Countries,
        Self::Certification,
        Self::Cast,
        Self::Directors,
        Self::Writers,
        Self::Tags,
        Self::Poster,
        Self::Backdrop,
        Self::Logo,
        Self::Banner,
        Self::Thumbnail,
        Self::SeasonPoster,
        Self::SeasonBackdrop,
        Self::Network,
        Self::FirstAired,
        Self::Status,
        Self::Biography,
        Self::Discography,
        Self::Label,
        Self::ReleaseDate,
        Self::Tracks,
        Self::Trailer,
        Self::Collection,
    ];

    /// The snake_case name used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::OriginalTitle => "original_title",
            Self::Year => "year",
            Self::Plot => "plot",
            Self::Tagline => "tagline",
            Self::Rating => "rating",
            Self::Runtime => "runtime",
            Self::Genres => "genres",
            Self::Studios => "studios",
            Self::Countries => "countries",
            Self::Certification => "certification",
            Self::Cast => "cast",
            Self::Directors => "directors",
            Self::Writers => "writers",
            Self::Tags => "tags",
            Self::Poster => "poster",
            Self::Backdrop => "backdrop",
            Self::Logo => "logo",
            Self::Banner => "banner",
            Self::Thumbnail => "thumbnail",
            Self::SeasonPoster => "season_poster",
            Self::SeasonBackdrop => "season_backdrop",
            Self::Network => "network",
            Self::FirstAired => "first_aired",
            Self::Status => "status",
            Self::Biography => "biography",
            Self::Discography => "discography",
            Self::Label => "label",
            Self::ReleaseDate => "release_date",
            Self::Tracks => "tracks",
            Self::Trailer => "trailer",
            Self::Collection => "collection",
        }
    }

    /// Returns `true` for image fields (posters, backdrops, logos, ...).
    pub fn is_artwork(self) -> bool {
        matches!(
            self,
            Self::Poster
                | Self::Backdrop
                | Self::Logo
                | Self::Banner
                | Self::Thumbnail
                | Self::SeasonPoster
                | Self::SeasonBackdrop
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == wanted)
            .ok_or_else(|| Error::parse("field", s))
    }
}
