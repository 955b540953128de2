//! Core type definitions for media kinds, locales, and provider identity.
//!
//! Enums are serialized in snake_case so that manifests and configuration
//! files can refer to them with the same spelling the CLI accepts.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Kind of entity a scrape targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A single movie.
    Movie,
    /// A TV series (show).
    TvShow,
    /// A season within a show.
    Season,
    /// A single episode within a season.
    Episode,
    /// A music artist or band.
    Artist,
    /// A music album by an artist.
    Album,
    /// A recorded concert.
    Concert,
}

impl MediaKind {
    /// Every kind, in declaration order.
    pub const ALL: [MediaKind; 7] = [
        Self::Movie,
        Self::TvShow,
        Self::Season,
        Self::Episode,
        Self::Artist,
        Self::Album,
        Self::Concert,
    ];

    /// The kind whose canonical id this kind needs before it can be fetched.
    ///
    /// Seasons and episodes hang off their show, albums off their artist.
    pub fn parent(self) -> Option<MediaKind> {
        match self {
            Self::Season | Self::Episode => Some(Self::TvShow),
            Self::Album => Some(Self::Artist),
            Self::Movie | Self::TvShow | Self::Artist | Self::Concert => None,
        }
    }

    /// Returns `true` for kinds that depend on a parent entity.
    pub fn is_dependent(self) -> bool {
        self.parent().is_some()
    }

    /// The snake_case name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::TvShow => "tv_show",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Concert => "concert",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "movie" => Ok(Self::Movie),
            "tv_show" | "tvshow" | "show" => Ok(Self::TvShow),
            "season" => Ok(Self::Season),
            "episode" => Ok(Self::Episode),
            "artist" => Ok(Self::Artist),
            "album" => Ok(Self::Album),
            "concert" => Ok(Self::Concert),
            _ => Err(Error::parse("media kind", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// ChildKey
// ---------------------------------------------------------------------------

/// Locates a dependent entity below its parent (season number, episode
/// number, album title).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildKey {
    /// A season of a show.
    Season { season: u32 },
    /// An episode of a show.
    Episode { season: u32, episode: u32 },
    /// An album of an artist.
    Album { title: String },
}

impl ChildKey {
    /// The media kind this key addresses.
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Season { .. } => MediaKind::Season,
            Self::Episode { .. } => MediaKind::Episode,
            Self::Album { .. } => MediaKind::Album,
        }
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Season { season } => write!(f, "S{season:02}"),
            Self::Episode { season, episode } => write!(f, "S{season:02}E{episode:02}"),
            Self::Album { title } => write!(f, "album '{title}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// Locale
// ---------------------------------------------------------------------------

/// A language tag such as `en-US` or `de`.
///
/// The language part is stored lowercase and the optional country part
/// uppercase, so `"EN-us"` and `"en-US"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Parse a locale tag, normalizing its case.
    pub fn new(tag: &str) -> crate::Result<Self> {
        tag.parse()
    }

    /// English (United States), the fallback for every provider.
    pub fn english() -> Self {
        Self("en-US".to_string())
    }

    /// The full tag, e.g. `"en-US"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ISO-639-1 language part, e.g. `"en"`.
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// The ISO-3166 country part, if present.
    pub fn country(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, country)| country)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::english()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().replace('_', "-");
        let (language, country) = match tag.split_once('-') {
            Some((language, country)) => (language, Some(country)),
            None => (tag.as_str(), None),
        };

        let language_ok =
            (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic());
        let country_ok = country
            .map(|c| c.len() == 2 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
            .unwrap_or(true);
        if !language_ok || !country_ok {
            return Err(Error::parse("locale", s));
        }

        let normalized = match country {
            Some(country) => format!(
                "{}-{}",
                language.to_ascii_lowercase(),
                country.to_ascii_uppercase()
            ),
            None => language.to_ascii_lowercase(),
        };
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Locale {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

// ---------------------------------------------------------------------------
// ProviderName
// ---------------------------------------------------------------------------

/// Short, lowercase identifier of a metadata provider (e.g. `"tmdb"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderName(String);

impl ProviderName {
    /// Create a provider name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ProviderName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ProviderName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ProviderName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ProviderName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ---------------------------------------------------------------------------
// CanonicalId
// ---------------------------------------------------------------------------

/// A provider-scoped identifier for one real-world entity.
///
/// Ids from different providers are never comparable; two `CanonicalId`s are
/// equal only when both the provider and the value match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalId {
    /// Namespace the id belongs to.
    pub provider: ProviderName,
    /// Opaque id value within that namespace.
    #[serde(rename = "id")]
    pub value: String,
}

impl CanonicalId {
    /// Create an id in the given provider namespace.
    pub fn new(provider: impl Into<ProviderName>, value: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            value: value.into(),
        }
    }

    /// Returns `true` if this id lives in the namespace of `provider`.
    pub fn is_from(&self, provider: &ProviderName) -> bool {
        &self.provider == provider
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.value)
    }
}

impl FromStr for CanonicalId {
    type Err = Error;

    /// Parse the `provider:value` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider, value)) if !provider.is_empty() && !value.is_empty() => {
                Ok(Self::new(provider, value))
            }
            _ => Err(Error::parse("canonical id", s)),
        }
    }
}

/// Find the id belonging to `provider` in a list of ids.
pub fn id_for<'a>(ids: &'a [CanonicalId], provider: &ProviderName) -> Option<&'a CanonicalId> {
    ids.iter().find(|id| id.is_from(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_serialization() {
        let json = serde_json::to_string(&MediaKind::TvShow).unwrap();
        assert_eq!(json, r#""tv_show""#);

        let kind: MediaKind = serde_json::from_str(r#""episode""#).unwrap();
        assert_eq!(kind, MediaKind::Episode);
    }

    #[test]
    fn test_media_kind_from_str_aliases() {
        assert_eq!("tvshow".parse::<MediaKind>().unwrap(), MediaKind::TvShow);
        assert_eq!("TV-Show".parse::<MediaKind>().unwrap(), MediaKind::TvShow);
        assert!("podcast".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_media_kind_parents() {
        assert_eq!(MediaKind::Season.parent(), Some(MediaKind::TvShow));
        assert_eq!(MediaKind::Episode.parent(), Some(MediaKind::TvShow));
        assert_eq!(MediaKind::Album.parent(), Some(MediaKind::Artist));
        assert!(!MediaKind::Movie.is_dependent());
        assert!(!MediaKind::Concert.is_dependent());
    }

    #[test]
    fn test_child_key_display() {
        assert_eq!(ChildKey::Season { season: 2 }.to_string(), "S02");
        assert_eq!(
            ChildKey::Episode {
                season: 1,
                episode: 12
            }
            .to_string(),
            "S01E12"
        );
        assert_eq!(
            ChildKey::Album {
                title: "Blue".into()
            }
            .kind(),
            MediaKind::Album
        );
    }

    #[test]
    fn test_locale_normalization() {
        let locale: Locale = "EN_us".parse().unwrap();
        assert_eq!(locale.as_str(), "en-US");
        assert_eq!(locale.language(), "en");
        assert_eq!(locale.country(), Some("US"));

        let bare: Locale = "de".parse().unwrap();
        assert_eq!(bare.country(), None);

        assert!("english".parse::<Locale>().is_err());
        assert!("en-USA".parse::<Locale>().is_err());
    }

    #[test]
    fn test_locale_serde_validates() {
        let locale: Locale = serde_json::from_str(r#""pt-br""#).unwrap();
        assert_eq!(locale.as_str(), "pt-BR");
        assert!(serde_json::from_str::<Locale>(r#""x""#).is_err());
    }

    #[test]
    fn test_canonical_id_display_and_parse() {
        let id = CanonicalId::new("tmdb", "603");
        assert_eq!(id.to_string(), "tmdb:603");
        assert_eq!("tmdb:603".parse::<CanonicalId>().unwrap(), id);
        assert!("603".parse::<CanonicalId>().is_err());
        assert!(":603".parse::<CanonicalId>().is_err());
    }

    #[test]
    fn test_canonical_id_namespaces_differ() {
        let a = CanonicalId::new("tmdb", "42");
        let b = CanonicalId::new("tvdb", "42");
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_for() {
        let ids = vec![
            CanonicalId::new("imdb", "tt0133093"),
            CanonicalId::new("tmdb", "603"),
        ];
        let tmdb = ProviderName::from("tmdb");
        assert_eq!(id_for(&ids, &tmdb).map(|id| id.value.as_str()), Some("603"));
        assert!(id_for(&ids, &ProviderName::from("tvdb")).is_none());
    }
}
