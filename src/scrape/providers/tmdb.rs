//! TMDB (The Movie Database) metadata provider.
//!
//! Implements [`Provider`] by querying the TMDB v3 REST API for movies, shows,
//! seasons and episodes.
//!
//! Features:
//! - Confidence scoring based on title similarity and year proximity.
//! - IMDb ids (`tt1234567`) are resolved through TMDB's `/find` endpoint.
//! - Credits and artwork are appended to the detail request, so one fetch is
//!   one HTTP request.
//!
//! Rate limiting, deadlines and 429 retries are applied by the engine; this
//! client performs exactly one request per call and reports HTTP failures as
//! [`ProviderError::Status`] (with `Retry-After` when present).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use reelscrape_common::{CanonicalId, ChildKey, Field, Image, Locale, MediaKind, Person, Value};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::scrape::classify::{parse_retry_after, ProviderError};
use crate::scrape::provider::{
    FetchedEntity, IdFormat, Provider, ProviderDescriptor, RateLimitPolicy, ScrapeRequest,
    ScrapeTarget, SearchQuery, SearchResult, SearchTerm,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Registry name of this provider.
pub const TMDB: &str = "tmdb";

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";
const IMDB_ID_PATTERN: &str = r"^tt\d{7,8}$";

// ---------------------------------------------------------------------------
// TMDB API response types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    movie_results: Vec<TmdbMovieSearchResult>,
    #[serde(default)]
    tv_results: Vec<TmdbTvSearchResult>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieSearchResult {
    id: u64,
    title: Option<String>,
    release_date: Option<String>,
    overview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbTvSearchResult {
    id: u64,
    name: Option<String>,
    first_air_date: Option<String>,
    overview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieDetail {
    id: u64,
    title: Option<String>,
    original_title: Option<String>,
    overview: Option<String>,
    tagline: Option<String>,
    release_date: Option<String>,
    vote_average: Option<f64>,
    runtime: Option<u32>,
    #[serde(default)]
    genres: Vec<TmdbNamed>,
    #[serde(default)]
    production_companies: Vec<TmdbNamed>,
    #[serde(default)]
    production_countries: Vec<TmdbNamed>,
    belongs_to_collection: Option<TmdbNamed>,
    imdb_id: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    credits: Option<TmdbCredits>,
    images: Option<TmdbImagesResponse>,
}

#[derive(Debug, Deserialize)]
struct TmdbTvDetail {
    id: u64,
    name: Option<String>,
    original_name: Option<String>,
    overview: Option<String>,
    first_air_date: Option<String>,
    vote_average: Option<f64>,
    #[serde(default)]
    episode_run_time: Vec<u32>,
    #[serde(default)]
    genres: Vec<TmdbNamed>,
    #[serde(default)]
    networks: Vec<TmdbNamed>,
    status: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    #[serde(default)]
    seasons: Vec<TmdbSeasonSummary>,
    external_ids: Option<TmdbExternalIds>,
    credits: Option<TmdbCredits>,
    images: Option<TmdbImagesResponse>,
}

#[derive(Debug, Deserialize)]
struct TmdbSeasonSummary {
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbSeasonDetail {
    id: u64,
    name: Option<String>,
    overview: Option<String>,
    air_date: Option<String>,
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbEpisodeDetail {
    id: u64,
    name: Option<String>,
    overview: Option<String>,
    air_date: Option<String>,
    vote_average: Option<f64>,
    runtime: Option<u32>,
    still_path: Option<String>,
    #[serde(default)]
    crew: Vec<TmdbCrew>,
}

#[derive(Debug, Deserialize)]
struct TmdbNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbExternalIds {
    imdb_id: Option<String>,
    tvdb_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TmdbCredits {
    #[serde(default)]
    cast: Vec<TmdbCast>,
    #[serde(default)]
    crew: Vec<TmdbCrew>,
}

#[derive(Debug, Deserialize)]
struct TmdbCast {
    name: String,
    character: Option<String>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbCrew {
    name: String,
    job: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TmdbImagesResponse {
    #[serde(default)]
    logos: Vec<TmdbImage>,
}

#[derive(Debug, Deserialize)]
struct TmdbImage {
    file_path: String,
    width: u32,
    height: u32,
    iso_639_1: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider implementation
// ---------------------------------------------------------------------------

/// TMDB metadata provider.
///
/// # Examples
///
/// ```no_run
/// use reelscrape::scrape::providers::TmdbProvider;
///
/// let provider = TmdbProvider::new("your-api-key");
/// ```
pub struct TmdbProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    descriptor: ProviderDescriptor,
}

impl TmdbProvider {
    /// Create a provider talking to the public TMDB API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: TMDB_BASE_URL.to_string(),
            descriptor: Self::default_descriptor(),
        }
    }

    /// Builder: talk to a different API root (a proxy or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: set the locale used when a request's locale is unsupported.
    pub fn with_default_locale(mut self, locale: Locale) -> Self {
        self.descriptor.default_locale = locale;
        self
    }

    /// What TMDB can supply, at TMDB's documented limit of roughly four
    /// requests per second.
    pub fn default_descriptor() -> ProviderDescriptor {
        let descriptor = ProviderDescriptor::new(TMDB, "The Movie Database")
            .with_kind(
                MediaKind::Movie,
                [
                    Field::Title,
                    Field::OriginalTitle,
                    Field::Year,
                    Field::Plot,
                    Field::Tagline,
                    Field::Rating,
                    Field::Runtime,
                    Field::Genres,
                    Field::Studios,
                    Field::Countries,
                    Field::Cast,
                    Field::Directors,
                    Field::Writers,
                    Field::Poster,
                    Field::Backdrop,
                    Field::Logo,
                    Field::ReleaseDate,
                    Field::Collection,
                ],
            )
            .with_kind(
                MediaKind::TvShow,
                [
                    Field::Title,
                    Field::OriginalTitle,
                    Field::Year,
                    Field::Plot,
                    Field::Rating,
                    Field::Runtime,
                    Field::Genres,
                    Field::Network,
                    Field::FirstAired,
                    Field::Status,
                    Field::Cast,
                    Field::Poster,
                    Field::Backdrop,
                    Field::Logo,
                    Field::SeasonPoster,
                ],
            )
            .with_kind(
                MediaKind::Season,
                [Field::Title, Field::Plot, Field::FirstAired, Field::Poster, Field::SeasonPoster],
            )
            .with_kind(
                MediaKind::Episode,
                [
                    Field::Title,
                    Field::Plot,
                    Field::FirstAired,
                    Field::Rating,
                    Field::Runtime,
                    Field::Thumbnail,
                    Field::Directors,
                    Field::Writers,
                ],
            )
            .with_rate_limit(RateLimitPolicy {
                requests_per_second: 4,
                burst: 4,
            });
        match IdFormat::new("imdb", IMDB_ID_PATTERN) {
            Ok(format) => descriptor.with_id_format(format),
            Err(_) => descriptor,
        }
    }

    /// Execute one GET request and decode the JSON body.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        locale: &Locale,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "TMDB request");

        let resp = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", locale.as_str())])
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Compute confidence score for a search result based on title similarity
    /// and year proximity.
    fn confidence(
        query_title: &str,
        result_title: &str,
        query_year: Option<u16>,
        result_year: Option<u16>,
    ) -> f64 {
        // Title scoring
        let base = if query_title == result_title {
            0.5
        } else if query_title.eq_ignore_ascii_case(result_title) {
            0.4
        } else if result_title
            .to_ascii_lowercase()
            .contains(&query_title.to_ascii_lowercase())
        {
            0.2
        } else {
            0.1
        };

        // Year scoring
        let year_bonus = match (query_year, result_year) {
            (Some(q), Some(r)) if q == r => 0.3,
            (Some(q), Some(r)) if q.abs_diff(r) <= 1 => 0.15,
            _ => 0.0,
        };

        base + year_bonus
    }

    async fn search_text(
        &self,
        kind: MediaKind,
        title: &str,
        year: Option<u16>,
        locale: &Locale,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let mut params = vec![("query", title.to_string())];
        let mut results: Vec<SearchResult> = match kind {
            MediaKind::Movie => {
                if let Some(y) = year {
                    params.push(("year", y.to_string()));
                }
                let body: TmdbSearchResponse<TmdbMovieSearchResult> =
                    self.get("/search/movie", locale, &params).await?;
                body.results
                    .into_iter()
                    .map(|r| r.into_result(title, year))
                    .collect()
            }
            MediaKind::TvShow => {
                if let Some(y) = year {
                    params.push(("first_air_date_year", y.to_string()));
                }
                let body: TmdbSearchResponse<TmdbTvSearchResult> =
                    self.get("/search/tv", locale, &params).await?;
                body.results
                    .into_iter()
                    .map(|r| r.into_result(title, year))
                    .collect()
            }
            other => return Err(ProviderError::Unsupported(format!("cannot search {other}"))),
        };

        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, result) in results.iter_mut().enumerate() {
            result.rank = rank;
        }
        Ok(results)
    }

    /// Resolve a known id to exactly one candidate.
    async fn lookup(
        &self,
        kind: MediaKind,
        id: &CanonicalId,
        locale: &Locale,
    ) -> Result<SearchResult, ProviderError> {
        let not_found = || ProviderError::NotFound(format!("no {kind} with id {id}"));
        match (id.provider.as_str(), kind) {
            ("imdb", MediaKind::Movie | MediaKind::TvShow) => {
                let body: TmdbFindResponse = self
                    .get(
                        &format!("/find/{}", id.value),
                        locale,
                        &[("external_source", "imdb_id".to_string())],
                    )
                    .await?;
                let found = if kind == MediaKind::Movie {
                    body.movie_results
                        .into_iter()
                        .next()
                        .map(|r| r.into_result("", None))
                } else {
                    body.tv_results.into_iter().next().map(|r| r.into_result("", None))
                };
                found
                    .map(|r| SearchResult { confidence: 1.0, ..r })
                    .ok_or_else(not_found)
            }
            (TMDB, MediaKind::Movie) => {
                let detail: TmdbMovieDetail =
                    self.get(&format!("/movie/{}", id.value), locale, &[]).await?;
                Ok(SearchResult {
                    id: CanonicalId::new(TMDB, detail.id.to_string()),
                    title: detail.title.unwrap_or_default(),
                    year: parse_year(&detail.release_date),
                    overview: detail.overview,
                    confidence: 1.0,
                    rank: 0,
                })
            }
            (TMDB, MediaKind::TvShow) => {
                let detail: TmdbTvDetail =
                    self.get(&format!("/tv/{}", id.value), locale, &[]).await?;
                Ok(SearchResult {
                    id: CanonicalId::new(TMDB, detail.id.to_string()),
                    title: detail.name.unwrap_or_default(),
                    year: parse_year(&detail.first_air_date),
                    overview: detail.overview,
                    confidence: 1.0,
                    rank: 0,
                })
            }
            _ => Err(ProviderError::Unsupported(format!(
                "cannot look up {kind} by {id}"
            ))),
        }
    }

    async fn fetch_movie(&self, id: &str, locale: &Locale) -> Result<FetchedEntity, ProviderError> {
        let detail: TmdbMovieDetail = self
            .get(
                &format!("/movie/{id}"),
                locale,
                &[
                    ("append_to_response", "credits,images".to_string()),
                    ("include_image_language", format!("{},null", locale.language())),
                ],
            )
            .await?;

        let mut ids = vec![CanonicalId::new(TMDB, detail.id.to_string())];
        if let Some(imdb) = detail.imdb_id.filter(|s| !s.is_empty()) {
            ids.push(CanonicalId::new("imdb", imdb));
        }

        let credits = detail.credits.unwrap_or_default();
        let mut fields = BTreeMap::new();
        set(&mut fields, Field::Title, detail.title.map(Value::Text));
        set(&mut fields, Field::OriginalTitle, detail.original_title.map(Value::Text));
        set(
            &mut fields,
            Field::Year,
            parse_year(&detail.release_date).map(|y| Value::Integer(y.into())),
        );
        set(&mut fields, Field::ReleaseDate, parse_date(&detail.release_date).map(Value::Date));
        set(&mut fields, Field::Plot, detail.overview.map(Value::Text));
        set(&mut fields, Field::Tagline, detail.tagline.map(Value::Text));
        set(&mut fields, Field::Rating, detail.vote_average.map(Value::Decimal));
        set(&mut fields, Field::Runtime, detail.runtime.map(|m| Value::Integer(m.into())));
        set(&mut fields, Field::Genres, Some(names(detail.genres)));
        set(&mut fields, Field::Studios, Some(names(detail.production_companies)));
        set(&mut fields, Field::Countries, Some(names(detail.production_countries)));
        set(
            &mut fields,
            Field::Collection,
            detail.belongs_to_collection.map(|c| Value::Text(c.name)),
        );
        set(&mut fields, Field::Cast, Some(cast(credits.cast)));
        set(&mut fields, Field::Directors, Some(crew(&credits.crew, &["Director"])));
        set(
            &mut fields,
            Field::Writers,
            Some(crew(&credits.crew, &["Screenplay", "Writer"])),
        );
        set(&mut fields, Field::Poster, detail.poster_path.map(|p| single_image(&p)));
        set(&mut fields, Field::Backdrop, detail.backdrop_path.map(|p| single_image(&p)));
        set(
            &mut fields,
            Field::Logo,
            detail.images.map(|images| logos(images.logos)),
        );

        Ok(FetchedEntity { ids, fields })
    }

    async fn fetch_show(&self, id: &str, locale: &Locale) -> Result<FetchedEntity, ProviderError> {
        let detail: TmdbTvDetail = self
            .get(
                &format!("/tv/{id}"),
                locale,
                &[
                    ("append_to_response", "external_ids,credits,images".to_string()),
                    ("include_image_language", format!("{},null", locale.language())),
                ],
            )
            .await?;

        let mut ids = vec![CanonicalId::new(TMDB, detail.id.to_string())];
        if let Some(ext) = &detail.external_ids {
            if let Some(imdb) = ext.imdb_id.as_ref().filter(|s| !s.is_empty()) {
                ids.push(CanonicalId::new("imdb", imdb.clone()));
            }
            if let Some(tvdb) = ext.tvdb_id {
                ids.push(CanonicalId::new("tvdb", tvdb.to_string()));
            }
        }

        let season_posters: Vec<Image> = detail
            .seasons
            .iter()
            .filter_map(|s| s.poster_path.as_deref())
            .map(|p| Image::url(image_url(p)))
            .collect();

        let credits = detail.credits.unwrap_or_default();
        let mut fields = BTreeMap::new();
        set(&mut fields, Field::Title, detail.name.map(Value::Text));
        set(&mut fields, Field::OriginalTitle, detail.original_name.map(Value::Text));
        set(
            &mut fields,
            Field::Year,
            parse_year(&detail.first_air_date).map(|y| Value::Integer(y.into())),
        );
        set(&mut fields, Field::FirstAired, parse_date(&detail.first_air_date).map(Value::Date));
        set(&mut fields, Field::Plot, detail.overview.map(Value::Text));
        set(&mut fields, Field::Rating, detail.vote_average.map(Value::Decimal));
        set(
            &mut fields,
            Field::Runtime,
            detail.episode_run_time.first().map(|m| Value::Integer((*m).into())),
        );
        set(&mut fields, Field::Genres, Some(names(detail.genres)));
        set(
            &mut fields,
            Field::Network,
            detail.networks.into_iter().next().map(|n| Value::Text(n.name)),
        );
        set(&mut fields, Field::Status, detail.status.map(Value::Text));
        set(&mut fields, Field::Cast, Some(cast(credits.cast)));
        set(&mut fields, Field::Poster, detail.poster_path.map(|p| single_image(&p)));
        set(&mut fields, Field::Backdrop, detail.backdrop_path.map(|p| single_image(&p)));
        set(&mut fields, Field::Logo, detail.images.map(|images| logos(images.logos)));
        set(&mut fields, Field::SeasonPoster, Some(Value::Images(season_posters)));

        Ok(FetchedEntity { ids, fields })
    }

    async fn fetch_season(
        &self,
        show: &str,
        season: u32,
        locale: &Locale,
    ) -> Result<FetchedEntity, ProviderError> {
        let detail: TmdbSeasonDetail = self
            .get(&format!("/tv/{show}/season/{season}"), locale, &[])
            .await?;

        let poster = detail.poster_path.as_deref().map(single_image);
        let mut fields = BTreeMap::new();
        set(&mut fields, Field::Title, detail.name.map(Value::Text));
        set(&mut fields, Field::Plot, detail.overview.map(Value::Text));
        set(&mut fields, Field::FirstAired, parse_date(&detail.air_date).map(Value::Date));
        set(&mut fields, Field::SeasonPoster, poster.clone());
        set(&mut fields, Field::Poster, poster);

        Ok(FetchedEntity {
            ids: vec![CanonicalId::new(TMDB, detail.id.to_string())],
            fields,
        })
    }

    async fn fetch_episode(
        &self,
        show: &str,
        season: u32,
        episode: u32,
        locale: &Locale,
    ) -> Result<FetchedEntity, ProviderError> {
        let detail: TmdbEpisodeDetail = self
            .get(
                &format!("/tv/{show}/season/{season}/episode/{episode}"),
                locale,
                &[],
            )
            .await?;

        let mut fields = BTreeMap::new();
        set(&mut fields, Field::Title, detail.name.map(Value::Text));
        set(&mut fields, Field::Plot, detail.overview.map(Value::Text));
        set(&mut fields, Field::FirstAired, parse_date(&detail.air_date).map(Value::Date));
        set(&mut fields, Field::Rating, detail.vote_average.map(Value::Decimal));
        set(&mut fields, Field::Runtime, detail.runtime.map(|m| Value::Integer(m.into())));
        set(&mut fields, Field::Thumbnail, detail.still_path.map(|p| single_image(&p)));
        set(&mut fields, Field::Directors, Some(crew(&detail.crew, &["Director"])));
        set(&mut fields, Field::Writers, Some(crew(&detail.crew, &["Writer", "Teleplay"])));

        Ok(FetchedEntity {
            ids: vec![CanonicalId::new(TMDB, detail.id.to_string())],
            fields,
        })
    }
}

impl TmdbMovieSearchResult {
    fn into_result(self, query_title: &str, query_year: Option<u16>) -> SearchResult {
        let title = self.title.unwrap_or_default();
        let year = parse_year(&self.release_date);
        SearchResult {
            id: CanonicalId::new(TMDB, self.id.to_string()),
            confidence: TmdbProvider::confidence(query_title, &title, query_year, year),
            title,
            year,
            overview: self.overview,
            rank: 0,
        }
    }
}

impl TmdbTvSearchResult {
    fn into_result(self, query_title: &str, query_year: Option<u16>) -> SearchResult {
        let title = self.name.unwrap_or_default();
        let year = parse_year(&self.first_air_date);
        SearchResult {
            id: CanonicalId::new(TMDB, self.id.to_string()),
            confidence: TmdbProvider::confidence(query_title, &title, query_year, year),
            title,
            year,
            overview: self.overview,
            rank: 0,
        }
    }
}

/// Only TMDB ids can be fetched directly.
fn tmdb_id(id: &CanonicalId) -> Result<&str, ProviderError> {
    if id.provider == TMDB {
        Ok(&id.value)
    } else {
        Err(ProviderError::Unsupported(format!("TMDB cannot fetch {id}")))
    }
}

/// Store a value unless it is absent or blank.
fn set(fields: &mut BTreeMap<Field, Value>, field: Field, value: Option<Value>) {
    if let Some(value) = value.filter(|v| !v.is_blank()) {
        fields.insert(field, value);
    }
}

fn names(items: Vec<TmdbNamed>) -> Value {
    Value::List(items.into_iter().map(|n| n.name).collect())
}

fn cast(cast: Vec<TmdbCast>) -> Value {
    Value::People(
        cast.into_iter()
            .map(|c| Person {
                name: c.name,
                role: c.character.filter(|s| !s.is_empty()),
                thumb: c.profile_path.map(|p| image_url(&p)),
            })
            .collect(),
    )
}

fn crew(crew: &[TmdbCrew], jobs: &[&str]) -> Value {
    Value::People(
        crew.iter()
            .filter(|c| c.job.as_deref().is_some_and(|job| jobs.contains(&job)))
            .map(|c| Person {
                name: c.name.clone(),
                role: c.job.clone(),
                thumb: None,
            })
            .collect(),
    )
}

fn logos(images: Vec<TmdbImage>) -> Value {
    Value::Images(
        images
            .into_iter()
            .map(|img| Image {
                url: image_url(&img.file_path),
                width: Some(img.width),
                height: Some(img.height),
                language: img.iso_639_1,
            })
            .collect(),
    )
}

fn single_image(path: &str) -> Value {
    Value::Images(vec![Image::url(image_url(path))])
}

/// Extract a four-digit year from a date string like `"2023-04-15"`.
fn parse_year(date: &Option<String>) -> Option<u16> {
    date.as_deref()
        .and_then(|d| d.get(..4))
        .and_then(|y| y.parse::<u16>().ok())
}

/// Parse a full `YYYY-MM-DD` date.
fn parse_date(date: &Option<String>) -> Option<NaiveDate> {
    date.as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

/// Convert a TMDB image path fragment to a full URL.
fn image_url(path: &str) -> String {
    format!("{TMDB_IMAGE_BASE}{path}")
}

#[async_trait]
impl Provider for TmdbProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ProviderError> {
        match &query.term {
            SearchTerm::Text(text) => {
                self.search_text(query.kind, text, query.year, &query.locale)
                    .await
            }
            SearchTerm::Id(id) => self
                .lookup(query.kind, id, &query.locale)
                .await
                .map(|result| vec![result]),
        }
    }

    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchedEntity, ProviderError> {
        let locale = &request.locale;
        match (request.kind, &request.target) {
            (MediaKind::Movie, ScrapeTarget::Entity { id }) => {
                self.fetch_movie(tmdb_id(id)?, locale).await
            }
            (MediaKind::TvShow, ScrapeTarget::Entity { id }) => {
                self.fetch_show(tmdb_id(id)?, locale).await
            }
            (
                MediaKind::Season,
                ScrapeTarget::Child {
                    parent,
                    key: ChildKey::Season { season },
                },
            ) => self.fetch_season(tmdb_id(parent)?, *season, locale).await,
            (
                MediaKind::Episode,
                ScrapeTarget::Child {
                    parent,
                    key: ChildKey::Episode { season, episode },
                },
            ) => {
                self.fetch_episode(tmdb_id(parent)?, *season, *episode, locale)
                    .await
            }
            (kind, target) => Err(ProviderError::Unsupported(format!(
                "TMDB cannot fetch {kind} for {target:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_exact_title_match() {
        let score = TmdbProvider::confidence("Inception", "Inception", Some(2010), Some(2010));
        assert!((score - 0.8).abs() < f64::EPSILON); // 0.5 + 0.3
    }

    #[test]
    fn confidence_case_insensitive_match() {
        let score = TmdbProvider::confidence("inception", "Inception", None, None);
        assert!((score - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_contains_match() {
        let score = TmdbProvider::confidence("Alien", "Aliens", None, None);
        assert!((score - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_close_year() {
        let score = TmdbProvider::confidence("Dune", "Dune", Some(2021), Some(2020));
        assert!((score - 0.65).abs() < f64::EPSILON); // 0.5 + 0.15
    }

    #[test]
    fn year_and_date_parsing() {
        assert_eq!(parse_year(&Some("2023-04-15".to_string())), Some(2023));
        assert_eq!(parse_year(&Some("1999".to_string())), Some(1999));
        assert_eq!(parse_year(&None), None);
        assert_eq!(parse_year(&Some("".to_string())), None);
        assert_eq!(
            parse_date(&Some("1999-03-31".to_string())),
            NaiveDate::from_ymd_opt(1999, 3, 31)
        );
        assert_eq!(parse_date(&Some("1999".to_string())), None);
    }

    #[test]
    fn image_url_construction() {
        assert_eq!(
            image_url("/abc123.jpg"),
            "https://image.tmdb.org/t/p/original/abc123.jpg"
        );
    }

    #[test]
    fn provider_is_available() {
        assert!(TmdbProvider::new("test-key").is_available());
        assert!(!TmdbProvider::new("").is_available());
    }

    #[test]
    fn descriptor_recognises_imdb_ids() {
        let provider = TmdbProvider::new("key");
        assert_eq!(provider.name(), "tmdb");
        assert_eq!(
            provider.descriptor().recognize_id("tt0133093"),
            Some(CanonicalId::new("imdb", "tt0133093"))
        );
        assert!(provider
            .descriptor()
            .supports_field(MediaKind::Episode, Field::Thumbnail));
        assert!(!provider.descriptor().supports_kind(MediaKind::Album));
    }

    #[test]
    fn only_tmdb_ids_are_fetchable() {
        assert_eq!(tmdb_id(&CanonicalId::new("tmdb", "603")).unwrap(), "603");
        assert!(tmdb_id(&CanonicalId::new("imdb", "tt0133093")).is_err());
    }

    #[test]
    fn blank_values_are_not_stored() {
        let mut fields = BTreeMap::new();
        set(&mut fields, Field::Plot, Some(Value::from("")));
        set(&mut fields, Field::Genres, Some(Value::List(Vec::new())));
        set(&mut fields, Field::Title, None);
        assert!(fields.is_empty());
    }
}
