use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmdbError {
    #[error("tmdb request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("tmdb responded with status {0}")]
    Status(StatusCode),
}

/// Что ищем: фильм или сериал.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    /// Слово "movie" в запросе (без учёта регистра) → фильмы, иначе сериалы.
    pub fn from_query(query: &str) -> Self {
        if query.to_lowercase().contains("movie") { MediaKind::Movie } else { MediaKind::Tv }
    }

    fn endpoint(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

#[derive(Clone)]
pub struct TmdbClient {
    api_key: String,
    base_url: String,
    image_base_url: String,
    http: Client,
}

impl TmdbClient {
    pub fn new(api_key: String, base_url: String, image_base_url: String) -> Self {
        Self { api_key, base_url, image_base_url, http: Client::new() }
    }

    /// Поиск по названию; `Ok(None)` — ничего не нашлось. Берётся только первый результат.
    pub async fn search_image(&self, query: &str) -> Result<Option<String>, TmdbError> {
        let kind = MediaKind::from_query(query);
        let url = format!(
            "{}/search/{}?api_key={}&query={}",
            self.base_url,
            kind.endpoint(),
            urlencoding::encode(&self.api_key),
            urlencoding::encode(query)
        );
        self.first_image(&url).await
    }

    /// Первый элемент дневного тренда (фильмы и сериалы вместе).
    pub async fn trending_image(&self) -> Result<Option<String>, TmdbError> {
        let url = format!(
            "{}/trending/all/day?api_key={}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        );
        self.first_image(&url).await
    }

    async fn first_image(&self, url: &str) -> Result<Option<String>, TmdbError> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(TmdbError::Status(resp.status()));
        }
        let data: SearchResp = resp.json().await?;
        Ok(data.results.into_iter().next().and_then(|r| r.image_path()).map(|p| self.image_url(&p)))
    }

    pub fn image_url(&self, path: &str) -> String {
        format!("{}{}", self.image_base_url, path)
    }
}

/* ======= DTOs ======= */

#[derive(Deserialize, Debug)]
struct SearchResp {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Deserialize, Debug)]
struct SearchItem {
    backdrop_path: Option<String>,
    poster_path: Option<String>,
}

impl SearchItem {
    // горизонтальный backdrop, если его нет — обычный постер
    fn image_path(self) -> Option<String> {
        self.backdrop_path.or(self.poster_path).filter(|p| !p.is_empty())
    }
}
