use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;

use crate::config::settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn parse(s: &str) -> Option<MediaKind> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "tv" => Some(MediaKind::Tv),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve,
    Deny,
}

impl Action {
    /// Path segment of the request service's action endpoint.
    pub fn api_verb(self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Deny => "decline",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Action::Approve => "approved",
            Action::Deny => "denied",
        }
    }
}

/// Canonical media record from the request service. Every field is optional;
/// the renderer omits what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaDetails {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub external_ids: ExternalIds,
    pub credits: Credits,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalIds {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credits {
    pub cast: Vec<CastMember>,
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CastMember {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrewMember {
    pub name: Option<String>,
    pub job: Option<String>,
}

#[derive(Clone)]
pub struct Overseerr {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Overseerr {
    pub fn new() -> Result<Self> {
        let s = settings();
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: s.overseerr_api_url.trim_end_matches('/').to_string(),
            api_key: s.overseerr_api_key.clone(),
        })
    }

    /// Fetch the canonical record for a piece of media. A missing kind or id
    /// short-circuits without a network call; any transport or protocol
    /// failure is logged and mapped to `None`. One attempt, no retry.
    pub async fn media_details(
        &self,
        kind: Option<MediaKind>,
        tmdb_id: Option<i64>,
    ) -> Option<MediaDetails> {
        let (kind, tmdb_id) = match (kind, tmdb_id) {
            (Some(kind), Some(id)) => (kind, id),
            _ => return None,
        };

        let url = format!("{}/{}/{}", self.base_url, kind.as_str(), tmdb_id);
        match self.get_details(&url).await {
            Ok(details) => Some(details),
            Err(e) => {
                tracing::error!(
                    kind = kind.as_str(),
                    tmdb_id,
                    error = %e,
                    "failed to fetch media details"
                );
                None
            }
        }
    }

    async fn get_details(&self, url: &str) -> Result<MediaDetails> {
        let resp = self
            .client
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("detail lookup failed: {} {}", status, body));
        }

        Ok(resp.json().await?)
    }

    /// Apply an approve/decline action to a pending request. Reports plain
    /// success/failure; a lost response after the upstream already mutated is
    /// reported as failure (at-most-once, divergence accepted).
    pub async fn resolve_request(&self, request_id: &str, action: Action) -> bool {
        let url = format!("{}/request/{}/{}", self.base_url, request_id, action.api_verb());

        let result = async {
            let resp = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(anyhow!("action endpoint failed: {} {}", status, body));
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    request_id,
                    action = action.api_verb(),
                    error = %e,
                    "failed to resolve request"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_parses_known_values_only() {
        assert_eq!(MediaKind::parse("movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("tv"), Some(MediaKind::Tv));
        assert_eq!(MediaKind::parse("music"), None);
        assert_eq!(MediaKind::parse(""), None);
    }

    #[test]
    fn action_verbs_match_api_contract() {
        assert_eq!(Action::Approve.api_verb(), "approve");
        assert_eq!(Action::Deny.api_verb(), "decline");
        assert_eq!(Action::Approve.past_tense(), "approved");
        assert_eq!(Action::Deny.past_tense(), "denied");
    }

    #[test]
    fn details_deserialize_with_partial_payload() {
        let details: MediaDetails = serde_json::from_str(
            r#"{
                "id": 550,
                "title": "Fight Club",
                "releaseDate": "1999-10-15",
                "voteAverage": 8.4,
                "externalIds": {"imdbId": "tt0137523"},
                "credits": {"cast": [{"name": "Edward Norton"}], "crew": []}
            }"#,
        )
        .unwrap();

        assert_eq!(details.title.as_deref(), Some("Fight Club"));
        assert_eq!(details.release_date.as_deref(), Some("1999-10-15"));
        assert_eq!(details.vote_average, Some(8.4));
        assert_eq!(details.external_ids.imdb_id.as_deref(), Some("tt0137523"));
        assert_eq!(details.credits.cast.len(), 1);
        assert!(details.name.is_none());
        assert!(details.overview.is_none());
    }

    #[test]
    fn details_tolerate_unknown_and_missing_sections() {
        let details: MediaDetails =
            serde_json::from_str(r#"{"name": "The Wire", "unexpected": {"x": 1}}"#).unwrap();
        assert_eq!(details.name.as_deref(), Some("The Wire"));
        assert!(details.credits.cast.is_empty());
        assert!(details.external_ids.tvdb_id.is_none());
    }
}
