//! Client for the external catalog/listing collaborator.
//!
//! The catalog owns playlist membership and item metadata; this module only
//! drains its pagination and normalizes entries. Authentication is the
//! collaborator's concern; an optional bearer token is forwarded as-is.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// One catalog entry, normalized for the frontend and the pipeline.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
}

/// Title given to entries whose metadata lacks one.
const UNTITLED_ENTRY: &str = "Untitled Video";

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    items: Vec<PageItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
}

pub struct CatalogClient {
    base_url: String,
    token: Option<String>,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    /// Returns every item of a playlist, fully draining the catalog's
    /// pagination before handing the list back.
    pub fn playlist_items(&self, playlist_id: &str) -> PipelineResult<Vec<CatalogEntry>> {
        let url = format!("{}/playlists/{}/items", self.base_url, playlist_id);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = ureq::get(&url);
            if let Some(token) = &self.token {
                request = request.set("Authorization", &format!("Bearer {token}"));
            }
            if let Some(page) = &page_token {
                request = request.query("pageToken", page);
            }

            let page: PageResponse = request
                .call()
                .map_err(|err| PipelineError::Transport(format!("catalog request failed: {err}")))?
                .into_json()
                .map_err(|err| {
                    PipelineError::Transport(format!("decoding catalog response: {err}"))
                })?;

            entries.extend(normalize_items(page.items));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(entries)
    }
}

/// Drops entries without a usable id and fills in display fallbacks, the same
/// shape the catalog's own clients expect.
fn normalize_items(items: Vec<PageItem>) -> Vec<CatalogEntry> {
    items
        .into_iter()
        .filter_map(|item| {
            let id = item.id.filter(|id| !id.is_empty())?;
            Some(CatalogEntry {
                id,
                title: item
                    .title
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| UNTITLED_ENTRY.to_owned()),
                thumbnail: item.thumbnail.unwrap_or_default(),
            })
        })
        .collect()
}

/// Builds the origin watch URL for a catalog item id.
pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}
