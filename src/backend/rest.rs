//! Row store client for the bookmark table
//!
//! Speaks the PostgREST dialect exposed under `{project}/rest/v1/`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | select    | `GET /{table}?select=*&order=created_at.desc` |
//! | insert    | `POST /{table}` with `Prefer: return=representation` |
//! | delete    | `DELETE /{table}?id=eq.{id}` |
//!
//! Every request carries `apikey` and `Authorization: Bearer`; the bearer
//! is the session access token, so row-level security scopes results to
//! the signed-in user.

use std::sync::Arc;

use url::Url;

use crate::backend::{bearer_token, error_for_status, BookmarkStore, Order, SessionCell};
use crate::config::Config;
use crate::error::{Result, SmartmarkError};
use crate::model::{Bookmark, NewBookmark};

/// HTTP implementation of [`BookmarkStore`].
#[derive(Debug)]
pub struct RestStore {
    http: Arc<reqwest::Client>,
    table_url: Url,
    anon_key: String,
    cell: SessionCell,
}

impl RestStore {
    /// Builds a store for `config.backend.table`.
    pub fn new(http: Arc<reqwest::Client>, config: &Config, cell: SessionCell) -> Result<Self> {
        Self::for_table(
            http,
            &config.backend.url,
            &config.backend.anon_key,
            &config.backend.table,
            cell,
        )
    }

    /// Builds a store for an explicit project URL and table.
    pub fn for_table(
        http: Arc<reqwest::Client>,
        project_url: &str,
        anon_key: &str,
        table: &str,
        cell: SessionCell,
    ) -> Result<Self> {
        let raw = format!("{}/rest/v1/{}", project_url.trim_end_matches('/'), table);
        let table_url = Url::parse(&raw)
            .map_err(|e| SmartmarkError::Config(format!("invalid table url {raw}: {e}")))?;
        Ok(Self {
            http,
            table_url,
            anon_key: anon_key.to_string(),
            cell,
        })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer_token(&self.cell, &self.anon_key))
    }
}

#[async_trait::async_trait]
impl BookmarkStore for RestStore {
    async fn select_all(&self, order: &Order) -> Result<Vec<Bookmark>> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", &order.to_query());

        let response = self.request(reqwest::Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let rows: Vec<Bookmark> = response.json().await?;
        tracing::debug!(count = rows.len(), "Fetched bookmarks");
        Ok(rows)
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        let response = self
            .request(reqwest::Method::POST, self.table_url.clone())
            .header("Prefer", "return=representation")
            .json(&[bookmark])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let mut rows: Vec<Bookmark> = response.json().await?;
        if rows.is_empty() {
            return Err(SmartmarkError::Backend {
                status: 200,
                message: "insert returned no rows".to_string(),
            }
            .into());
        }
        let row = rows.swap_remove(0);
        tracing::debug!(bookmark_id = %row.id, "Inserted bookmark");
        Ok(row)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));

        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        tracing::debug!(bookmark_id = %id, "Deleted bookmark");
        Ok(())
    }
}
