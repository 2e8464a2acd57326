//! Microsoft Graph drive and workbook calls used by the repair.

use crate::auth::AccessToken;
use crate::errors::FixError;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};

/// Last addressable cell of an Excel grid.
pub const REPAIR_CELL: &str = "XFD1048576";
pub const SENTINEL_VALUE: &str = "Fix";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Worksheet {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// `{"values": [[value]]}` for a single-cell range patch.
pub fn single_cell_body(value: &str) -> Value {
    json!({ "values": [[value]] })
}

/// Worksheets of a workbook along with the response they were read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorksheetList {
    pub worksheets: Vec<Worksheet>,
    pub payload: Value,
}

impl WorksheetList {
    /// A missing or null `value` collection means no worksheets.
    pub fn from_payload(payload: Value) -> Result<Self> {
        let worksheets = match payload.get("value") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())
                .context("worksheet list has an unexpected shape")?,
        };
        Ok(Self {
            worksheets,
            payload,
        })
    }
}

#[async_trait]
pub trait WorkbookApi: Send + Sync {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<ItemId>;
    async fn list_worksheets(&self, item: &ItemId) -> Result<WorksheetList>;
    async fn patch_range(
        &self,
        item: &ItemId,
        worksheet_id: &str,
        address: &str,
        body: &Value,
    ) -> Result<()>;
    async fn download_url(&self, item: &ItemId) -> Result<String>;
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: Option<String>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

/// Graph client for the signed-in user's OneDrive.
pub struct GraphClient {
    http: reqwest::Client,
    base: Url,
    token: AccessToken,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, base: Url, token: AccessToken) -> Self {
        Self { http, base, token }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("graph url {} cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn range_endpoint(&self, item: &ItemId, worksheet_id: &str, address: &str) -> Result<Url> {
        self.endpoint(&[
            "me",
            "drive",
            "items",
            item.as_str(),
            "workbook",
            &format!("worksheets('{worksheet_id}')"),
            &format!("range(address='{address}')"),
        ])
    }
}

async fn ensure_success(operation: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FixError::Api {
        operation,
        status,
        body,
    }
    .into())
}

#[async_trait]
impl WorkbookApi for GraphClient {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<ItemId> {
        let url = self.endpoint(&[
            "me",
            "drive",
            "root:",
            &format!("{file_name}:"),
            "content",
        ])?;
        tracing::info!(file_name, bytes = bytes.len(), "uploading workbook");
        tracing::debug!(%url, "upload endpoint");

        let response = self
            .http
            .put(url)
            .bearer_auth(self.token.secret())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .context("upload request failed")?;
        let item: DriveItem = ensure_success("upload", response)
            .await?
            .json()
            .await
            .context("upload response is not valid JSON")?;

        item.id.map(ItemId).ok_or_else(|| {
            FixError::MissingField {
                operation: "upload",
                field: "id",
            }
            .into()
        })
    }

    async fn list_worksheets(&self, item: &ItemId) -> Result<WorksheetList> {
        let url = self.endpoint(&[
            "me",
            "drive",
            "items",
            item.as_str(),
            "workbook",
            "worksheets",
        ])?;
        tracing::debug!(%url, "listing worksheets");

        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.secret())
            .send()
            .await
            .context("worksheet list request failed")?;
        let payload: Value = ensure_success("list worksheets", response)
            .await?
            .json()
            .await
            .context("worksheet list response is not valid JSON")?;
        WorksheetList::from_payload(payload)
    }

    async fn patch_range(
        &self,
        item: &ItemId,
        worksheet_id: &str,
        address: &str,
        body: &Value,
    ) -> Result<()> {
        let url = self.range_endpoint(item, worksheet_id, address)?;
        tracing::info!(worksheet_id, address, "patching range");

        let response = self
            .http
            .patch(url)
            .bearer_auth(self.token.secret())
            .json(body)
            .send()
            .await
            .context("range patch request failed")?;
        ensure_success("range patch", response).await?;
        Ok(())
    }

    async fn download_url(&self, item: &ItemId) -> Result<String> {
        let url = self.endpoint(&["me", "drive", "items", item.as_str()])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.secret())
            .send()
            .await
            .context("item metadata request failed")?;
        let item: DriveItem = ensure_success("item metadata", response)
            .await?
            .json()
            .await
            .context("item metadata response is not valid JSON")?;

        item.download_url.ok_or_else(|| {
            FixError::MissingField {
                operation: "item metadata",
                field: "@microsoft.graph.downloadUrl",
            }
            .into()
        })
    }

    /// The URL is pre-signed, so no bearer token is attached.
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!("downloading repaired workbook");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("download request failed")?;
        let bytes = ensure_success("download", response)
            .await?
            .bytes()
            .await
            .context("failed to read download body")?;
        Ok(bytes.to_vec())
    }
}
