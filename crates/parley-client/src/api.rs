//! HTTP collaborators: history, summary and counterpart search.
//!
//! These endpoints are consumed, not owned. Every request carries the
//! session's bearer credential; the credential is treated as opaque and
//! never refreshed here.

use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use parley_shared::types::{SearchResult, UserId};
use parley_shared::FetchError;

/// One message of `GET /messages/chats/{user}/{counterpart}`, ascending
/// chronological order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub time: DateTime<Utc>,
}

/// One chat of `GET /messages/chats/{user}/summary`, consumed once at
/// session start to seed the directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub id: String,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// One candidate of `GET /users/chat/search?query=…`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRow {
    #[serde(rename = "userId", alias = "id")]
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl From<SearchRow> for SearchResult {
    fn from(row: SearchRow) -> Self {
        Self {
            user_id: row.user_id,
            display_name: row.name,
            avatar_ref: row.avatar,
        }
    }
}

/// Thin client over the message service's REST surface.
pub struct HistoryApi {
    http: reqwest::Client,
    base: String,
    credential: String,
}

impl HistoryApi {
    pub fn new(base: impl Into<String>, credential: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base,
            credential: credential.into(),
        }
    }

    /// Full history of one chat, ascending.
    pub async fn fetch_history(
        &self,
        user: &UserId,
        counterpart: &UserId,
    ) -> Result<Vec<HistoryRow>, FetchError> {
        let url = format!("{}/messages/chats/{}/{}", self.base, user, counterpart);
        debug!(%url, "Fetching chat history");
        self.get_json(self.http.get(&url)).await
    }

    /// Per-counterpart summary snapshot for the directory.
    pub async fn fetch_summary(&self, user: &UserId) -> Result<Vec<SummaryRow>, FetchError> {
        let url = format!("{}/messages/chats/{}/summary", self.base, user);
        debug!(%url, "Fetching chat summary");
        self.get_json(self.http.get(&url)).await
    }

    /// Counterpart candidates for the given query.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, FetchError> {
        let url = format!("{}/users/chat/search", self.base);
        debug!(%url, query, "Searching counterparts");
        let rows: Vec<SearchRow> = self
            .get_json(self.http.get(&url).query(&[("query", query)]))
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, FetchError> {
        let resp = req
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_row_shape() {
        let json = r#"[{
            "id": "S1",
            "senderId": "7",
            "receiverId": "42",
            "message": "salut",
            "avatar": "a.png",
            "time": "2024-05-01T10:00:00Z"
        }]"#;
        let rows: Vec<HistoryRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender_id, UserId::from("7"));
        assert_eq!(rows[0].avatar.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_summary_row_tolerates_missing_optionals() {
        let json = r#"[{"id": "1", "userId": "42", "name": "Zoe"}]"#;
        let rows: Vec<SummaryRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows[0].user_id, UserId::from("42"));
        assert!(rows[0].last_message.is_none());
        assert!(rows[0].time.is_none());
    }

    #[test]
    fn test_search_row_accepts_id_alias() {
        let json = r#"[{"id": "42", "name": "Zoe"}]"#;
        let rows: Vec<SearchRow> = serde_json::from_str(json).unwrap();
        let result: SearchResult = rows[0].clone().into();
        assert_eq!(result.user_id, UserId::from("42"));
        assert_eq!(result.display_name, "Zoe");
    }
}
