//! Okta Application Users Client
//!
//! Lists the users assigned to an Okta application and flattens each into a
//! [`RawUserProfile`]: `credentials.userName` becomes `username`, every
//! scalar `profile` attribute is copied as a string, and string arrays are
//! joined with commas (so a multi-valued `department` still maps to groups).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LINK};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{IdentitySource, RawUserProfile};
use crate::error::AdapterError;

/// Page size requested from the users endpoint
const PAGE_LIMIT: u32 = 200;

/// Default upper bound on fetched pages
const MAX_PAGES: usize = 500;

/// Okta application user as returned by `/api/v1/apps/{app}/users`
#[derive(Debug, Clone, Deserialize)]
pub struct OktaAppUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub credentials: Option<OktaCredentials>,
    pub profile: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OktaCredentials {
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
}

impl OktaAppUser {
    /// Flatten into string attributes
    pub fn into_profile(self) -> RawUserProfile {
        let mut attributes = BTreeMap::new();

        for (key, value) in self.profile {
            let flattened = match value {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                serde_json::Value::Array(items) => {
                    let parts: Vec<String> = items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    Some(parts.join(","))
                }
                serde_json::Value::Null | serde_json::Value::Object(_) => None,
            };
            if let Some(v) = flattened {
                attributes.insert(key, v);
            }
        }

        if let Some(user_name) = self.credentials.and_then(|c| c.user_name) {
            attributes.insert("username".to_string(), user_name);
        }

        RawUserProfile {
            id: self.id,
            status: self.status,
            attributes,
        }
    }
}

/// Okta REST client scoped to one application
pub struct OktaClient {
    http_client: Client,
    users_url: String,
    api_token: String,
    max_pages: usize,
}

impl std::fmt::Debug for OktaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OktaClient")
            .field("users_url", &self.users_url)
            .finish_non_exhaustive()
    }
}

impl OktaClient {
    /// Client for `https://{account_id}.okta.com`
    pub fn new(account_id: &str, app_id: &str, api_token: String) -> Result<Self, AdapterError> {
        Self::with_base_url(&format!("https://{}.okta.com", account_id), app_id, api_token)
    }

    /// Client for an arbitrary org URL (custom domains, test servers)
    pub fn with_base_url(base_url: &str, app_id: &str, api_token: String) -> Result<Self, AdapterError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            users_url: format!(
                "{}/api/v1/apps/{}/users",
                base_url.trim_end_matches('/'),
                app_id
            ),
            api_token,
            max_pages: MAX_PAGES,
        })
    }

    /// Fail instead of following more than `max_pages` pages
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<(Vec<OktaAppUser>, Option<String>), AdapterError> {
        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, format!("SSWS {}", self.api_token))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AdapterError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let next = next_link(response.headers());
        let users = response
            .json::<Vec<OktaAppUser>>()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        Ok((users, next))
    }
}

#[async_trait]
impl IdentitySource for OktaClient {
    async fn fetch_users(&self) -> Result<Vec<RawUserProfile>, AdapterError> {
        let mut url = format!("{}?limit={}", self.users_url, PAGE_LIMIT);
        let mut profiles = Vec::new();

        for page in 1..=self.max_pages {
            let (users, next) = self.fetch_page(&url).await?;
            debug!(page, count = users.len(), "Fetched Okta users page");
            profiles.extend(users.into_iter().map(OktaAppUser::into_profile));

            match next {
                Some(next_url) => url = next_url,
                None => {
                    info!(count = profiles.len(), url = %self.users_url, "Retrieved Okta users");
                    return Ok(profiles);
                }
            }
        }

        // A partial user list must never become a manifest
        warn!(
            pages = self.max_pages,
            count = profiles.len(),
            url = %self.users_url,
            "Okta pagination did not finish"
        );
        Err(AdapterError::Truncated {
            pages: self.max_pages,
        })
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            (start < end).then(|| part[start..end].to_string())
        })
}
