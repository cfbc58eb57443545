//! Twitch HTTP API calls: token validation / refresh and EventSub
//! subscription management.
//!
//! All endpoints come from [`HelixClient`]'s fields so tests and proxies can
//! point them elsewhere.

use std::time::Duration;

use serde::Deserialize;

use super::{AuthError, ConnectionError, UserIdentity};

const ID_BASE: &str = "https://id.twitch.tv";
const API_BASE: &str = "https://api.twitch.tv";

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Access / refresh pair returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedSubscriptions {
    data: Vec<CreatedSubscription>,
}

#[derive(Debug, Deserialize)]
struct CreatedSubscription {
    id: String,
}

/// Thin reqwest wrapper around the Twitch identity and Helix endpoints.
#[derive(Clone)]
pub struct HelixClient {
    client: reqwest::Client,
    client_id: String,
    id_base: String,
    api_base: String,
}

impl HelixClient {
    /// Build a client whose every request times out after `timeout`.
    pub fn new(client_id: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            client_id: client_id.into(),
            id_base: ID_BASE.into(),
            api_base: API_BASE.into(),
        }
    }

    /// Override the endpoint roots.
    pub fn with_endpoints(mut self, id_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.id_base = id_base.into();
        self.api_base = api_base.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Validate `token` and return the identity it belongs to.
    pub async fn validate(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let response = self
            .client
            .get(format!("{}/oauth2/validate", self.id_base))
            .header("Authorization", format!("OAuth {token}"))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidToken);
        }
        let response = response.error_for_status()?;
        let body: ValidateResponse = response.json().await?;

        match (body.user_id, body.login) {
            (Some(user_id), Some(login)) => Ok(UserIdentity { user_id, login }),
            _ => Err(AuthError::MissingIdentity),
        }
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(
        &self,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        let response = self
            .client
            .post(format!("{}/oauth2/token", self.id_base))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if response.status().is_client_error() {
            return Err(AuthError::InvalidToken);
        }
        Ok(response.error_for_status()?.json().await?)
    }

    /// Create a `channel.follow` v2 subscription bound to a WebSocket
    /// session.  Returns the subscription id.
    pub async fn create_follow_subscription(
        &self,
        token: &str,
        identity: &UserIdentity,
        session_id: &str,
    ) -> Result<String, ConnectionError> {
        let body = serde_json::json!({
            "type": "channel.follow",
            "version": "2",
            "condition": {
                "broadcaster_user_id": identity.user_id,
                "moderator_user_id": identity.user_id,
            },
            "transport": {
                "method": "websocket",
                "session_id": session_id,
            },
        });

        let response = self
            .client
            .post(format!("{}/helix/eventsub/subscriptions", self.api_base))
            .header("Client-ID", &self.client_id)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Subscription(format!("{status}: {text}")));
        }

        let created: CreatedSubscriptions = response.json().await?;
        created
            .data
            .into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| ConnectionError::Subscription("empty response".into()))
    }

    pub async fn delete_subscription(&self, token: &str, id: &str) -> Result<(), ConnectionError> {
        self.client
            .delete(format!("{}/helix/eventsub/subscriptions", self.api_base))
            .query(&[("id", id)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_endpoints() {
        let client = HelixClient::new("abc", Duration::from_secs(5));
        assert_eq!(client.client_id(), "abc");
        assert_eq!(client.id_base, ID_BASE);
        assert_eq!(client.api_base, API_BASE);
    }

    #[test]
    fn endpoints_can_be_overridden() {
        let client = HelixClient::new("abc", Duration::from_secs(5))
            .with_endpoints("http://localhost:1", "http://localhost:2");
        assert_eq!(client.id_base, "http://localhost:1");
        assert_eq!(client.api_base, "http://localhost:2");
    }

    #[test]
    fn token_pair_refresh_token_is_optional() {
        let pair: TokenPair = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(pair.access_token, "a");
        assert!(pair.refresh_token.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let client = HelixClient::new("abc", Duration::from_millis(500))
            .with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = client.validate("token").await.unwrap_err();
        assert!(matches!(err, AuthError::Request(_) | AuthError::Timeout), "{err}");
    }
}
