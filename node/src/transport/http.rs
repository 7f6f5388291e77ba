//! HTTP client for `tessera-relay`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tessera_engine::protocol::relay::{
    CreateRoomRequest, CreateRoomResponse, ErrorBody, EventsQuery, InviteRequest, LockRequest,
    LockResponse, PublishRequest, PublishResponse, RegisterMemberRequest, RegisterMemberResponse,
    ReleaseLockRequest,
};
use tessera_engine::{EventFilter, EventPage};

use super::{LockToken, MemberAccount, Transport};
use crate::error::{NodeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport talking to a relay over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    /// Authenticate every request as the member owning `access_token`.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Check that the relay is reachable.
    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;
        check(response).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Turn a non-success response into [`NodeError::TransportStatus`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(NodeError::TransportStatus {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_room(&self, name: Option<&str>, topic: Option<&str>) -> Result<String> {
        let body = CreateRoomRequest {
            name: name.map(str::to_string),
            topic: topic.map(str::to_string),
        };
        let response = self
            .authed(self.client.post(self.url("/rooms")))
            .json(&body)
            .send()
            .await?;
        let created: CreateRoomResponse = check(response).await?.json().await?;
        tracing::debug!(room_id = %created.room_id, "room created on relay");
        Ok(created.room_id)
    }

    async fn publish(
        &self,
        room_id: &str,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<String> {
        let body = PublishRequest {
            event_type: event_type.to_string(),
            content,
        };
        let response = self
            .authed(self.client.post(self.url(&format!("/rooms/{room_id}/events"))))
            .json(&body)
            .send()
            .await?;
        let published: PublishResponse = check(response).await?.json().await?;
        Ok(published.event_id)
    }

    async fn read_events(
        &self,
        room_id: &str,
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<EventPage> {
        let query = EventsQuery {
            since,
            types: (!filter.types.is_empty()).then(|| filter.types.join(",")),
            limit: filter.limit,
        };
        let response = self
            .authed(self.client.get(self.url(&format!("/rooms/{room_id}/events"))))
            .query(&query)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn get_room_state(
        &self,
        room_id: &str,
        state_type: &str,
    ) -> Result<Option<serde_json::Value>> {
        let response = self
            .authed(
                self.client
                    .get(self.url(&format!("/rooms/{room_id}/state/{state_type}"))),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn put_room_state(
        &self,
        room_id: &str,
        state_type: &str,
        content: &serde_json::Value,
    ) -> Result<()> {
        let response = self
            .authed(
                self.client
                    .put(self.url(&format!("/rooms/{room_id}/state/{state_type}"))),
            )
            .json(content)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn acquire_lock(
        &self,
        room_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>> {
        let body = LockRequest {
            key: key.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let response = self
            .authed(self.client.post(self.url(&format!("/rooms/{room_id}/locks"))))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        let lock: LockResponse = check(response).await?.json().await?;
        Ok(Some(LockToken(lock.token)))
    }

    async fn release_lock(&self, room_id: &str, key: &str, token: &LockToken) -> Result<()> {
        let body = ReleaseLockRequest {
            key: key.to_string(),
            token: token.0.clone(),
        };
        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("/rooms/{room_id}/locks/release"))),
            )
            .json(&body)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn register_member(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<MemberAccount> {
        let body = RegisterMemberRequest {
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let response = self
            .client
            .post(self.url("/members"))
            .json(&body)
            .send()
            .await?;
        let registered: RegisterMemberResponse = check(response).await?.json().await?;
        Ok(MemberAccount {
            member_id: registered.member_id,
            access_token: registered.access_token,
        })
    }

    async fn invite(&self, room_id: &str, member_id: &str) -> Result<()> {
        let body = InviteRequest {
            member_id: member_id.to_string(),
        };
        let response = self
            .authed(self.client.post(self.url(&format!("/rooms/{room_id}/invite"))))
            .json(&body)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn join_room(&self, room_id: &str, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/rooms/{room_id}/join")))
            .bearer_auth(access_token)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let transport = HttpTransport::new("http://localhost:3000/").unwrap();
        assert_eq!(transport.url("/rooms"), "http://localhost:3000/rooms");
    }

    #[test]
    fn access_token_is_optional() {
        let transport = HttpTransport::new("http://relay").unwrap();
        assert!(transport.access_token.is_none());
        let transport = transport.with_access_token("secret");
        assert_eq!(transport.access_token.as_deref(), Some("secret"));
    }
}
