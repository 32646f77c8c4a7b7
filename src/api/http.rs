//! reqwest-backed control plane client

use super::{
    ApiResponse, ClientInfo, ControlPlane, CreateRoomRequest, RegisterClientRequest,
    RegisteredClient, Room, TokenProvider, TrackSource, TrackSubscription,
};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::webrtc::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Response header set by the server when the bearer token has expired
pub const TOKEN_EXPIRED_HEADER: &str = "x-access-token-expired";

#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiateResponse {
    #[serde(default)]
    answer: Option<SessionDescription>,
}

impl HttpControlPlane {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = config.versioned_url();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "API base_url must start with http:// or https://, got: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// Versioned base URL, e.g. `https://host/v1`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> Arc<dyn TokenProvider> {
        self.tokens.clone()
    }

    /// Issue one call and normalise the response.
    ///
    /// A truthy `x-access-token-expired` header refreshes the token and
    /// retries the same call once.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut refreshed = false;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = self.tokens.token() {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            if !refreshed && token_expired(response.headers()) {
                debug!("{} {}: access token expired, refreshing", method, path);
                self.tokens.refresh().await?;
                refreshed = true;
                continue;
            }

            return normalize(response).await;
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.request(method, path, body).await?;
        if !response.ok {
            return Err(response.to_error());
        }
        Ok(serde_json::from_value(response.data)?)
    }

    async fn call_unit(&self, method: Method, path: &str, body: Option<&Value>) -> Result<()> {
        let response = self.request(method, path, body).await?;
        if !response.ok {
            return Err(response.to_error());
        }
        Ok(())
    }
}

fn token_expired(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get(TOKEN_EXPIRED_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}

async fn normalize(response: reqwest::Response) -> Result<ApiResponse> {
    let status = response.status();
    let text = response.text().await?;

    let (message, data) = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(mut object)) => {
            let message = match object.remove("message") {
                Some(Value::String(message)) => message,
                _ => String::new(),
            };
            let data = match object.remove("data") {
                Some(data) => data,
                None => Value::Object(object),
            };
            (message, data)
        }
        Ok(other) => (String::new(), other),
        Err(_) => (text, Value::Null),
    };

    let message = if message.is_empty() && !status.is_success() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        message
    };

    Ok(ApiResponse {
        code: status.as_u16(),
        ok: status.is_success(),
        message,
        data,
    })
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<Room> {
        let body = serde_json::to_value(&request)?;
        self.call(Method::POST, "/rooms/create", Some(&body)).await
    }

    async fn get_room(&self, room_id: &str) -> Result<Room> {
        self.call(Method::GET, &format!("/rooms/{}", room_id), None)
            .await
    }

    async fn register_client(
        &self,
        room_id: &str,
        request: RegisterClientRequest,
    ) -> Result<RegisteredClient> {
        let body = serde_json::to_value(&request)?;
        self.call(
            Method::POST,
            &format!("/rooms/{}/register", room_id),
            Some(&body),
        )
        .await
    }

    async fn get_client(&self, room_id: &str, client_id: &str) -> Result<ClientInfo> {
        self.call(
            Method::GET,
            &format!("/rooms/{}/clients/{}", room_id, client_id),
            None,
        )
        .await
    }

    async fn set_client_name(
        &self,
        room_id: &str,
        client_id: &str,
        name: &str,
    ) -> Result<ClientInfo> {
        let body = json!({ "name": name });
        self.call(
            Method::PUT,
            &format!("/rooms/{}/setname/{}", room_id, client_id),
            Some(&body),
        )
        .await
    }

    async fn get_metadata(&self, room_id: &str) -> Result<Map<String, Value>> {
        self.call(Method::GET, &format!("/rooms/{}/metadata", room_id), None)
            .await
    }

    async fn set_metadata(&self, room_id: &str, metadata: Map<String, Value>) -> Result<()> {
        let body = Value::Object(metadata);
        self.call_unit(
            Method::PUT,
            &format!("/rooms/{}/metadata", room_id),
            Some(&body),
        )
        .await
    }

    async fn delete_metadata(&self, room_id: &str, key: &str) -> Result<()> {
        self.call_unit(
            Method::DELETE,
            &format!("/rooms/{}/metadata/{}", room_id, key),
            None,
        )
        .await
    }

    async fn send_ice_candidate(
        &self,
        room_id: &str,
        client_id: &str,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let body = serde_json::to_value(candidate)?;
        self.call_unit(
            Method::POST,
            &format!("/rooms/{}/candidate/{}", room_id, client_id),
            Some(&body),
        )
        .await
    }

    async fn check_negotiate_allowed(&self, room_id: &str, client_id: &str) -> Result<bool> {
        let response = self
            .request(
                Method::GET,
                &format!("/rooms/{}/isallownegotiate/{}", room_id, client_id),
                None,
            )
            .await?;
        if !response.ok {
            debug!(
                "Negotiation refused for {}/{}: {} {}",
                room_id, client_id, response.code, response.message
            );
        }
        Ok(response.ok)
    }

    async fn negotiate_connection(
        &self,
        room_id: &str,
        client_id: &str,
        description: &SessionDescription,
    ) -> Result<Option<SessionDescription>> {
        let body = serde_json::to_value(description)?;
        let response = self
            .request(
                Method::PUT,
                &format!("/rooms/{}/negotiate/{}", room_id, client_id),
                Some(&body),
            )
            .await?;
        if !response.ok {
            return Err(response.to_error());
        }
        let parsed: NegotiateResponse = match response.data {
            Value::Null => NegotiateResponse::default(),
            data => serde_json::from_value(data)?,
        };
        Ok(parsed.answer)
    }

    async fn set_track_sources(
        &self,
        room_id: &str,
        client_id: &str,
        sources: Vec<TrackSource>,
    ) -> Result<()> {
        let body = serde_json::to_value(&sources)?;
        self.call_unit(
            Method::PUT,
            &format!("/rooms/{}/settracksources/{}", room_id, client_id),
            Some(&body),
        )
        .await
    }

    async fn subscribe_tracks(
        &self,
        room_id: &str,
        client_id: &str,
        tracks: Vec<TrackSubscription>,
    ) -> Result<()> {
        let body = serde_json::to_value(&tracks)?;
        self.call_unit(
            Method::POST,
            &format!("/rooms/{}/subscribetracks/{}", room_id, client_id),
            Some(&body),
        )
        .await
    }

    async fn leave_room(&self, room_id: &str, client_id: &str, use_beacon: bool) -> Result<()> {
        let path = format!("/rooms/{}/leave/{}", room_id, client_id);
        if use_beacon {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.call_unit(Method::DELETE, &path, None).await {
                    warn!("Leave request failed: {}", e);
                }
            });
            return Ok(());
        }
        self.call_unit(Method::DELETE, &path, None).await
    }

    async fn end_room(&self, room_id: &str) -> Result<()> {
        self.call_unit(Method::PUT, &format!("/rooms/{}/end", room_id), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StaticToken;
    use parking_lot::Mutex;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RotatingToken {
        current: Mutex<String>,
        refreshes: Mutex<u32>,
    }

    #[async_trait]
    impl TokenProvider for RotatingToken {
        fn token(&self) -> Option<String> {
            Some(self.current.lock().clone())
        }

        async fn refresh(&self) -> Result<Option<String>> {
            *self.refreshes.lock() += 1;
            *self.current.lock() = "fresh".to_string();
            Ok(self.token())
        }
    }

    fn plane(server: &MockServer, tokens: Arc<dyn TokenProvider>) -> HttpControlPlane {
        let config = ApiConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        HttpControlPlane::new(&config, tokens).unwrap()
    }

    #[tokio::test]
    async fn expired_token_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/rooms/r1"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401).insert_header(TOKEN_EXPIRED_HEADER, "true"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/rooms/r1"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "ok": true,
                "message": "ok",
                "data": {"room_id": "r1", "name": "standup"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = Arc::new(RotatingToken {
            current: Mutex::new("stale".to_string()),
            refreshes: Mutex::new(0),
        });
        let room = plane(&server, tokens.clone()).get_room("r1").await.unwrap();
        assert_eq!(room.id, "r1");
        assert_eq!(*tokens.refreshes.lock(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_retried_only_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/rooms/r1"))
            .respond_with(ResponseTemplate::new(401).insert_header(TOKEN_EXPIRED_HEADER, "1"))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = Arc::new(RotatingToken {
            current: Mutex::new("stale".to_string()),
            refreshes: Mutex::new(0),
        });
        let err = plane(&server, tokens.clone()).get_room("r1").await.unwrap_err();
        assert!(matches!(err, Error::Api { code: 401, .. }));
        assert_eq!(*tokens.refreshes.lock(), 1);
    }

    #[tokio::test]
    async fn missing_client_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/rooms/r1/clients/c1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": 404, "ok": false, "message": "client not found", "data": null
            })))
            .mount(&server)
            .await;

        let err = plane(&server, Arc::new(StaticToken::default()))
            .get_client("r1", "c1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API error 404: client not found");
    }

    #[tokio::test]
    async fn negotiate_permission_and_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/rooms/r1/isallownegotiate/c1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/rooms/r1/negotiate/c1"))
            .and(body_json(json!({"type": "offer", "sdp": "v=0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "ok": true, "message": "",
                "data": {"answer": {"type": "answer", "sdp": "v=0 answer"}}
            })))
            .mount(&server)
            .await;

        let api = plane(&server, Arc::new(StaticToken::default()));
        assert!(!api.check_negotiate_allowed("r1", "c1").await.unwrap());
        let answer = api
            .negotiate_connection("r1", "c1", &SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert_eq!(answer, Some(SessionDescription::answer("v=0 answer")));
    }

    #[tokio::test]
    async fn track_subscription_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rooms/r1/subscribetracks/c1"))
            .and(body_json(json!([
                {"client_id": "c2", "stream_id": "s1", "track_id": "t1"}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200, "ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        plane(&server, Arc::new(StaticToken::default()))
            .subscribe_tracks(
                "r1",
                "c1",
                vec![TrackSubscription {
                    client_id: "c2".into(),
                    stream_id: "s1".into(),
                    track_id: "t1".into(),
                }],
            )
            .await
            .unwrap();
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = ApiConfig {
            base_url: "ws://example.com".to_string(),
            ..Default::default()
        };
        assert!(HttpControlPlane::new(&config, Arc::new(StaticToken::default())).is_err());
    }
}
