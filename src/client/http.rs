use super::*;
use crate::protocol::{ApiEnvelope, StartGameRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;

const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Game server client over its JSON HTTP API
pub struct HttpGameClient {
    base_url: String,
    admin_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpGameClient {
    pub fn new(
        base_url: impl Into<String>,
        admin_token: Option<String>,
        timeout: Duration,
    ) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_token,
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ControlResult<Option<T>> {
        let request = self.client.get(self.url(path));
        self.execute(request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> ControlResult<Option<T>> {
        let mut request = self.client.post(self.url(path));
        if let Some(token) = &self.admin_token {
            request = request.header(ADMIN_TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await
    }

    /// Send a request and unwrap the `{code, message, data}` envelope
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ControlResult<Option<T>> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ControlError::Timeout(self.timeout)
            } else {
                ControlError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        // Error responses usually still carry an envelope with a message
        let envelope: ApiEnvelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(ControlError::Parse(e.to_string())),
            Err(_) => {
                return Err(ControlError::Rejected {
                    code: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("unknown").to_string(),
                })
            }
        };

        if !status.is_success() || !envelope.is_ok() {
            return Err(ControlError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }

        Ok(envelope.data)
    }
}

#[async_trait]
impl GameControl for HttpGameClient {
    async fn start_game(&self, words: &WordPair) -> ControlResult<StartGameAck> {
        let body = StartGameRequest::from(words);
        let ack: Option<StartGameAck> = self.post("/api/game/start", Some(&body)).await?;
        Ok(ack.unwrap_or_default())
    }

    async fn start_round(&self) -> ControlResult<()> {
        self.post::<(), serde_json::Value>("/api/game/round/start", None)
            .await?;
        Ok(())
    }

    async fn reset(&self) -> ControlResult<()> {
        self.post::<(), serde_json::Value>("/api/game/reset", None)
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> ControlResult<()> {
        self.post::<(), serde_json::Value>("/api/game/clear_all", None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatePoller for HttpGameClient {
    async fn fetch_state(&self) -> ControlResult<GameSnapshot> {
        self.get("/api/game/state")
            .await?
            .ok_or_else(|| ControlError::Parse("State response carried no data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client =
            HttpGameClient::new("http://localhost:5000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/api/game/state"), "http://localhost:5000/api/game/state");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client =
            HttpGameClient::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let result = client.fetch_state().await;
        assert!(matches!(
            result,
            Err(ControlError::Transport(_)) | Err(ControlError::Timeout(_))
        ));
    }
}
