//! Authenticated JSON calls with Google-style error bodies mapped onto `RemoteError`.

use std::time::Instant;

use metrics::{counter, histogram};
use plinth_core::RemoteError;
use plinth_ops::RemoteResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Pull the human message out of `{"error":{"message":..}}`, falling back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ => body.trim().to_string(),
    }
}

pub(crate) struct Http {
    client: reqwest::Client,
    token: String,
}

impl Http {
    pub(crate) fn new(client: reqwest::Client, token: String) -> Self {
        Self { client, token }
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        self.send("GET", self.client.get(url), url).await
    }

    pub(crate) async fn get_query<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> RemoteResult<T> {
        self.send("GET", self.client.get(url).query(query), url).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> RemoteResult<T> {
        self.send("POST", self.client.post(url).json(body), url).await
    }

    pub(crate) async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> RemoteResult<T> {
        self.send("PUT", self.client.put(url).json(body), url).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        self.send("DELETE", self.client.delete(url), url).await
    }

    async fn send<T: DeserializeOwned>(&self, method: &str, req: reqwest::RequestBuilder, url: &str) -> RemoteResult<T> {
        let t0 = Instant::now();
        counter!("hub_requests_total", 1u64);
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{} {}: {}", method, url, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("reading {} {} response: {}", method, url, e)))?;
        histogram!("hub_request_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(method, url, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "hub: request");
        if !status.is_success() {
            counter!("hub_request_err", 1u64);
            return Err(RemoteError::from_status(status.as_u16(), error_message(&body)));
        }
        // Some deletes answer with an empty body.
        let text = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(text)
            .map_err(|e| RemoteError::Transport(format!("decoding {} {} response: {}", method, url, e)))
    }
}
