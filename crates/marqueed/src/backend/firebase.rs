//! Firebase Realtime Database backend.
//!
//! Subscriptions use the REST streaming interface: a long-lived HTTP request
//! with `Accept: text/event-stream` on a `.json` resource, which delivers a
//! `put` with the full current value on attach and `put`/`patch` deltas
//! afterwards. Writes are plain `PUT`s of a JSON string.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Backend;
use super::BackendError;
use super::BackendEvent;
use crate::engine::SwitchState;

/// Delay before reopening a dropped subscription stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Payload of a `put`/`patch` stream event: a path relative to the subscribed
/// resource and the data written there.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: serde_json::Value,
}

pub struct FirebaseBackend {
    /// Database root, e.g. `https://example-rtdb.firebaseio.com`.
    base_url: String,

    /// Pre-established identity token, appended as the `auth` query
    /// parameter. Obtaining it is outside this component.
    auth_token: Option<String>,

    http: reqwest::Client,

    /// Receiver for events forwarded by the stream tasks (created in
    /// connect()).
    event_rx: Option<mpsc::UnboundedReceiver<BackendEvent>>,

    /// Background subscription stream tasks.
    stream_tasks: Vec<JoinHandle<()>>,
}

impl FirebaseBackend {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            http: reqwest::Client::new(),
            event_rx: None,
            stream_tasks: Vec::new(),
        }
    }

    /// REST URL for a database path, with the auth token if configured.
    fn resource_url(&self, path: &str) -> String {
        match &self.auth_token {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    /// Stream the `lights` resource, maintaining a cached view and forwarding
    /// a full snapshot on every change. Reconnects forever on stream errors;
    /// the cached view (and therefore the engine's last-known state) is left
    /// untouched while disconnected.
    async fn run_lights_stream(
        http: reqwest::Client,
        url: String,
        tx: mpsc::UnboundedSender<BackendEvent>,
    ) {
        let mut cache: HashMap<String, String> = HashMap::new();
        loop {
            let response = match http
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("lights stream connection failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("lights stream error: {e}");
                        break;
                    }
                };

                match event.event.as_str() {
                    "put" | "patch" => match serde_json::from_str::<StreamPayload>(&event.data) {
                        Ok(payload) => {
                            apply_lights_event(&mut cache, &event.event, &payload);
                            if tx.send(BackendEvent::Snapshot(cache.clone())).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("unparseable lights stream payload: {e}"),
                    },
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        warn!("lights stream closed by server: {}", event.event);
                        break;
                    }
                    other => debug!("ignoring lights stream event: {other}"),
                }
            }

            info!("lights stream dropped, reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Stream the heartbeat resource. Every non-null (re)write counts as one
    /// observation; the value itself is opaque.
    async fn run_heartbeat_stream(
        http: reqwest::Client,
        url: String,
        tx: mpsc::UnboundedSender<BackendEvent>,
    ) {
        loop {
            let response = match http
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("heartbeat stream connection failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("heartbeat stream error: {e}");
                        break;
                    }
                };

                match event.event.as_str() {
                    "put" | "patch" => match serde_json::from_str::<StreamPayload>(&event.data) {
                        Ok(payload) if !payload.data.is_null() => {
                            if tx.send(BackendEvent::Heartbeat).is_err() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("unparseable heartbeat stream payload: {e}"),
                    },
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        warn!("heartbeat stream closed by server: {}", event.event);
                        break;
                    }
                    _ => {}
                }
            }

            info!("heartbeat stream dropped, reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

/// Apply one `put`/`patch` stream event to the cached lights map.
///
/// A `put` at "/" replaces the whole map, a `put` at "/{id}" sets or (for
/// null data) removes one entry, and a `patch` merges its entries. Non-string
/// values are skipped; the device only ever writes `"on"`/`"off"`.
fn apply_lights_event(cache: &mut HashMap<String, String>, kind: &str, payload: &StreamPayload) {
    let child = payload.path.trim_matches('/');
    match (kind, child.is_empty()) {
        ("put", true) => {
            cache.clear();
            if let Some(map) = payload.data.as_object() {
                for (id, value) in map {
                    if let Some(value) = value.as_str() {
                        cache.insert(id.clone(), value.to_string());
                    } else {
                        warn!("skipping non-string value for switch {id}");
                    }
                }
            } else if !payload.data.is_null() {
                warn!("unexpected lights root value: {}", payload.data);
            }
        }
        ("put", false) => {
            if payload.data.is_null() {
                cache.remove(child);
            } else if let Some(value) = payload.data.as_str() {
                cache.insert(child.to_string(), value.to_string());
            } else {
                warn!("skipping non-string value for switch {child}");
            }
        }
        ("patch", true) => {
            if let Some(map) = payload.data.as_object() {
                for (id, value) in map {
                    if value.is_null() {
                        cache.remove(id);
                    } else if let Some(value) = value.as_str() {
                        cache.insert(id.clone(), value.to_string());
                    }
                }
            }
        }
        ("patch", false) => {
            warn!("ignoring nested patch at lights/{child}");
        }
        _ => {}
    }
}

#[async_trait]
impl Backend for FirebaseBackend {
    async fn connect(&mut self) -> Result<(), BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();

        info!("subscribing to {}", self.base_url);
        self.stream_tasks.push(tokio::spawn(Self::run_lights_stream(
            self.http.clone(),
            self.resource_url("lights"),
            tx.clone(),
        )));
        self.stream_tasks
            .push(tokio::spawn(Self::run_heartbeat_stream(
                self.http.clone(),
                self.resource_url("status/timestamp"),
                tx,
            )));

        self.event_rx = Some(rx);
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<BackendEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn write_switch(
        &mut self,
        switch_id: &str,
        state: SwitchState,
    ) -> Result<(), BackendError> {
        if self.event_rx.is_none() {
            return Err(BackendError::NotConnected);
        }

        let path = format!("lights/{switch_id}");
        let response = self
            .http
            .put(self.resource_url(&path))
            .json(&state.as_wire())
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Rejected {
                path,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

impl Drop for FirebaseBackend {
    fn drop(&mut self) {
        for task in self.stream_tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(path: &str, data: serde_json::Value) -> StreamPayload {
        StreamPayload {
            path: path.to_string(),
            data,
        }
    }

    #[test]
    fn test_resource_url() {
        let backend = FirebaseBackend::new("https://db.example.com/", None);
        assert_eq!(backend.resource_url("lights"), "https://db.example.com/lights.json");

        let backend = FirebaseBackend::new("https://db.example.com", Some("tok".to_string()));
        assert_eq!(
            backend.resource_url("lights/3"),
            "https://db.example.com/lights/3.json?auth=tok"
        );
    }

    #[test]
    fn test_root_put_replaces_cache() {
        let mut cache = HashMap::from([("0".to_string(), "on".to_string())]);
        apply_lights_event(
            &mut cache,
            "put",
            &payload("/", serde_json::json!({"1": "on", "2": "off"})),
        );

        assert_eq!(cache.get("1").map(String::as_str), Some("on"));
        assert_eq!(cache.get("2").map(String::as_str), Some("off"));
        assert!(!cache.contains_key("0"));
    }

    #[test]
    fn test_root_put_null_clears_cache() {
        let mut cache = HashMap::from([("0".to_string(), "on".to_string())]);
        apply_lights_event(&mut cache, "put", &payload("/", serde_json::Value::Null));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_child_put_sets_and_removes() {
        let mut cache = HashMap::new();
        apply_lights_event(&mut cache, "put", &payload("/3", serde_json::json!("on")));
        assert_eq!(cache.get("3").map(String::as_str), Some("on"));

        apply_lights_event(&mut cache, "put", &payload("/3", serde_json::Value::Null));
        assert!(!cache.contains_key("3"));
    }

    #[test]
    fn test_patch_merges_entries() {
        let mut cache = HashMap::from([("0".to_string(), "on".to_string())]);
        apply_lights_event(
            &mut cache,
            "patch",
            &payload("/", serde_json::json!({"0": "off", "1": "on"})),
        );

        assert_eq!(cache.get("0").map(String::as_str), Some("off"));
        assert_eq!(cache.get("1").map(String::as_str), Some("on"));
    }

    #[test]
    fn test_non_string_values_are_skipped() {
        let mut cache = HashMap::new();
        apply_lights_event(&mut cache, "put", &payload("/", serde_json::json!({"0": 1})));
        assert!(cache.is_empty());
    }
}
