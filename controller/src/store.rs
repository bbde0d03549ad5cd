use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use socketsync_common::StoreConfig;

/// Key-value access to the remote state tree.
#[async_trait]
pub trait RemoteStateClient: Send + Sync {
    /// Returns `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, path: &str, key: &str, value: Value) -> anyhow::Result<Value>;
}

/// Firebase realtime database over its REST interface.
#[derive(Clone)]
pub struct FirebaseClient {
    client: reqwest::Client,
    base_url: String,
    auth_secret: String,
}

impl FirebaseClient {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_secret: config.auth_secret.clone(),
        })
    }

    fn url_for(&self, segments: &[&str]) -> String {
        let path = segments
            .iter()
            .flat_map(|segment| segment.split('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{path}.json", self.base_url)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.auth_secret.is_empty() {
            request
        } else {
            request.query(&[("auth", self.auth_secret.as_str())])
        }
    }
}

#[async_trait]
impl RemoteStateClient for FirebaseClient {
    async fn get(&self, path: &str) -> anyhow::Result<Option<Value>> {
        let url = self.url_for(&[path]);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("failed to read {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("read of {path} failed with status {status}: {body}");
        }

        let value: Value = response
            .json()
            .await
            .with_context(|| format!("failed to decode {path}"))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn put(&self, path: &str, key: &str, value: Value) -> anyhow::Result<Value> {
        let url = self.url_for(&[path, key]);
        let response = self
            .with_auth(self.client.put(&url))
            .json(&value)
            .send()
            .await
            .with_context(|| format!("failed to write {path}/{key}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("write of {path}/{key} failed with status {status}: {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to decode write result for {path}/{key}"))
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct StoreWrite {
    pub path: String,
    pub key: String,
    pub value: Value,
}

/// In-process tree with the same path semantics as the remote store.
#[derive(Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    #[cfg(test)]
    writes: Mutex<Vec<StoreWrite>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            root: Mutex::new(root),
            #[cfg(test)]
            writes: Mutex::new(Vec::new()),
        }
    }

    pub async fn set(&self, path: &str, value: Value) {
        let mut root = self.root.lock().await;
        *node_mut(&mut root, path) = value;
    }

    #[cfg(test)]
    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl RemoteStateClient for MemoryStore {
    async fn get(&self, path: &str) -> anyhow::Result<Option<Value>> {
        let root = self.root.lock().await;
        let mut node = &*root;
        for part in split_path(path) {
            match node.get(part) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok((!node.is_null()).then(|| node.clone()))
    }

    async fn put(&self, path: &str, key: &str, value: Value) -> anyhow::Result<Value> {
        {
            let mut root = self.root.lock().await;
            let parent = node_mut(&mut root, path);
            if !parent.is_object() {
                *parent = Value::Object(Map::new());
            }
            if let Value::Object(map) = parent {
                map.insert(key.to_string(), value.clone());
            }
        }

        #[cfg(test)]
        self.writes.lock().await.push(StoreWrite {
            path: path.to_string(),
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(value)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

fn node_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut node = root;
    for part in split_path(path) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            unreachable!("node was just replaced with an object");
        };
        node = map.entry(part.to_string()).or_insert(Value::Null);
    }
    node
}
