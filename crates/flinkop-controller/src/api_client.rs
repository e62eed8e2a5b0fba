use crate::error::{ControllerError, Result};
use crate::gateway::{DeletePropagation, StateGateway};
use async_trait::async_trait;
use flinkop_core::naming::selector_string;
use flinkop_core::ResourceKey;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the Kubernetes API server
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the API server
    pub api_url: String,
    /// File holding a bearer token (the service account token in-cluster)
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the API server certificate
    pub ca_file: Option<PathBuf>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            token_file: None,
            ca_file: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the Kubernetes REST API
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

#[derive(serde::Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<Value>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
        }
    }

    /// Build a client from config, loading the token and CA bundle
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.request_timeout);

        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                ControllerError::invalid_config(
                    format!("cannot read CA bundle {}: {}", ca_file.display(), e),
                    "Point --ca-file at a readable PEM file",
                )
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ControllerError::invalid_config(
                    format!("invalid CA bundle {}: {}", ca_file.display(), e),
                    "The CA file must contain PEM encoded certificates",
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let token = match &config.token_file {
            Some(path) => {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    ControllerError::invalid_config(
                        format!("cannot read token file {}: {}", path.display(), e),
                        "Point --token-file at a readable bearer token",
                    )
                })?;
                Some(token.trim().to_string())
            }
            None => None,
        };

        let client = builder.build().map_err(|e| {
            ControllerError::internal_error(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, key: &ResourceKey) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ControllerError::gateway(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ControllerError::not_found(key.to_string())),
            StatusCode::CONFLICT => Err(ControllerError::conflict(key.to_string(), body)),
            _ => Err(ControllerError::gateway(format!(
                "{} returned status {}: {}",
                key, status, body
            ))),
        }
    }

    async fn json_body(resp: Response) -> Result<Value> {
        resp.json::<Value>()
            .await
            .map_err(|e| ControllerError::serialization(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl StateGateway for ApiClient {
    async fn get(&self, key: &ResourceKey) -> Result<Value> {
        let resp = self
            .send(self.request(Method::GET, &key.api_path()), key)
            .await?;
        Self::json_body(resp).await
    }

    async fn list(
        &self,
        collection: &ResourceKey,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        let mut builder = self.request(Method::GET, &collection.collection_path());
        if !selector.is_empty() {
            builder = builder.query(&[("labelSelector", selector_string(selector))]);
        }

        let resp = self.send(builder, collection).await?;
        let list: ObjectList = resp
            .json()
            .await
            .map_err(|e| ControllerError::serialization(format!("Failed to parse list: {}", e)))?;

        // List items come back without apiVersion/kind
        let api_version = collection.gvk.api_version();
        Ok(list
            .items
            .into_iter()
            .map(|mut item| {
                if let Some(obj) = item.as_object_mut() {
                    obj.insert("apiVersion".to_string(), json!(api_version));
                    obj.insert("kind".to_string(), json!(collection.gvk.kind));
                }
                item
            })
            .collect())
    }

    async fn create(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        let collection = ResourceKey::collection(key.gvk.clone(), key.namespace.clone());
        let builder = self
            .request(Method::POST, &collection.collection_path())
            .json(object);
        let resp = self.send(builder, key).await?;
        Self::json_body(resp).await
    }

    async fn update(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        let builder = self.request(Method::PUT, &key.api_path()).json(object);
        let resp = self.send(builder, key).await?;
        Self::json_body(resp).await
    }

    async fn update_status(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        let builder = self.request(Method::PUT, &key.status_path()).json(object);
        let resp = self.send(builder, key).await?;
        Self::json_body(resp).await
    }

    async fn delete(&self, key: &ResourceKey, propagation: DeletePropagation) -> Result<()> {
        let options = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "propagationPolicy": propagation.to_string(),
        });
        let builder = self.request(Method::DELETE, &key.api_path()).json(&options);
        self.send(builder, key).await?;
        Ok(())
    }
}
