use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use podwright_core::{Pod, PodId};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client speaking the core/v1 pods API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

/// Subset of `meta/v1 Status` returned on failed requests
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Post,
    Get,
    Put,
    Delete,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn id_of(pod: &Pod) -> PodId {
        PodId::with_default_namespace(
            pod.metadata.namespace.as_deref(),
            pod.metadata.name.clone().unwrap_or_default(),
        )
    }

    async fn decode(resp: Response) -> ClusterResult<Pod> {
        resp.json::<Pod>()
            .await
            .map_err(|e| ClusterError::decode(format!("Failed to parse pod: {}", e)))
    }

    async fn send(&self, verb: Verb, id: &PodId, request: reqwest::RequestBuilder) -> ClusterResult<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| ClusterError::transport(format!("HTTP request failed: {}", e)))?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(map_status(verb, id, status, &body))
    }
}

/// Translate a non-success response into a cluster error
fn map_status(verb: Verb, id: &PodId, status: StatusCode, body: &str) -> ClusterError {
    let parsed: StatusBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.to_string()
    } else {
        parsed.message
    };

    match status {
        StatusCode::NOT_FOUND => ClusterError::not_found(&id.namespace, &id.name),
        StatusCode::CONFLICT if verb == Verb::Post => {
            ClusterError::already_exists(&id.namespace, &id.name)
        }
        StatusCode::CONFLICT => ClusterError::conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
            ClusterError::rejected(status.as_u16(), parsed.reason, message)
        }
        _ => ClusterError::transport(format!(
            "{:?} {} failed with status {}: {}",
            verb, id, status, message
        )),
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    /// POST /api/v1/namespaces/{namespace}/pods
    async fn create(&self, pod: &Pod) -> ClusterResult<Pod> {
        let id = Self::id_of(pod);
        let url = self.url(&id.collection_path());
        debug!("POST {}", url);

        let resp = self.send(Verb::Post, &id, self.client.post(&url).json(pod)).await?;
        Self::decode(resp).await
    }

    /// GET /api/v1/namespaces/{namespace}/pods/{name}
    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Pod> {
        let id = PodId::new(namespace, name);
        let url = self.url(&id.api_path());
        debug!("GET {}", url);

        let resp = self.send(Verb::Get, &id, self.client.get(&url)).await?;
        Self::decode(resp).await
    }

    /// PUT /api/v1/namespaces/{namespace}/pods/{name}
    async fn update(&self, pod: &Pod) -> ClusterResult<Pod> {
        let id = Self::id_of(pod);
        let url = self.url(&id.api_path());
        debug!("PUT {}", url);

        let resp = self.send(Verb::Put, &id, self.client.put(&url).json(pod)).await?;
        Self::decode(resp).await
    }

    /// DELETE /api/v1/namespaces/{namespace}/pods/{name}
    async fn delete(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let id = PodId::new(namespace, name);
        let url = self.url(&id.api_path());
        debug!("DELETE {}", url);

        self.send(Verb::Delete, &id, self.client.delete(&url)).await?;
        Ok(())
    }
}
