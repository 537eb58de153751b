use crate::config::KubernetesConfig;
use crate::patch::PatchDocument;
use crate::workload::{Workload, WorkloadKind, WorkloadRef, WorkloadSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Resource};
use tracing::{debug, info, warn};

static ECR_AUTOROLLOUT_FIELD_MANAGER: &str = "ecr-autorollout";
static JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Read and patch access to the reconciled workloads.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_snapshot(&self, workload: &WorkloadRef) -> Result<WorkloadSnapshot>;
    async fn apply_patch(&self, workload: &WorkloadRef, patch: &PatchDocument) -> Result<()>;
}

pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn snapshot_of<K: Workload>(&self, workload: &WorkloadRef) -> Result<WorkloadSnapshot> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        let resource = api
            .get(&workload.name)
            .await
            .with_context(|| format!("Failed to get {}", workload))?;
        Ok(resource.snapshot())
    }

    async fn json_patch<K: Workload>(
        &self,
        workload: &WorkloadRef,
        patch: &PatchDocument,
    ) -> Result<()> {
        let url = format!(
            "{}/{}?fieldManager={}",
            K::url_path(&(), Some(workload.namespace.as_str())),
            workload.name,
            ECR_AUTOROLLOUT_FIELD_MANAGER
        );
        let body = serde_json::to_vec(patch).context("Failed to serialize patch document")?;
        debug!("Patching {} with patch {}", workload, String::from_utf8_lossy(&body));

        let request = http::Request::patch(url)
            .header(http::header::CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(body)
            .context("Failed to build patch request")?;
        let _patched: K = self
            .client
            .request(request)
            .await
            .with_context(|| format!("Failed to patch {}", workload))?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn get_snapshot(&self, workload: &WorkloadRef) -> Result<WorkloadSnapshot> {
        match workload.kind {
            WorkloadKind::Deployment => self.snapshot_of::<Deployment>(workload).await,
            WorkloadKind::StatefulSet => self.snapshot_of::<StatefulSet>(workload).await,
        }
    }

    async fn apply_patch(&self, workload: &WorkloadRef, patch: &PatchDocument) -> Result<()> {
        match workload.kind {
            WorkloadKind::Deployment => self.json_patch::<Deployment>(workload, patch).await,
            WorkloadKind::StatefulSet => self.json_patch::<StatefulSet>(workload, patch).await,
        }
    }
}

/// Parses a kubeconfig given either verbatim (YAML or JSON) or base64-encoded.
pub fn decode_kubeconfig(raw: &str) -> Result<Kubeconfig> {
    let trimmed = raw.trim();
    // base64 never contains ':', every kubeconfig document does
    let document = if trimmed.contains(':') {
        trimmed.to_string()
    } else {
        info!("Decoding a base64-encoded kubeconfig");
        let compact: String = trimmed.split_whitespace().collect();
        let bytes = BASE64_STANDARD
            .decode(compact)
            .context("Kubeconfig is neither a kubeconfig document nor valid base64")?;
        String::from_utf8(bytes).context("Decoded kubeconfig is not valid UTF-8")?
    };
    Kubeconfig::from_yaml(&document).context("Failed to parse kubeconfig")
}

pub async fn kube_config(config: &KubernetesConfig) -> Result<kube::Config> {
    let options = KubeConfigOptions {
        context: config.cluster_name.clone(),
        ..Default::default()
    };
    match &config.kubeconfig {
        Some(raw) => {
            let kubeconfig = decode_kubeconfig(raw.expose_secret())?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("Failed to load the supplied kubeconfig")
        }
        None => kube::Config::from_kubeconfig(&options)
            .await
            .context("Failed to load the local kubeconfig"),
    }
}

pub async fn create_client(config: &KubernetesConfig) -> Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_from(kube_config(config).await?)?;
    // an unreachable API server fails the cycles as transient errors instead of the process
    match client.apiserver_version().await {
        Ok(api_server_info) => info!(
            "Connected to Kubernetes API server with version {}.{}, reconciling namespace {}",
            api_server_info.major, api_server_info.minor, config.namespace
        ),
        Err(e) => warn!(
            "Kubernetes API server is not reachable yet, reconciling namespace {} anyway: {:#}",
            config.namespace, e
        ),
    }
    Ok(client)
}
