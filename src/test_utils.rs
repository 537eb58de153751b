//! In-memory registry and workload store for exercising reconciliation cycles.

use crate::image::ImageRecord;
use crate::patch::{PatchDocument, PatchOperation};
use crate::registry::ImageRegistry;
use crate::state::{ControllerContext, Target};
use crate::workload::{ContainerImage, WorkloadKind, WorkloadRef, WorkloadSnapshot};
use crate::workload_store::WorkloadStore;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub fn image_record(digest: &str, tags: &[&str]) -> ImageRecord {
    ImageRecord {
        registry_id: "123".to_string(),
        repository_name: "my-app".to_string(),
        image_digest: digest.to_string(),
        image_tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct MockRegistry {
    images: Mutex<Vec<ImageRecord>>,
    failure: Mutex<Option<String>>,
}

impl MockRegistry {
    pub fn new(images: Vec<ImageRecord>) -> Self {
        Self {
            images: Mutex::new(images),
            failure: Mutex::new(None),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ImageRegistry for MockRegistry {
    async fn list_images(&self, _repository: &str) -> Result<Vec<ImageRecord>> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(self.images.lock().unwrap().clone())
    }
}

/// Keeps one workload's containers in memory and applies image replace patches to them.
#[derive(Default)]
pub struct MockWorkloadStore {
    snapshot: Mutex<WorkloadSnapshot>,
    patches: Mutex<Vec<PatchDocument>>,
    get_calls: Mutex<usize>,
    last_workload: Mutex<Option<WorkloadRef>>,
    patch_failure: Mutex<Option<String>>,
}

impl MockWorkloadStore {
    pub fn new(images: &[&str]) -> Self {
        let containers = images
            .iter()
            .enumerate()
            .map(|(i, image)| ContainerImage {
                name: format!("container-{}", i),
                image: image.to_string(),
            })
            .collect();
        Self {
            snapshot: Mutex::new(WorkloadSnapshot { containers }),
            ..Default::default()
        }
    }

    pub fn fail_patches_with(&self, message: &str) {
        *self.patch_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn patches(&self) -> Vec<PatchDocument> {
        self.patches.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> usize {
        *self.get_calls.lock().unwrap()
    }

    pub fn last_workload(&self) -> Option<WorkloadRef> {
        self.last_workload.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkloadStore for MockWorkloadStore {
    async fn get_snapshot(&self, workload: &WorkloadRef) -> Result<WorkloadSnapshot> {
        *self.get_calls.lock().unwrap() += 1;
        *self.last_workload.lock().unwrap() = Some(workload.clone());
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn apply_patch(&self, workload: &WorkloadRef, patch: &PatchDocument) -> Result<()> {
        *self.last_workload.lock().unwrap() = Some(workload.clone());
        if let Some(message) = self.patch_failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }

        let mut snapshot = self.snapshot.lock().unwrap();
        for operation in &patch.0 {
            let PatchOperation::Replace { path, value } = operation;
            let index: usize = path
                .trim_start_matches("/spec/template/spec/containers/")
                .trim_end_matches("/image")
                .parse()?;
            snapshot.containers[index].image = value.clone();
        }
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

pub struct Fixture {
    pub registry: Arc<MockRegistry>,
    pub store: Arc<MockWorkloadStore>,
    pub target: Target,
}

impl Fixture {
    pub fn new(images: Vec<ImageRecord>, container_images: &[&str]) -> Self {
        Self {
            registry: Arc::new(MockRegistry::new(images)),
            store: Arc::new(MockWorkloadStore::new(container_images)),
            target: Target {
                region: "eu-west-1".to_string(),
                repository: "my-app".to_string(),
                channel_tag: "production".to_string(),
                workload: WorkloadRef {
                    kind: WorkloadKind::Deployment,
                    namespace: "default".to_string(),
                    name: "my-app".to_string(),
                },
            },
        }
    }

    pub fn ctx(&self) -> ControllerContext {
        ControllerContext {
            registry: self.registry.clone(),
            workload_store: self.store.clone(),
            target: self.target.clone(),
        }
    }
}
