use crate::image_reference::ImageReference;
use serde::Serialize;

/// An RFC 6902 JSON Patch, sent with content type `application/json-patch+json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PatchDocument(pub Vec<PatchOperation>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Replace { path: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The container already runs the build tag.
    NoOp,
    Patch {
        document: PatchDocument,
        new_image: String,
    },
}

fn container_image_path(container_index: usize) -> String {
    format!("/spec/template/spec/containers/{}/image", container_index)
}

/// Decides whether the container at `container_index` has drifted from `new_build_tag`.
///
/// Only the image of that one container is ever replaced.
pub fn plan(current_image: &str, new_build_tag: &str, container_index: usize) -> Plan {
    let current = ImageReference::parse(current_image);
    if current.tag.as_deref() == Some(new_build_tag) {
        return Plan::NoOp;
    }

    let new_image = current.with_tag(new_build_tag).to_string();
    let document = PatchDocument(vec![PatchOperation::Replace {
        path: container_image_path(container_index),
        value: new_image.clone(),
    }]);
    Plan::Patch {
        document,
        new_image,
    }
}
