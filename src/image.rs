use crate::error::Mismatch;
use serde::{Deserialize, Serialize};

/// One image in an ECR repository, as returned by `DescribeImages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub registry_id: String,
    pub repository_name: String,
    #[serde(default)]
    pub image_digest: String,
    #[serde(default)]
    pub image_tags: Vec<String>,
}

impl ImageRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.image_tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage<'a> {
    pub record: &'a ImageRecord,
    pub build_tag: &'a str,
}

/// Finds the image carrying `channel_tag` and the build tag it was co-tagged with.
///
/// The first image in `images` order wins if the channel tag somehow appears on more than
/// one image, and the first tag that differs from the channel tag is taken as build tag.
pub fn resolve<'a>(
    images: &'a [ImageRecord],
    repository: &str,
    channel_tag: &str,
) -> Result<ResolvedImage<'a>, Mismatch> {
    let record = images
        .iter()
        .find(|image| image.has_tag(channel_tag))
        .ok_or_else(|| Mismatch::ChannelTagNotFound {
            repository: repository.to_string(),
            channel_tag: channel_tag.to_string(),
        })?;

    let build_tag = record
        .image_tags
        .iter()
        .find(|tag| tag.as_str() != channel_tag)
        .ok_or_else(|| Mismatch::NoBuildTag {
            channel_tag: channel_tag.to_string(),
            digest: record.image_digest.clone(),
        })?;

    Ok(ResolvedImage {
        record,
        build_tag: build_tag.as_str(),
    })
}
