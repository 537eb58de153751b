use crate::image::ImageRecord;
use std::fmt;

/// A container image reference split into its name, tag and digest parts.
///
/// `registry.example.com:5000/team/app:v1@sha256:...` parses into name
/// `registry.example.com:5000/team/app`, tag `v1` and the digest.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Self {
        let (without_digest, digest) = match s.split_once('@') {
            Some((reference, digest)) => (reference, Some(digest.to_string())),
            None => (s, None),
        };

        // A colon only separates a tag when it comes after the last slash,
        // otherwise it belongs to a host:port.
        let last_slash = without_digest.rfind('/');
        let (name, tag) = match without_digest.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => (
                &without_digest[..pos],
                Some(without_digest[pos + 1..].to_string()),
            ),
            _ => (without_digest, None),
        };

        Self {
            name: name.to_string(),
            tag,
            digest,
        }
    }

    /// The same image name pointing at `tag`. Any digest is dropped since it pins the old build.
    pub fn with_tag(&self, tag: &str) -> ImageReference {
        ImageReference {
            name: self.name.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }
}

/// DNS suffix of the AWS partition a region belongs to.
pub fn aws_domain(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    }
}

/// The image name prefix (`<account>.dkr.ecr.<region>.<domain>/<repository>:`) shared by
/// every tag of the record's repository.
pub fn ecr_image_prefix(region: &str, record: &ImageRecord) -> String {
    format!(
        "{}.dkr.ecr.{}.{}/{}:",
        record.registry_id,
        region,
        aws_domain(region),
        record.repository_name
    )
}
