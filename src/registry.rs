use crate::config::AwsConfig;
use crate::image::ImageRecord;
use crate::image_reference::aws_domain;
use crate::sigv4::{Credentials, Signer, amz_date};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const ECR_SIGNING_NAME: &str = "ecr";
const ECR_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const DESCRIBE_IMAGES_TARGET: &str = "AmazonEC2ContainerRegistry_V20150921.DescribeImages";
const DESCRIBE_IMAGES_PAGE_SIZE: u32 = 1000;

/// Read access to the images of a container registry.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageRecord>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeImagesRequest<'a> {
    repository_name: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeImagesResponse {
    #[serde(default)]
    image_details: Vec<ImageRecord>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct AwsErrorResponse {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Amazon ECR client speaking the JSON 1.1 protocol with SigV4 signed requests.
pub struct EcrRegistry {
    http_client: Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

pub fn default_endpoint(region: &str) -> String {
    format!("https://api.ecr.{}.{}", region, aws_domain(region))
}

impl EcrRegistry {
    pub fn new(config: &AwsConfig) -> Result<Self> {
        info!("Initializing ECR HTTP client for region {}", config.region);
        // System certificates are loaded automatically with rustls-tls-native-roots
        let http_client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = match &config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => default_endpoint(&config.region),
        };
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("Invalid ECR endpoint {}", endpoint))?;
        if endpoint.query().is_some() {
            anyhow::bail!("ECR endpoint {} must not carry a query string", endpoint);
        }

        Ok(Self {
            http_client,
            endpoint,
            region: config.region.clone(),
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token: config.session_token.clone(),
            },
        })
    }

    fn host(&self) -> Result<String> {
        let host = self
            .endpoint
            .host_str()
            .context("ECR endpoint has no host")?;
        Ok(match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    fn signed_headers(&self, target: &str, payload: &[u8]) -> Result<HeaderMap> {
        let now = Utc::now();
        let mut signed = BTreeMap::from([
            ("content-type".to_string(), ECR_CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host()?),
            ("x-amz-date".to_string(), amz_date(&now)),
            ("x-amz-target".to_string(), target.to_string()),
        ]);
        if let Some(token) = &self.credentials.session_token {
            signed.insert(
                "x-amz-security-token".to_string(),
                token.expose_secret().to_string(),
            );
        }

        let signer = Signer {
            credentials: &self.credentials,
            region: &self.region,
            service: ECR_SIGNING_NAME,
        };
        // the request goes to the endpoint as configured, so its path is what gets signed
        let authorization =
            signer.authorization("POST", self.endpoint.path(), &signed, payload, &now);

        let mut headers = HeaderMap::new();
        for (name, value) in signed {
            // reqwest derives Host from the URL
            if name == "host" {
                continue;
            }
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        Ok(headers)
    }

    async fn describe_images_page(
        &self,
        repository: &str,
        next_token: Option<&str>,
    ) -> Result<DescribeImagesResponse> {
        let payload = serde_json::to_vec(&DescribeImagesRequest {
            repository_name: repository,
            max_results: DESCRIBE_IMAGES_PAGE_SIZE,
            next_token,
        })?;
        let headers = self.signed_headers(DESCRIBE_IMAGES_TARGET, &payload)?;

        debug!("Calling DescribeImages for repository {}", repository);
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(payload)
            .send()
            .await
            .context("Failed to send DescribeImages request")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read DescribeImages response")?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<AwsErrorResponse>(&body)
                .ok()
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.error_type.as_deref().unwrap_or("UnknownError"),
                        e.message.as_deref().unwrap_or("no message")
                    )
                })
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            anyhow::bail!(
                "ECR returned error status {} while describing images of repository {}: {}",
                status,
                repository,
                detail
            );
        }

        serde_json::from_slice(&body).context("Failed to parse DescribeImages response")
    }
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageRecord>> {
        let mut images = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .describe_images_page(repository, next_token.as_deref())
                .await?;
            images.extend(page.image_details);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        debug!("Found {} images in repository {}", images.len(), repository);
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_string::SecretString;
    use chrono::NaiveDateTime;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn aws_config(endpoint: &str) -> AwsConfig {
        AwsConfig {
            region: "eu-west-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: SecretString::new("secret"),
            session_token: Some(SecretString::new("session")),
            endpoint: Some(endpoint.to_string()),
        }
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(
            default_endpoint("eu-west-1"),
            "https://api.ecr.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            default_endpoint("cn-northwest-1"),
            "https://api.ecr.cn-northwest-1.amazonaws.com.cn"
        );
    }

    #[tokio::test]
    async fn test_list_images_follows_pagination() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", DESCRIBE_IMAGES_TARGET))
            .and(header("content-type", ECR_CONTENT_TYPE))
            .and(header("x-amz-security-token", "session"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .and(body_partial_json(json!({ "repositoryName": "my-app", "nextToken": "page-2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "imageDetails": [{
                    "registryId": "123",
                    "repositoryName": "my-app",
                    "imageDigest": "sha256:b",
                    "imageTags": ["production", "abc123"]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "imageDetails": [{
                    "registryId": "123",
                    "repositoryName": "my-app",
                    "imageDigest": "sha256:a"
                }],
                "nextToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let registry = EcrRegistry::new(&aws_config(&server.uri())).unwrap();
        let images = registry.list_images("my-app").await.unwrap();

        assert_eq!(images.len(), 2);
        assert!(images[0].image_tags.is_empty());
        assert_eq!(images[1].image_tags, vec!["production", "abc123"]);
    }

    #[tokio::test]
    async fn test_list_images_reports_aws_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "RepositoryNotFoundException",
                "message": "The repository with name 'missing' does not exist"
            })))
            .mount(&server)
            .await;

        let registry = EcrRegistry::new(&aws_config(&server.uri())).unwrap();
        let error = registry.list_images("missing").await.unwrap_err();

        let message = format!("{:#}", error);
        assert!(message.contains("RepositoryNotFoundException"), "{}", message);
        assert!(message.contains("400"), "{}", message);
    }

    #[tokio::test]
    async fn test_list_images_signs_endpoint_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ecr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imageDetails": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let config = aws_config(&format!("{}/ecr", server.uri()));
        let registry = EcrRegistry::new(&config).unwrap();
        registry.list_images("my-app").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        };
        let time = NaiveDateTime::parse_from_str(&header("x-amz-date"), "%Y%m%dT%H%M%SZ")
            .unwrap()
            .and_utc();
        let signed = BTreeMap::from([
            ("content-type".to_string(), ECR_CONTENT_TYPE.to_string()),
            ("host".to_string(), registry.host().unwrap()),
            ("x-amz-date".to_string(), header("x-amz-date")),
            ("x-amz-security-token".to_string(), "session".to_string()),
            ("x-amz-target".to_string(), DESCRIBE_IMAGES_TARGET.to_string()),
        ]);
        let signer = Signer {
            credentials: &registry.credentials,
            region: "eu-west-1",
            service: ECR_SIGNING_NAME,
        };

        assert_eq!(
            header("authorization"),
            signer.authorization("POST", "/ecr", &signed, &request.body, &time)
        );
        assert_ne!(
            header("authorization"),
            signer.authorization("POST", "/", &signed, &request.body, &time)
        );
    }

    #[test]
    fn test_endpoint_with_query_is_rejected() {
        let config = aws_config("http://localhost:4566/?region=eu-west-1");
        assert!(EcrRegistry::new(&config).is_err());
    }
}
