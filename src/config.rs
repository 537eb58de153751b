use crate::error::ConfigError;
use crate::secret_string::SecretString;
use crate::workload::{WorkloadKind, WorkloadRef};
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

const DEFAULT_REGION: &str = "eu-west-1";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_CHANNEL_TAG: &str = "latest";
const DEFAULT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_WEBSERVER_PORT: u16 = 8080;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub aws: AwsConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub target: TargetConfig,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub webserver: Webserver,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    #[serde(default)]
    pub session_token: Option<SecretString>,
    /// Overrides `https://api.ecr.<region>.<domain>`
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Kubeconfig context to use, the current context when unset
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Raw or base64-encoded kubeconfig, the local kubeconfig file when unset
    #[serde(default)]
    pub kubeconfig: Option<SecretString>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub repository: String,
    #[serde(default = "default_channel_tag")]
    pub channel_tag: String,
    #[serde(default = "default_resource_kind")]
    pub resource_kind: WorkloadKind,
    pub resource_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_channel_tag() -> String {
    DEFAULT_CHANNEL_TAG.to_string()
}

fn default_resource_kind() -> WorkloadKind {
    WorkloadKind::Deployment
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            kubeconfig: None,
            namespace: default_namespace(),
        }
    }
}

impl Default for Webserver {
    fn default() -> Self {
        Self {
            port: DEFAULT_WEBSERVER_PORT,
        }
    }
}

impl Config {
    /// Loads the config file named by `CONFIG_PATH`, or the plain environment variables otherwise.
    pub fn load() -> Result<Config> {
        match env::var("CONFIG_PATH") {
            Ok(path) => load_config(path),
            Err(_) => {
                info!("Loading config from environment variables");
                Ok(Config::from_lookup(|key| env::var(key).ok())?)
            }
        }
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| optional(key).ok_or(ConfigError::Missing(key));

        let config = Config {
            aws: AwsConfig {
                region: optional("AWS_REGION").unwrap_or_else(default_region),
                access_key_id: required("AWS_ACCESS_KEY_ID")?,
                secret_access_key: required("AWS_SECRET_ACCESS_KEY")?.into(),
                session_token: optional("AWS_SESSION_TOKEN").map(SecretString::from),
                endpoint: optional("ECR_ENDPOINT"),
            },
            kubernetes: KubernetesConfig {
                cluster_name: optional("K8S_CLUSTER_NAME"),
                kubeconfig: optional("K8S_KUBECONFIG").map(SecretString::from),
                namespace: optional("K8S_NAMESPACE").unwrap_or_else(default_namespace),
            },
            target: TargetConfig {
                repository: required("ECR_REPOSITORY")?,
                channel_tag: optional("IMAGE_TAG").unwrap_or_else(default_channel_tag),
                resource_kind: optional("RESOURCE_TYPE")
                    .map(|kind| WorkloadKind::from_str(&kind))
                    .transpose()?
                    .unwrap_or_else(default_resource_kind),
                resource_name: required("RESOURCE_NAME")?,
            },
            interval_ms: parse_optional::<u64>(optional("INTERVAL"), "INTERVAL")?
                .unwrap_or(DEFAULT_INTERVAL_MS),
            webserver: Webserver {
                port: parse_optional::<u16>(optional("WEBSERVER_PORT"), "WEBSERVER_PORT")?
                    .unwrap_or(DEFAULT_WEBSERVER_PORT),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("AWS_REGION", self.aws.region.as_str()),
            ("AWS_ACCESS_KEY_ID", self.aws.access_key_id.as_str()),
            ("K8S_NAMESPACE", self.kubernetes.namespace.as_str()),
            ("ECR_REPOSITORY", self.target.repository.as_str()),
            ("IMAGE_TAG", self.target.channel_tag.as_str()),
            ("RESOURCE_NAME", self.target.resource_name.as_str()),
        ];
        if let Some(&(key, _)) = non_empty.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Empty { key });
        }
        if self.aws.secret_access_key.is_blank() {
            return Err(ConfigError::Empty {
                key: "AWS_SECRET_ACCESS_KEY",
            });
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "INTERVAL",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef {
            kind: self.target.resource_kind,
            namespace: self.kubernetes.namespace.clone(),
            name: self.target.resource_name.clone(),
        }
    }
}

fn parse_optional<T: FromStr>(
    value: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key,
                value: v.clone(),
            })
        })
        .transpose()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str, |key| env::var(key).ok())?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;
    config.validate()?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with the values returned by `lookup`.
/// Returns an error naming the first variable `lookup` has no value for.
fn expand_env_vars<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing: Option<String> = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        lookup(var_name).unwrap_or_else(|| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    if let Some(var_name) = missing {
        return Err(ConfigError::MissingEnvVar(var_name).into());
    }
    Ok(result.into_owned())
}
