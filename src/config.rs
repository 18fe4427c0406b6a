use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::storage::AssetUrlMode;
use crate::types::ProviderId;

pub const DEFAULT_MODELSLABS_BASE_URL: &str = "https://modelslab.com";
pub const DEFAULT_XAI_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_HIGGSFIELD_BASE_URL: &str = "https://platform.higgsfield.ai";
pub const DEFAULT_REFERENCE_IMAGE_PARAM: &str = "reference_image_urls";
pub const DEFAULT_EDIT_FALLBACK_MODEL: &str = "nano-banana-pro";
pub const DEFAULT_VIDEO_FALLBACK_MODEL: &str = "grok-imagine-video";

#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub modelslabs: Option<String>,
    pub xai: Option<String>,
    pub higgsfield: Option<String>,
}

impl ProviderCredentials {
    pub fn get(&self, provider: ProviderId) -> Option<&str> {
        let value = match provider {
            ProviderId::ModelsLabs => self.modelslabs.as_deref(),
            ProviderId::Xai => self.xai.as_deref(),
            ProviderId::Higgsfield => self.higgsfield.as_deref(),
        };
        value.map(str::trim).filter(|value| !value.is_empty())
    }

    /// Environment variable holding the credential for `provider`.
    pub fn setting(provider: ProviderId) -> &'static str {
        match provider {
            ProviderId::ModelsLabs => "MODELS_LABS_API_KEY",
            ProviderId::Xai => "XAI_API_KEY",
            ProviderId::Higgsfield => "HIGGSFIELD_API_KEY",
        }
    }

    fn from_env() -> Self {
        let higgsfield = env_value("HIGGSFIELD_API_KEY").or_else(|| {
            match (env_value("HIGGSFIELD_API_KEY_ID"), env_value("HIGGSFIELD_API_KEY_SECRET")) {
                (Some(id), Some(secret)) => Some(format!("{id}:{secret}")),
                _ => None,
            }
        });
        Self {
            modelslabs: env_value("MODELS_LABS_API_KEY"),
            xai: env_value("XAI_API_KEY"),
            higgsfield,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub modelslabs: String,
    pub xai: String,
    pub higgsfield: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            modelslabs: DEFAULT_MODELSLABS_BASE_URL.to_string(),
            xai: DEFAULT_XAI_BASE_URL.to_string(),
            higgsfield: DEFAULT_HIGGSFIELD_BASE_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    pub fn base_url(&self, provider: ProviderId) -> &str {
        let url = match provider {
            ProviderId::ModelsLabs => &self.modelslabs,
            ProviderId::Xai => &self.xai,
            ProviderId::Higgsfield => &self.higgsfield,
        };
        url.trim_end_matches('/')
    }
}

/// Everything the router needs to turn a model choice into a callable config.
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    pub credentials: ProviderCredentials,
    pub endpoints: ProviderEndpoints,
    pub higgsfield_application: Option<String>,
    pub higgsfield_reference_param: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub edit_model: String,
    pub video_model: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            edit_model: DEFAULT_EDIT_FALLBACK_MODEL.to_string(),
            video_model: DEFAULT_VIDEO_FALLBACK_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub secret_key: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_base_url: String,
    /// Generation records and the job queue; never served over HTTP.
    pub data_dir: PathBuf,
    pub router: RouterSettings,
    pub fallbacks: FallbackSettings,
    pub asset_urls: AssetUrlMode,
    pub signing_secret: String,
    pub worker_secret: Option<String>,
    pub worker_interval: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env_value("MCP_PORT") {
            Some(value) => value.parse::<u16>().map_err(|err| ConfigError::Invalid {
                setting: "MCP_PORT",
                message: err.to_string(),
            })?,
            None => 3000,
        };
        let bind_address = format!("0.0.0.0:{port}");

        let asset_urls = match env_value("PROVIDER_ASSET_URLS") {
            Some(value) => value.parse::<AssetUrlMode>().map_err(|message| ConfigError::Invalid {
                setting: "PROVIDER_ASSET_URLS",
                message,
            })?,
            None => AssetUrlMode::Public,
        };
        let secret_key = env_value("SECRET_KEY");
        let signing_secret = match (env_value("SIGNING_SECRET"), secret_key.clone()) {
            (Some(secret), _) | (None, Some(secret)) => secret,
            (None, None) if asset_urls == AssetUrlMode::Signed => {
                return Err(ConfigError::Missing {
                    setting: "SIGNING_SECRET",
                });
            }
            (None, None) => String::new(),
        };
        let worker_interval = match env_value("WORKER_INTERVAL_SECS") {
            Some(value) => {
                let secs = value.parse::<u64>().map_err(|err| ConfigError::Invalid {
                    setting: "WORKER_INTERVAL_SECS",
                    message: err.to_string(),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(Duration::from_secs(10)),
        };

        let endpoints = ProviderEndpoints {
            modelslabs: env_value("MODELSLABS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MODELSLABS_BASE_URL.to_string()),
            xai: env_value("XAI_BASE_URL").unwrap_or_else(|| DEFAULT_XAI_BASE_URL.to_string()),
            higgsfield: env_value("HIGGSFIELD_BASE_URL")
                .unwrap_or_else(|| DEFAULT_HIGGSFIELD_BASE_URL.to_string()),
        };

        let cache_dir = resolve_cache_dir();
        let data_dir = resolve_data_dir();
        check_data_dir(&cache_dir, &data_dir)?;

        Ok(Self {
            port,
            secret_key,
            cache_dir,
            data_dir,
            cache_base_url: resolve_cache_base_url(&bind_address),
            router: RouterSettings {
                credentials: ProviderCredentials::from_env(),
                endpoints,
                higgsfield_application: env_value("HIGGSFIELD_VIDEO_APP"),
                higgsfield_reference_param: env_value("HIGGSFIELD_REFERENCE_IMAGE_PARAM"),
            },
            fallbacks: FallbackSettings {
                edit_model: env_value("EDIT_FALLBACK_MODEL")
                    .unwrap_or_else(|| DEFAULT_EDIT_FALLBACK_MODEL.to_string()),
                video_model: env_value("VIDEO_FALLBACK_MODEL")
                    .unwrap_or_else(|| DEFAULT_VIDEO_FALLBACK_MODEL.to_string()),
            },
            asset_urls,
            signing_secret,
            worker_secret: env_value("WORKER_SECRET"),
            worker_interval,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Route prefix, hidden behind the secret key when one is set.
    pub fn scoped_path(&self, path: &str) -> String {
        match self.secret_key.as_deref() {
            Some(value) => format!("/{value}{path}"),
            None => path.to_string(),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_cache_dir() -> PathBuf {
    if let Some(dir) = env_value("CACHE_DIR") {
        return PathBuf::from(dir);
    }
    let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("genstudio");
    base
}

fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = env_value("DATA_DIR") {
        return PathBuf::from(dir);
    }
    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("./data"));
    base.push("genstudio");
    base
}

fn check_data_dir(cache_dir: &Path, data_dir: &Path) -> Result<(), ConfigError> {
    if data_dir.starts_with(cache_dir) {
        return Err(ConfigError::Invalid {
            setting: "DATA_DIR",
            message: format!(
                "{} is inside the served cache directory {}",
                data_dir.display(),
                cache_dir.display()
            ),
        });
    }
    Ok(())
}

fn resolve_cache_base_url(bind_address: &str) -> String {
    if let Some(cache_url) = env_value("CACHE_URL") {
        return format!("{}/cache", cache_url.trim_end_matches('/'));
    }
    let raw_domain = env_value("DOMAIN").unwrap_or_else(|| bind_address.to_string());
    format!("{}/cache", normalize_base_url(&raw_domain))
}

/// Ensures exactly one scheme prefix, collapsing doubled ones like `http://https://`.
pub fn normalize_base_url(raw: &str) -> String {
    let mut rest = raw.trim().trim_end_matches('/');
    let mut scheme = "http://";
    loop {
        if let Some(stripped) = rest.strip_prefix("https://") {
            scheme = "https://";
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            scheme = "http://";
            rest = stripped;
        } else {
            break;
        }
    }
    format!("{scheme}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_collapses_doubled_schemes() {
        assert_eq!(normalize_base_url("http://https://example.com/"), "https://example.com");
        assert_eq!(normalize_base_url("https://http://example.com"), "http://example.com");
        assert_eq!(normalize_base_url("example.com:3000"), "http://example.com:3000");
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let credentials = ProviderCredentials {
            xai: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(credentials.get(ProviderId::Xai), None);
        assert_eq!(ProviderCredentials::setting(ProviderId::Xai), "XAI_API_KEY");
    }

    #[test]
    fn data_dir_must_not_sit_inside_cache_dir() {
        let cache = Path::new("/srv/genstudio/cache");
        assert!(check_data_dir(cache, Path::new("/srv/genstudio/cache/records")).is_err());
        assert!(check_data_dir(cache, cache).is_err());
        assert!(check_data_dir(cache, Path::new("/srv/genstudio/data")).is_ok());
    }

    #[test]
    fn endpoints_strip_trailing_slash() {
        let endpoints = ProviderEndpoints {
            xai: "http://localhost:9000/".into(),
            ..Default::default()
        };
        assert_eq!(endpoints.base_url(ProviderId::Xai), "http://localhost:9000");
    }
}
