use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed for {url}: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("failed to parse feed from {url}: {message}")]
    Parse { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("missing credentials for {0}")]
    MissingCredentials(&'static str),
    #[error("token request failed: {0}")]
    Token(String),
    #[error("{service} API error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
