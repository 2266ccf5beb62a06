/// Runtime configuration sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_key: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn load() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();

        Self {
            port,
            api_key,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}
