use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_max_connections: u32,
    pub max_body_bytes: usize,
    pub concurrency_limit: usize,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parsed_or("APP_PORT", 3000);
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| split_origins(&raw))
            .unwrap_or_default();

        Ok(Self {
            database_url,
            host,
            port,
            jwt_secret,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 10),
            max_body_bytes: parsed_or("MAX_BODY_BYTES", 1024 * 1024),
            concurrency_limit: parsed_or("CONCURRENCY_LIMIT", 100),
            cors_allowed_origins,
        })
    }
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
