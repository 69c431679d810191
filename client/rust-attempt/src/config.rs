use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub dir: PathBuf,
    pub redis_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerSettings {
    pub tick_interval_ms: u64,
    pub autosave_every_ticks: u32,
}

impl TimerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            autosave_every_ticks: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    pub request_timeout_secs: u64,
    pub fetch_retry_attempts: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            fetch_retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub storage: StorageSettings,
    pub timer: TimerSettings,
    pub http: HttpSettings,
    pub log_format: LogFormat,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml first, APP__* environment variables on top
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let api_base_url = settings
            .get_string("api.base_url")
            .or_else(|_| env::var("API_BASE_URL"))
            .unwrap_or_else(|_| "http://localhost:5000".to_string())
            .trim_end_matches('/')
            .to_string();

        let auth_token = settings
            .get_string("auth.token")
            .or_else(|_| env::var("AUTH_TOKEN"))
            .ok()
            .filter(|token| !token.trim().is_empty());

        let backend = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("ATTEMPT_STORAGE"))
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "file" => StorageBackend::File,
            "redis" => StorageBackend::Redis,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown storage backend '{}', expected memory, file or redis",
                    other
                )))
            }
        };

        let dir = settings
            .get_string("storage.dir")
            .or_else(|_| env::var("ATTEMPT_STORAGE_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".quiz-attempts"));

        let redis_uri = settings
            .get_string("storage.redis_uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok();

        if backend == StorageBackend::Redis && redis_uri.is_none() {
            return Err(config::ConfigError::Message(
                "storage backend 'redis' requires storage.redis_uri or REDIS_URI".to_string(),
            ));
        }

        let timer_defaults = TimerSettings::default();
        let tick_interval_ms = settings
            .get_int("timer.tick_interval_ms")
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(timer_defaults.tick_interval_ms);
        let autosave_every_ticks = settings
            .get_int("timer.autosave_every_ticks")
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .unwrap_or(timer_defaults.autosave_every_ticks);

        let http_defaults = HttpSettings::default();
        let request_timeout_secs = settings
            .get_int("http.request_timeout_secs")
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(http_defaults.request_timeout_secs);
        let fetch_retry_attempts = settings
            .get_int("http.fetch_retry_attempts")
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(http_defaults.fetch_retry_attempts);

        let log_format = match settings.get_string("log_format").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            api_base_url,
            auth_token,
            storage: StorageSettings {
                backend,
                dir,
                redis_uri,
            },
            timer: TimerSettings {
                tick_interval_ms,
                autosave_every_ticks,
            },
            http: HttpSettings {
                request_timeout_secs,
                fetch_retry_attempts,
            },
            log_format,
        })
    }
}
