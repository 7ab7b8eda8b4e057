use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct QuizSettings {
    /// Canonical minimum; smaller quizzes cannot be played.
    pub min_questions: usize,
    /// Below this a quiz is playable but flagged.
    pub recommended_questions: usize,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            min_questions: 10,
            recommended_questions: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Idempotency cache; disabled when unset.
    pub redis_uri: Option<String>,
    pub bind_addr: String,
    pub quizzes: QuizSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let store_backend = settings
            .get_string("store.backend")
            .or_else(|_| env::var("STORE_BACKEND"))
            .unwrap_or_else(|_| "mongo".to_string())
            .parse::<StoreBackend>()
            .map_err(config::ConfigError::Message)?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "lingua".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let defaults = QuizSettings::default();
        let min_questions = settings
            .get_int("quizzes.min_questions")
            .map(|v| v.max(1) as usize)
            .unwrap_or(defaults.min_questions);
        let recommended_questions = settings
            .get_int("quizzes.recommended_questions")
            .map(|v| v.max(0) as usize)
            .unwrap_or(defaults.recommended_questions)
            .max(min_questions);

        if store_backend == StoreBackend::Memory && env == "prod" {
            tracing::warn!("In-memory store selected in production; progress will not survive restarts");
        }

        Ok(Config {
            store_backend,
            mongo_uri,
            mongo_database,
            redis_uri,
            bind_addr,
            quizzes: QuizSettings {
                min_questions,
                recommended_questions,
            },
        })
    }

    /// In-memory store, no Redis: what tests and quick local runs use.
    pub fn in_memory() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            mongo_uri: String::new(),
            mongo_database: "lingua".to_string(),
            redis_uri: None,
            bind_addr: "127.0.0.1:0".to_string(),
            quizzes: QuizSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 6] = [
        "APP__STORE__BACKEND",
        "APP__QUIZZES__MIN_QUESTIONS",
        "APP__QUIZZES__RECOMMENDED_QUESTIONS",
        "APP__REDIS__URI",
        "REDIS_URI",
        "STORE_BACKEND",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("SKIP_ROOT_ENV", "1");
    }

    #[test]
    #[serial]
    fn defaults_when_nothing_is_set() {
        clear();
        let config = Config::load().unwrap();

        assert_eq!(config.store_backend, StoreBackend::Mongo);
        assert_eq!(config.quizzes, QuizSettings::default());
        assert!(config.redis_uri.is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        clear();
        env::set_var("APP__STORE__BACKEND", "memory");
        env::set_var("APP__QUIZZES__MIN_QUESTIONS", "15");
        env::set_var("APP__QUIZZES__RECOMMENDED_QUESTIONS", "12");

        let config = Config::load().unwrap();
        clear();

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.quizzes.min_questions, 15);
        // Recommended never drops below the minimum.
        assert_eq!(config.quizzes.recommended_questions, 15);
    }

    #[test]
    #[serial]
    fn unknown_backend_is_an_error() {
        clear();
        env::set_var("STORE_BACKEND", "postgres");
        let result = Config::load();
        clear();

        assert!(result.is_err());
    }

    #[test]
    fn backend_names() {
        assert_eq!("MongoDB".parse::<StoreBackend>(), Ok(StoreBackend::Mongo));
        assert_eq!("in-memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
    }
}
