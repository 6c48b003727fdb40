use crate::error::{AppError, Result};

/// Process configuration, loaded once at startup from the environment.
/// Missing required values abort startup (`Fatal`), matching the original
/// service's `config.Load()` behavior.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub kafka_brokers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub grpc_port: u16,
    pub http_port: u16,
    pub consumer_workers: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("kafka_brokers", &self.kafka_brokers)
            .field("kafka_topic", &self.kafka_topic)
            .field("kafka_group_id", &self.kafka_group_id)
            .field("grpc_port", &self.grpc_port)
            .field("http_port", &self.http_port)
            .field("consumer_workers", &self.consumer_workers)
            .finish()
    }
}

fn required(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .unwrap_or_default()
        .trim()
        .to_string();
    if value.is_empty() {
        return Err(AppError::Fatal(format!("{name} is required")));
    }
    Ok(value)
}

fn optional_u16(name: &str, default: u16) -> Result<u16> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| AppError::Fatal(format!("invalid {name}"))),
        _ => Ok(default),
    }
}

fn optional_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            let parsed: usize = v
                .trim()
                .parse()
                .map_err(|_| AppError::Fatal(format!("invalid {name}")))?;
            if parsed == 0 {
                return Err(AppError::Fatal(format!("{name} must be > 0")));
            }
            Ok(parsed)
        }
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let kafka_brokers = required("KAFKA_BROKERS")?;
        let kafka_topic = required("KAFKA_TOPIC")?;
        let kafka_group_id = required("KAFKA_GROUP_ID")?;
        let grpc_port = optional_u16("GRPC_PORT", 50051)?;
        let http_port = optional_u16("HTTP_PORT", 8000)?;
        let consumer_workers = optional_usize("CONSUMER_WORKERS", 4)?;

        Ok(Config {
            database_url,
            kafka_brokers,
            kafka_topic,
            kafka_group_id,
            grpc_port,
            http_port,
            consumer_workers,
        })
    }

    pub fn log_config(&self) {
        tracing::info!(?self, "loaded configuration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "KAFKA_BROKERS",
            "KAFKA_TOPIC",
            "KAFKA_GROUP_ID",
            "GRPC_PORT",
            "HTTP_PORT",
            "CONSUMER_WORKERS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_database_url_is_fatal() {
        clear_env();
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::set_var("KAFKA_TOPIC", "webhook.events");
        std::env::set_var("KAFKA_GROUP_ID", "webhook-consumers");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, AppError::Fatal(_)));
        clear_env();
    }

    #[test]
    #[serial]
    fn defaults_applied_when_optional_vars_absent() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/webhookify");
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::set_var("KAFKA_TOPIC", "webhook.events");
        std::env::set_var("KAFKA_GROUP_ID", "webhook-consumers");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.grpc_port, 50051);
        assert_eq!(cfg.http_port, 8000);
        assert_eq!(cfg.consumer_workers, 4);
        clear_env();
    }

    #[test]
    #[serial]
    fn zero_consumer_workers_rejected() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/webhookify");
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::set_var("KAFKA_TOPIC", "webhook.events");
        std::env::set_var("KAFKA_GROUP_ID", "webhook-consumers");
        std::env::set_var("CONSUMER_WORKERS", "0");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, AppError::Fatal(_)));
        clear_env();
    }
}
