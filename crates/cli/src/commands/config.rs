use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use beerbot_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// Key path, env var consulted first, rendered value.
type Field = (&'static str, &'static [&'static str], String);

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys, value) in fields(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let ledger = &config.ledger;
    vec![
        field("database.url", &["BEERBOT_DATABASE_URL"], config.database.url.clone()),
        field(
            "database.max_connections",
            &["BEERBOT_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            &["BEERBOT_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        field(
            "database.connect_retry_secs",
            &["BEERBOT_DATABASE_CONNECT_RETRY_SECS"],
            config.database.connect_retry_secs.to_string(),
        ),
        field(
            "slack.bot_token",
            &["BEERBOT_SLACK_BOT_TOKEN"],
            redact_token(config.slack.bot_token.expose_secret()),
        ),
        field(
            "slack.signing_secret",
            &["BEERBOT_SLACK_SIGNING_SECRET"],
            redact_secret(config.slack.signing_secret.expose_secret()),
        ),
        field("slack.bot_user_id", &["BEERBOT_SLACK_BOT_USER_ID"], config.slack.bot_user_id.clone()),
        field(
            "slack.api_base_url",
            &["BEERBOT_SLACK_API_BASE_URL"],
            config.slack.api_base_url.clone(),
        ),
        field(
            "slack.display_name",
            &["BEERBOT_SLACK_DISPLAY_NAME"],
            config.slack.display_name.clone(),
        ),
        field("ledger.debt_emoji", &["BEERBOT_LEDGER_DEBT_EMOJI"], ledger.debt_emoji.clone()),
        field("ledger.unit_price", &["BEERBOT_LEDGER_UNIT_PRICE"], format!("{:.2}", ledger.unit_price)),
        field(
            "ledger.acknowledgement_emojis",
            &["BEERBOT_LEDGER_ACKNOWLEDGEMENT_EMOJIS"],
            ledger.acknowledgement_emojis.join(","),
        ),
        field(
            "ledger.checkmark_emoji",
            &["BEERBOT_LEDGER_CHECKMARK_EMOJI"],
            ledger.checkmark_emoji.clone(),
        ),
        field(
            "ledger.cooldown_window_minutes",
            &["BEERBOT_LEDGER_COOLDOWN_WINDOW_MINUTES"],
            ledger.cooldown_window_minutes.to_string(),
        ),
        field(
            "ledger.cooldown_cap",
            &["BEERBOT_LEDGER_COOLDOWN_CAP"],
            ledger.cooldown_cap.to_string(),
        ),
        field(
            "ledger.admin_user_ids",
            &["BEERBOT_LEDGER_ADMIN_USER_IDS"],
            if ledger.admin_user_ids.is_empty() {
                "<none>".to_string()
            } else {
                ledger.admin_user_ids.join(",")
            },
        ),
        field(
            "server.bind_address",
            &["BEERBOT_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        field("server.port", &["BEERBOT_SERVER_PORT"], config.server.port.to_string()),
        field(
            "server.graceful_shutdown_secs",
            &["BEERBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field(
            "logging.level",
            &["BEERBOT_LOGGING_LEVEL", "BEERBOT_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["BEERBOT_LOGGING_FORMAT", "BEERBOT_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn field(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    (key_path, env_keys, value)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("beerbot.toml"), PathBuf::from("config/beerbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() { "<empty>" } else { "<redacted>" }.to_string()
}
