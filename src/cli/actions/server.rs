use crate::{
    api,
    cli::{commands::rotation::Options, telemetry},
    rotation::{
        CredentialCodec, LogNotifier, Notifier, RotationConfig, SecretHasher, WebhookNotifier,
    },
};
use anyhow::{Context, Result};
use axum::http::HeaderName;
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub rotation: Options,
    pub notify_webhook_url: Option<Url>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is unusable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let ip_header = HeaderName::from_bytes(args.rotation.ip_header.as_bytes())
        .with_context(|| format!("invalid --ip-header value: {}", args.rotation.ip_header))?;

    let notifier: Arc<dyn Notifier> = match args.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, args.rotation.store_timeout)?),
        None => Arc::new(LogNotifier),
    };

    let settings = api::Settings {
        codec: CredentialCodec::new(args.rotation.signing_key, args.rotation.access_ttl),
        hasher: SecretHasher::new(argon2::Params::default(), args.rotation.hash_pepper),
        notifier,
        rotation: RotationConfig::new(args.rotation.refresh_ttl, args.rotation.store_timeout),
        ip_header,
    };

    let result = api::new(args.port, &args.dsn, settings).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("access_ttl", format!("{}s", args.rotation.access_ttl)),
        ("refresh_ttl", format!("{}s", args.rotation.refresh_ttl)),
        (
            "store_timeout",
            format!("{}s", args.rotation.store_timeout.as_secs()),
        ),
        (
            "hash_pepper_set",
            args.rotation.hash_pepper.is_some().to_string(),
        ),
        ("ip_header", args.rotation.ip_header.clone()),
        (
            "notifier",
            args.notify_webhook_url
                .as_ref()
                .map_or_else(|| "log".to_string(), |url| format!("webhook {url}")),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", tessera_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn tessera_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    TESSERA_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const TESSERA_BANNER: &str = r"
  +---+---+---+
  |   |   |   |
  +---+---+---+   T E S S E R A {VERSION}
  |   |   |   |
  +---+---+---+";
