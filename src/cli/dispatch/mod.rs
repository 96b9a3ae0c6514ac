use crate::cli::{
    actions::{Action, server::Args},
    commands::{notify::ARG_NOTIFY_WEBHOOK_URL, rotation},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let rotation = rotation::Options::parse(matches)?;
    let notify_webhook_url = matches.get_one::<url::Url>(ARG_NOTIFY_WEBHOOK_URL).cloned();

    Ok(Action::Server(Args {
        port,
        dsn,
        rotation,
        notify_webhook_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        temp_env::with_vars_unset(
            [
                "TESSERA_PORT",
                "TESSERA_REFRESH_TTL",
                "TESSERA_NOTIFY_WEBHOOK_URL",
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "tessera",
                    "--dsn",
                    "postgres://localhost/tessera",
                    "--signing-key",
                    "k",
                    "--notify-webhook-url",
                    "http://127.0.0.1:9000/warn",
                ]);

                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://localhost/tessera");
                assert_eq!(args.rotation.refresh_ttl, 604_800);
                assert_eq!(
                    args.notify_webhook_url.as_ref().map(url::Url::as_str),
                    Some("http://127.0.0.1:9000/warn")
                );
                Ok(())
            },
        )
    }
}
