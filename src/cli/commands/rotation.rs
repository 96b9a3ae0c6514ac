use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command, builder::NonEmptyStringValueParser};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_ACCESS_TTL: &str = "access-ttl";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout";
pub const ARG_HASH_PEPPER: &str = "hash-pepper";
pub const ARG_IP_HEADER: &str = "ip-header";

pub const MAX_ACCESS_TTL: i64 = 24 * 60 * 60; // 1 day
pub const MAX_REFRESH_TTL: i64 = 365 * 24 * 60 * 60; // 1 year

#[derive(Debug, Clone)]
pub struct Options {
    pub signing_key: SecretString,
    pub access_ttl: i64,
    pub refresh_ttl: i64,
    pub store_timeout: Duration,
    pub hash_pepper: Option<SecretString>,
    pub ip_header: String,
}

impl Options {
    /// Parse token and rotation arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing key is missing or blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let signing_key = match matches.get_one::<String>(ARG_SIGNING_KEY) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => bail!("missing required argument: --{ARG_SIGNING_KEY}"),
        };

        let access_ttl = matches
            .get_one::<i64>(ARG_ACCESS_TTL)
            .copied()
            .context("missing argument: --access-ttl")?;
        let refresh_ttl = matches
            .get_one::<i64>(ARG_REFRESH_TTL)
            .copied()
            .context("missing argument: --refresh-ttl")?;
        let store_timeout = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT)
            .copied()
            .map(Duration::from_secs)
            .context("missing argument: --store-timeout")?;

        let hash_pepper = matches
            .get_one::<String>(ARG_HASH_PEPPER)
            .filter(|value| !value.is_empty())
            .map(|value| SecretString::from(value.clone()));

        let ip_header = matches
            .get_one::<String>(ARG_IP_HEADER)
            .cloned()
            .unwrap_or_else(|| "X-Forwarded-For".to_string());

        Ok(Self {
            signing_key,
            access_ttl,
            refresh_ttl,
            store_timeout,
            hash_pepper,
            ip_header,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Shared secret used to sign access tokens (HMAC)")
                .env("TESSERA_SIGNING_KEY")
                .hide_env_values(true)
                .value_parser(NonEmptyStringValueParser::new())
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("TESSERA_ACCESS_TTL")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TTL)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token TTL in seconds")
                .env("TESSERA_REFRESH_TTL")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TTL)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long(ARG_STORE_TIMEOUT)
                .help("Deadline in seconds for each session store or notification call")
                .env("TESSERA_STORE_TIMEOUT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_HASH_PEPPER)
                .long(ARG_HASH_PEPPER)
                .help("Optional server-side pepper mixed into refresh token hashes")
                .long_help(
                    "Optional server-side pepper mixed into refresh token hashes.\n\nChanging it invalidates every outstanding refresh token.",
                )
                .env("TESSERA_HASH_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_IP_HEADER)
                .long(ARG_IP_HEADER)
                .help("Request header holding the client IP; falls back to the peer address")
                .env("TESSERA_IP_HEADER")
                .default_value("X-Forwarded-For"),
        )
}
