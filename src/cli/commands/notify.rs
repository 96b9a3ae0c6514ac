use clap::{Arg, Command};

pub const ARG_NOTIFY_WEBHOOK_URL: &str = "notify-webhook-url";

pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_NOTIFY_WEBHOOK_URL)
            .long(ARG_NOTIFY_WEBHOOK_URL)
            .help("Webhook receiving IP change warnings (logged when unset)")
            .env("TESSERA_NOTIFY_WEBHOOK_URL")
            .value_parser(clap::value_parser!(url::Url)),
    )
}
