#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[macro_use]
extern crate slog_scope;

mod db;
mod error;
mod routes;
mod server;
mod settings;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use autonotify_common::logging;
use autonotify_webpush::ServerIdentity;

const USAGE: &str = "
Usage: autonotify [options]

Options:
    -h, --help              Show this message
    --config=CONFIGFILE     Autonotify configuration file path.
    --gen-vapid-keys        Print a new VAPID keypair and exit.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
    flag_gen_vapid_keys: bool,
}

#[actix_rt::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_gen_vapid_keys {
        let identity = ServerIdentity::generate()?;
        let prefix = settings::ENV_PREFIX.to_uppercase();
        println!("{prefix}__VAPID_PUBLIC_KEY={}", identity.public_key_base64url());
        println!(
            "{prefix}__VAPID_PRIVATE_KEY={}",
            identity.private_key_base64url()?
        );
        return Ok(());
    }

    let filenames: Vec<String> = args.flag_config.into_iter().collect();
    let settings = settings::Settings::with_env_and_config_files(&filenames)?;
    logging::init_logging(
        !settings.human_logs,
        logging::get_default_hostname(settings::ENV_PREFIX),
    )?;
    debug!("Starting up...");

    // Sentry requires the environment variable "SENTRY_DSN".
    let _sentry_guard = sentry::init(sentry::ClientOptions {
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: true,
        ..autonotify_common::sentry::client_options()
    });

    // Run server...
    let server = server::Server::with_settings(settings).map_err(|e| {
        error!("Could not start server: {}", e);
        e
    })?;
    info!("Server started");
    server.await?;

    // Shutdown
    info!("Server closing");
    logging::reset_logging();
    Ok(())
}
