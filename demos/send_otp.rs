//! Dispatch one OTP through the configured gateways.
//!
//! Templates and vendor credentials come from `config/default.toml`,
//! `config/local.toml` or `SMSDISPATCH__*` environment variables.
use smsdispatch::logging;
use smsdispatch::prelude::*;

use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    let template_id = arg_or_env("--template", "SMS_TEMPLATE_ID");
    let to = arg_or_env("--to", "SMS_TO");
    let text = arg_or_env("--text", "SMS_TEXT");

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::from_config(
        &config,
        store.clone(),
        Arc::new(BroadcastStream::default()),
    )?;

    let request = Request::new("send-otp-demo", template_id, Priority::Otp, text, vec![to]);
    match dispatcher.dispatch(request).await? {
        Dispatch::Sent(delivery) => {
            println!(
                "Sent via {} as {} ({:?}, code {})\nRaw: {}",
                delivery.gateway,
                delivery.communication_id,
                delivery.outcome.classification,
                delivery.outcome.response_code,
                delivery.outcome.complete_response
            );
            if let Some(row) = store.get(&delivery.communication_id).await? {
                println!("Stored status: {:?}", row.request.status);
            }
        }
        Dispatch::Queued { envelope_id } => println!("Queued as {}", envelope_id),
    }
    Ok(())
}

fn arg_or_env(flag: &str, env_key: &str) -> String {
    let args: Vec<String> = std::env::args().collect();
    if let Some(idx) = args.iter().position(|a| a == flag) {
        if idx + 1 < args.len() {
            return args[idx + 1].clone();
        }
    }
    env::var(env_key)
        .unwrap_or_else(|_| panic!("missing {} (arg {} or env {})", flag, flag, env_key))
}
