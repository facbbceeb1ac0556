use std::env;

use chorus_config::{Config, LogFormat};
use tracing::Level;

fn init_logging(cfg: &Config) {
    let level = cfg.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level);
    match cfg.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();

    let mut config_path = String::from("./config/example-config.yaml");
    let mut journal_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(v) = args.next() {
                    config_path = v;
                }
            }
            "--journal" => journal_path = args.next(),
            _ => {}
        }
    }

    match cmd.as_str() {
        "serve" => {}
        "verify-journal" => {
            let path = match journal_path {
                Some(path) => path,
                None => match chorus_config::load_and_validate(&config_path) {
                    Ok(cfg) => cfg.journal.jsonl_path,
                    Err(e) => {
                        eprintln!("failed to load config: {e}");
                        std::process::exit(1);
                    }
                },
            };
            match chorus_server::verify_journal_chain(&path) {
                Ok(count) => {
                    println!("journal chain verified: {count} records");
                    return;
                }
                Err(e) => {
                    eprintln!("journal chain broken: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("Usage: chorus serve --config <path>");
            eprintln!("       chorus verify-journal [--config <path> | --journal <path>]");
            std::process::exit(2);
        }
    }

    let cfg = match chorus_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cfg);

    if let Err(e) = chorus_server::serve(cfg).await {
        tracing::error!(event_name = "server.exited", error = %e, "server exited with error");
        std::process::exit(1);
    }
}
