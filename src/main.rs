mod config;
mod files;
mod ledger;
mod lock;
mod logging;
mod notifier;
mod orchestrator;
mod pool;
mod router;
mod scanners;
mod throttle;
mod tracker;
mod types;

use anyhow::Result;
use clap::Parser;

use config::Cli;
use notifier::Notifier;
use scanners::DefenderAdapter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match config::resolve(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _logging_handle = logging::init(config.log_path.as_deref(), &config.log_level);

    let defender_adapter = DefenderAdapter::new(DefenderAdapter::REAL_COMMAND);

    let notifier = Notifier {
        recipient_email: config.recipient_email.clone(),
        recipient_email_error: config.recipient_email_error.clone(),
        recipient_email_summary: config.recipient_email_summary.clone(),
        recipient_email_hazard: config.recipient_email_hazard.clone(),
        smtp_server: config.smtp_server.clone(),
        smtp_port: config.smtp_port,
        smtp_username: config.smtp_username.clone(),
        smtp_password: config.smtp_password.clone(),
        smtp_use_tls: config.smtp_use_tls,
        using_simulator: defender_adapter.is_using_simulator(),
    };

    match orchestrator::run(&config, &notifier, &defender_adapter) {
        Ok(summary) => {
            tracing::info!(
                "run complete: {} succeeded, {} suspect, {} failed, stopped_early={}",
                summary.files_succeeded,
                summary.files_suspect,
                summary.files_failed,
                summary.stopped_early
            );
            if summary.files_failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("run failed: {}", e);
            notifier.notify_error("shuttle run failed to start or complete", "see logs for details", Some(&e.to_string()));
            std::process::exit(1);
        }
    }
}
