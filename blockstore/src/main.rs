// Forbid unwrap() in production code to prevent panics from corrupt images.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::io::{BufRead, Write};

use blockstore::config::StoreConfig;
use blockstore::shell::Shell;
use blockstore::storage::ImageDirectory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Logs go to stderr so command output on stdout stays clean.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, min_degree={}",
        config.data_directory.display(),
        config.min_degree
    );

    let mut shell = Shell::new(ImageDirectory::new(
        &config.data_directory,
        config.min_degree,
    ));

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to read input: {e}");
                std::process::exit(1);
            }
        };

        let reply = shell.handle_line(&line);
        for output in &reply.lines {
            if let Err(e) = writeln!(stdout, "{output}") {
                tracing::error!("Failed to write output: {e}");
                std::process::exit(1);
            }
        }
        if reply.quit {
            break;
        }
    }
}
