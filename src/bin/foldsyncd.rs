use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use foldsync::cli::{init_tracing, DaemonOpts};
use foldsync::logger::{Logger, Tee, TextLogger, TracingLogger};
use foldsync::Server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_tracing(opts.verbose);
    let config = opts.server_config()?;

    if config.root.exists() && !config.root.is_dir() {
        anyhow::bail!("Root path is not a directory: {}", config.root.display());
    }

    let logger: Arc<dyn Logger> = match &config.log_file {
        Some(path) => {
            let text = TextLogger::new(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Arc::new(Tee(vec![Box::new(TracingLogger), Box::new(text)]))
        }
        None => Arc::new(TracingLogger),
    };

    if config.bind.starts_with("0.0.0.0") {
        warn!(
            bind = %config.bind,
            "listening on all interfaces; the protocol has no authentication or encryption, use on trusted networks only"
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let server = Server::bind(&config, logger)
            .await
            .context("Failed to start server")?;
        info!(
            root = %server.root().display(),
            addr = %server.local_addr()?,
            "starting foldsync daemon"
        );

        let handle = server.handle();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, stopping (Ctrl-C)...");
            handle.stop();
        })
        .context("Error setting Ctrl-C handler")?;

        server.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
