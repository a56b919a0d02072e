use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use git_relay::http_handler::{self, HttpState};
use git_relay::ssh_handler::ServerSSH;
use git_relay::{logging, AccessPolicy, Config, RootedAccess};

/// Serve git repositories over smart HTTP and SSH
#[derive(Parser, Debug)]
#[command(name = "git-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "git-relay.yaml")]
    config: PathBuf,

    /// Directory holding the served repositories
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load_yaml(&args.config)?;
    if let Some(repo_root) = args.repo_root {
        config.repo_root = repo_root;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.log.json |= args.json_logs;
    config.validate()?;

    logging::init_logging(&config.log.level, config.log.json);

    let relay = Arc::new(config.relay());
    let repos = RootedAccess::new(&config.repo_root);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        repo_root = %config.repo_root.display(),
        backend = %relay.program().display(),
        "starting git relay"
    );

    let http = async {
        if !config.http.enabled {
            return Ok(());
        }
        let state = HttpState::new(relay.clone(), repos.clone(), config.body_timeout());
        http_handler::serve(state, config.http.listen)
            .await
            .context("smart HTTP transport failed")
    };

    let ssh = async {
        if !config.ssh.enabled {
            return Ok(());
        }
        let access: Arc<dyn AccessPolicy> = Arc::new(repos.clone());
        ServerSSH::new(relay.clone(), access)
            .serve(&config.ssh)
            .await
            .context("SSH transport failed")
    };

    if !config.http.enabled && !config.ssh.enabled {
        anyhow::bail!("no transport enabled");
    }

    tokio::try_join!(http, ssh)?;
    Ok(())
}
