//! Command line entry point of the `remotesrv` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Overrides};
use crate::{bootstrap, lifecycle, observability};

/// Remote chunk store server.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// run a read-only server which does not allow writes
    #[argh(switch)]
    read_only: bool,

    /// act as a remote for an existing repository in the working directory, instead of serving
    /// repositories below it
    #[argh(switch)]
    repo_mode: bool,

    /// root directory that this command will run in; default cwd
    #[argh(option)]
    dir: Option<String>,

    /// the address the RPC server will listen on; default localhost:50051
    #[argh(option)]
    grpc_addr: Option<String>,

    /// the address the HTTP server will listen on; default localhost:80; if equal to grpc-addr,
    /// both services are served over the same port
    #[argh(option)]
    http_addr: Option<String>,

    /// hostname to use in the host component of the URLs that the server generates; if empty,
    /// the server echoes the authority of the request
    #[argh(option)]
    http_host: Option<String>,

    /// print the server version and exit
    #[argh(switch)]
    version: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            read_only: self.read_only,
            repo_mode: self.repo_mode,
            dir: self.dir.clone(),
            grpc_addr: self.grpc_addr.clone(),
            http_addr: self.http_addr.clone(),
            http_host: self.http_host.clone(),
        }
    }
}

/// Bootstrap the runtime and run the server until a termination signal arrives.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if args.version {
        println!("remotesrv {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref(), &args.overrides())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let result = change_dir(&config).and_then(|working_dir| {
        runtime.block_on(async move {
            let shutdown = CancellationToken::new();
            lifecycle::cancel_on_signal(shutdown.clone());
            bootstrap::run(&config, &working_dir, shutdown).await
        })
    });

    if let Err(ref error) = result {
        tracing::error!("fatal error: {error:#}");
    }

    result
}

/// Switches into the configured directory and returns the resulting working directory.
fn change_dir(config: &Config) -> Result<PathBuf> {
    match &config.dir {
        Some(dir) => {
            std::env::set_current_dir(dir)
                .with_context(|| format!("failed to chdir to {}", dir.display()))?;
            tracing::info!("cwd set to {}", dir.display());
        }
        None => tracing::info!("'dir' parameter not provided, using the current working dir"),
    }

    std::env::current_dir().context("could not get cwd path")
}
