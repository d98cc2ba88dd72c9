//! Binary entry point: parses CLI arguments, wires structured logging, and
//! mounts the filesystem via `fuser`.
//!
//! Logging setup follows `examples/forrestthewoods-anubis/src/logging.rs`:
//! a layered `tracing_subscriber::fmt` subscriber driven by `RUST_LOG`.

use clap::Parser;
#[cfg(feature = "unrar-backend")]
use fuser::MountOption;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use rarvfs::cli::Cli;
use rarvfs::config::ConfigStore;
#[cfg(feature = "unrar-backend")]
use rarvfs::coordinator::RarFs;
use rarvfs::filecache::Caches;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

fn main() -> std::process::ExitCode {
    init_logging();

    let args = Cli::parse().resolve();
    let config = ConfigStore::load_default(&args.source, args.config_path.as_deref());
    let caches = Caches::new(config);

    #[cfg(not(feature = "unrar-backend"))]
    {
        let _ = caches;
        tracing::error!("rarvfs built without the unrar-backend feature; no decoder available");
        return std::process::ExitCode::FAILURE;
    }

    #[cfg(feature = "unrar-backend")]
    {
        let decoder = rarvfs::decoder::unrar_backend::UnrarDecoder;
        let fs = RarFs::new(args.source.clone(), caches, decoder, args.recursion_depth, args.max_unpack_size);

        let mut options = vec![MountOption::RO, MountOption::FSName("rarvfs".to_owned())];
        if !args.foreground {
            options.push(MountOption::AllowOther);
        }

        tracing::info!(source = %args.source.display(), mountpoint = %args.mountpoint.display(), "mounting");
        match fuser::mount2(fs, &args.mountpoint, &options) {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(%err, "mount failed");
                std::process::ExitCode::FAILURE
            }
        }
    }
}
