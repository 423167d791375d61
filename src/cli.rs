//! Command line interface for the `event-collector` binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `event-collector` binary.
#[derive(Debug, Parser)]
#[command(
    name = "event-collector",
    version,
    about = "Collect framed structured events and route them to message-bus topics"
)]
pub struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Listen address, overriding `server.listen`.
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Most verbose log level to emit.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}
