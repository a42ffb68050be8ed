use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Keyboard/mouse sharing daemon: owns the physical input devices and
/// forwards them to whichever client's screen the cursor currently sits on.
///
/// This is a thin wiring layer over the `switchlink-*` library crates, not
/// the deliverable itself — a `--topology` file format and a real platform
/// `Screen` backend are both out of scope; see the crate docs.
#[derive(Parser, Debug)]
#[command(name = "switchlinkd", version)]
pub struct Cli {
    /// Address to accept client connections on.
    #[arg(long, default_value = "0.0.0.0:24800")]
    pub listen: SocketAddr,

    /// Path to a topology description file. Parsing one is out of scope;
    /// passing this only logs a warning that the server is running with the
    /// built-in single-neighbour placeholder topology.
    #[arg(long)]
    pub topology: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity (-q for warn, -qq for error).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Name this server reports to clients as its screen name.
    #[arg(long, default_value = "server")]
    pub screen_name: String,

    /// Width of the server's own screen, in pixels. Feeds the switcher's
    /// edge-crossing math; there is no real cursor-tracking backend behind
    /// it (see crate docs), so this only matters once something calls
    /// [`switchlink_server::ServerHandle::report_primary_motion`].
    #[arg(long, default_value_t = 1920)]
    pub width: i32,

    /// Height of the server's own screen, in pixels.
    #[arg(long, default_value_t = 1080)]
    pub height: i32,

    /// Edge strip width, in pixels, that triggers a switch.
    #[arg(long, default_value_t = 1)]
    pub jump_zone: i32,

    /// Heartbeat/keepalive period, in seconds.
    #[arg(long, default_value_t = 3)]
    pub heartbeat_rate_secs: u64,

    /// Missed heartbeats before a silent peer is declared dead.
    #[arg(long, default_value_t = 3)]
    pub keepalives_until_death: u32,

    /// Handshake deadline, in seconds.
    #[arg(long, default_value_t = 30)]
    pub handshake_timeout_secs: u64,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        let base = 2i8 + i8::try_from(self.verbose).unwrap_or(i8::MAX);
        let base = base - i8::try_from(self.quiet).unwrap_or(i8::MAX);
        match base {
            i8::MIN..=0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
