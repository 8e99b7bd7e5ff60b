//! Rendezvous CLI - drive either side of a shared memory handshake
//!
//! Structure:
//!   - main.rs: argument parsing, logging setup, exit codes
//!   - commands.rs: one function per subcommand

mod commands;

use clap::{Parser, Subcommand};
use console::style;
use rendezvous_memory::{HandshakeConfig, PollConfig, RegionLayout, RendezvousError};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rendezvous")]
#[command(about = "Two-party shared memory handshake", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stride between payload A, payload B and the flag, in bytes
    #[arg(long, global = true, default_value = "4096")]
    stride: usize,

    /// Give up waiting after this many milliseconds (default: wait forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Sleep between polls in microseconds (default: spin)
    #[arg(long, global = true)]
    poll_us: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the rendezvous and run side 0
    Initiate {
        /// Shared memory namespace
        name: String,
    },

    /// Connect to a rendezvous and run side 1
    Respond {
        /// Shared memory namespace
        name: String,
    },

    /// Run both sides on threads over a private namespace
    Selftest {
        /// Number of handshake rounds
        #[arg(short, long, default_value = "1")]
        rounds: u32,
    },

    /// Print the current flag state
    Inspect {
        /// Shared memory namespace
        name: String,
    },

    /// Store EMPTY in the flag so a new round can start
    Reset {
        /// Shared memory namespace
        name: String,
    },
}

impl Cli {
    fn handshake_config(&self) -> Result<HandshakeConfig, RendezvousError> {
        let mut poll = PollConfig::spin();
        if let Some(ms) = self.timeout_ms {
            poll = poll.with_timeout(Duration::from_millis(ms));
        }
        if let Some(us) = self.poll_us {
            poll = poll.with_interval(Duration::from_micros(us));
        }

        Ok(HandshakeConfig {
            layout: RegionLayout::new(self.stride)?,
            poll,
        })
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = cli.handshake_config().and_then(|config| match &cli.command {
        Commands::Initiate { name } => commands::initiate(name, config),
        Commands::Respond { name } => commands::respond(name, config),
        Commands::Selftest { rounds } => commands::selftest(*rounds, config),
        Commands::Inspect { name } => commands::inspect(name, config),
        Commands::Reset { name } => commands::reset(name, config),
    });

    if let Err(e) = result {
        eprintln!("{} {}", style("❌").red(), style(&e).red());
        std::process::exit(e.status_code());
    }
}
