//! CLI command definitions
//!
//! Defines the clap commands for the pldbg CLI.

use clap::Subcommand;

use crate::registry::{ANY_TARGET, NO_PROXY};

#[derive(Subcommand)]
pub enum Commands {
    /// Set a Shared breakpoint
    #[command(name = "break", alias = "b")]
    Break {
        /// Location: <function>:<line> (line -1 for function entry)
        location: String,

        /// Database the function belongs to
        #[arg(long, default_value_t = 0)]
        database: u32,

        /// Only this process may hit the breakpoint (-1 for any)
        #[arg(long, default_value_t = ANY_TARGET, allow_negative_numbers = true)]
        target: i32,

        /// Port of the proxy waiting for the target (omit to make the target listen)
        #[arg(long)]
        proxy_port: Option<u16>,

        /// Pid of the proxy that owns the breakpoint
        #[arg(long, default_value_t = NO_PROXY, allow_negative_numbers = true)]
        proxy_pid: i32,

        /// Mark the breakpoint temporary
        #[arg(long)]
        temporary: bool,
    },

    /// Remove a Shared breakpoint
    #[command(alias = "f")]
    Clear {
        /// Location: <function>:<line>
        location: String,

        /// Database the function belongs to
        #[arg(long, default_value_t = 0)]
        database: u32,

        /// Target the breakpoint was set for (-1 for any)
        #[arg(long, default_value_t = ANY_TARGET, allow_negative_numbers = true)]
        target: i32,
    },

    /// List Shared breakpoints and per-function counts
    #[command(alias = "ls")]
    List,

    /// Release the breakpoints a proxy's finished session had claimed
    FreeSession {
        /// Pid of the proxy
        proxy_pid: i32,
    },

    /// Remove every breakpoint owned by a proxy
    Cleanup {
        /// Pid of the proxy
        proxy_pid: i32,
    },

    /// Show coordinator status
    Status,

    /// Stop the coordinator
    Shutdown,

    /// [Internal] Run as the coordinator process
    #[command(hide = true)]
    Coordinator,
}
