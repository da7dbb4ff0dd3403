//! Reference host for `sys-single-instance`.
//!
//! Usage:
//!   instance-host [OPTIONS] [-- ARGS...]
//!
//! Prints one line per event on stdout:
//!   FIRST <pid>                  this process owns the claim
//!   SECOND <pid> <handoff>       <pid> owns it; ARGS were handed off (or not)
//!   HANDOFF ["a", "b"]           a later invocation passed these ARGS
//!
//! The first instance runs until `--hold-ms` elapses or stdin closes, then
//! releases its claim.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use sys_single_instance::{
    HandoffStatus, InstanceLock, Location, Ownership, RetryPolicy, Timing, WakeSignal,
};

#[derive(Parser)]
#[command(name = "instance-host")]
#[command(about = "Run as the single instance of an app id, or hand arguments to it")]
struct Cli {
    /// Application identifier shared by all instances
    #[arg(long, default_value = "instance-host")]
    app_id: String,

    /// Directory for the claim files (default: system temp dir)
    #[arg(long, conflicts_with = "runtime_dir")]
    dir: Option<PathBuf>,

    /// Keep claim files in the per-user runtime dir
    #[arg(long)]
    runtime_dir: bool,

    /// Signal used to wake the first instance (usr1, usr2, hup, winch)
    #[arg(long, default_value = "usr1")]
    signal: WakeSignal,

    /// Don't hand arguments over; a first instance drops any it is handed
    #[arg(long)]
    no_handoff: bool,

    /// Release and exit after this many milliseconds instead of waiting for stdin to close
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Tries at taking the handoff lock before skipping the handoff [default: 10]
    #[arg(long)]
    lock_attempts: Option<u32>,

    /// Pause between handoff lock tries [default: 100]
    #[arg(long)]
    lock_interval_ms: Option<u64>,

    /// Checks for the first instance picking up the arguments [default: 20]
    #[arg(long)]
    consume_attempts: Option<u32>,

    /// Pause between pickup checks [default: 50]
    #[arg(long)]
    consume_interval_ms: Option<u64>,

    /// Stale claims removed before giving up on acquiring [default: 5]
    #[arg(long)]
    reclaim_attempts: Option<u32>,

    /// Arguments handed to the first instance
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    fn location(&self) -> Location {
        match &self.dir {
            Some(dir) => Location::Dir(dir.clone()),
            None if self.runtime_dir => Location::Runtime,
            None => Location::Temp,
        }
    }

    fn timing(&self) -> Timing {
        let defaults = Timing::default();
        let policy = |attempts: Option<u32>, interval_ms: Option<u64>, base: RetryPolicy| {
            RetryPolicy::new(
                attempts.unwrap_or(base.attempts),
                interval_ms.map(Duration::from_millis).unwrap_or(base.interval),
            )
        };
        Timing {
            lock: policy(self.lock_attempts, self.lock_interval_ms, defaults.lock),
            consume: policy(self.consume_attempts, self.consume_interval_ms, defaults.consume),
            reclaim_attempts: self.reclaim_attempts.unwrap_or(defaults.reclaim_attempts),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut lock = InstanceLock::new(cli.app_id.as_str())
        .location(cli.location())
        .signal(cli.signal)
        .timing(cli.timing())
        .args(cli.args.iter().cloned());
    if !cli.no_handoff {
        lock = lock.on_second_instance(|args| {
            println!("HANDOFF {:?}", args);
        });
    }

    let ownership = lock
        .acquire()
        .with_context(|| format!("Failed to acquire instance claim for {}", cli.app_id))?;

    match ownership {
        Ownership::First { pid } => {
            println!("FIRST {}", pid);
            info!("holding claim {}", lock.paths().pid.display());
            wait_for_shutdown(cli.hold_ms);
            lock.release().context("Failed to release instance claim")?;
        }
        Ownership::Secondary { pid, handoff } => {
            if let HandoffStatus::Failed(reason) = &handoff {
                warn!("handoff failed: {}", reason);
            }
            println!("SECOND {} {}", pid, status_label(&handoff));
        }
    }

    Ok(())
}

fn wait_for_shutdown(hold_ms: Option<u64>) {
    match hold_ms {
        Some(ms) => thread::sleep(Duration::from_millis(ms)),
        None => {
            // Drain stdin until the parent closes it
            for line in io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
            }
        }
    }
}

fn status_label(status: &HandoffStatus) -> &'static str {
    match status {
        HandoffStatus::Disabled => "disabled",
        HandoffStatus::Delivered => "delivered",
        HandoffStatus::Unconsumed => "unconsumed",
        HandoffStatus::LockTimeout => "lock-timeout",
        HandoffStatus::Failed(_) => "failed",
    }
}
