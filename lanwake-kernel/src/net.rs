//! Reachability and neighbor-table probes.
//!
//! Both probes are best-effort: execution errors read as "unreachable" and
//! "no MAC found". They never surface an error to the caller.

use crate::runner::{CommandRunner, ExecRequest};
use crate::targets::normalize_mac;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const NEIGHBOR_TIMEOUT: Duration = Duration::from_secs(3);

pub trait NetProbe: Send + Sync {
    /// Single echo request.
    fn ping<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, bool>;
    /// MAC currently cached for `ip` in the neighbor/ARP table.
    fn discover_mac<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, Option<String>>;
}

/// Shells out to the platform `ping`, `ip neigh` and `arp` tools.
pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
}

impl SystemProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn ping_once(&self, ip: &str) -> bool {
        if ip.is_empty() {
            return false;
        }
        let request = ExecRequest::argv(ping_args(ip)).with_timeout(PING_TIMEOUT);
        match self.runner.run(&request).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(ip, error = %e, "ping failed to run");
                false
            }
        }
    }

    async fn lookup_mac(&self, ip: &str) -> Option<String> {
        for args in neighbor_lookups(ip) {
            let request = ExecRequest::argv(args).with_timeout(NEIGHBOR_TIMEOUT);
            let out = match self.runner.run(&request).await {
                Ok(out) => out,
                Err(e) => {
                    debug!(ip, command = %request.description, error = %e, "neighbor lookup failed");
                    continue;
                }
            };
            if let Some(mac) = find_mac(&format!("{}\n{}", out.stdout, out.stderr)) {
                debug!(ip, mac = %mac, "mac discovered");
                return Some(mac);
            }
        }
        None
    }
}

impl NetProbe for SystemProbe {
    fn ping<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, bool> {
        self.ping_once(ip).boxed()
    }

    fn discover_mac<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, Option<String>> {
        self.lookup_mac(ip).boxed()
    }
}

fn ping_args(ip: &str) -> Vec<String> {
    let args: &[&str] = if cfg!(target_os = "windows") {
        &["ping", "-n", "1", "-w", "1000"]
    } else {
        &["ping", "-c", "1", "-W", "1"]
    };
    args.iter().map(|s| s.to_string()).chain([ip.to_string()]).collect()
}

fn neighbor_lookups(ip: &str) -> Vec<Vec<String>> {
    let lookups: &[&[&str]] = if cfg!(target_os = "windows") {
        &[&["arp", "-a"]]
    } else {
        &[&["ip", "neigh", "show"], &["arp", "-n"]]
    };
    lookups
        .iter()
        .map(|base| base.iter().map(|s| s.to_string()).chain([ip.to_string()]).collect())
        .collect()
}

/// First well-formed MAC in `text`, canonicalized. Windows prints
/// hyphenated octets, so hyphens are read as colons.
pub fn find_mac(text: &str) -> Option<String> {
    let text = text.replace('-', ":");
    text.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | ';'))
        .filter(|token| token.len() == 17)
        .find_map(|token| normalize_mac(token).ok().flatten())
}
