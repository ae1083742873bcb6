//! Test doubles shared by the unit tests.

use crate::clock::Clock;
use crate::logs::{LogEntry, LogStore};
use crate::net::NetProbe;
use crate::runner::{CommandOutput, CommandRunner, ExecRequest, RunError};
use crate::targets::Registry;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn at(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// One scripted outcome for [`FakeRunner`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Exit { code: i32, stdout: String, stderr: String },
    Timeout,
    StartFailure,
}

impl Scripted {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Scripted::Exit { code, stdout: stdout.into(), stderr: stderr.into() }
    }
}

/// Replays scripted outcomes in order and records every request. Once the
/// script runs out every request exits 0 with no output.
#[derive(Default)]
pub struct FakeRunner {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<ExecRequest>>,
}

impl FakeRunner {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.seen.lock().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(&'a self, request: &'a ExecRequest) -> BoxFuture<'a, Result<CommandOutput, RunError>> {
        self.seen.lock().push(request.clone());
        let next = self.script.lock().pop_front().unwrap_or_else(|| Scripted::exit(0, "", ""));
        let result = match next {
            Scripted::Exit { code, stdout, stderr } => Ok(CommandOutput { exit_code: code, stdout, stderr }),
            Scripted::Timeout => Err(RunError::Timeout(request.timeout.unwrap_or_default())),
            Scripted::StartFailure => Err(RunError::Start(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file or directory",
            ))),
        };
        future::ready(result).boxed()
    }
}

/// Probe with a fixed answer for every host.
#[derive(Default)]
pub struct FakeProbe {
    online: AtomicBool,
    mac: Mutex<Option<String>>,
    pings: AtomicUsize,
    discovers: AtomicUsize,
}

impl FakeProbe {
    pub fn new(online: bool, mac: Option<&str>) -> Self {
        Self {
            online: AtomicBool::new(online),
            mac: Mutex::new(mac.map(str::to_string)),
            ..Default::default()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_mac(&self, mac: Option<&str>) {
        *self.mac.lock() = mac.map(str::to_string);
    }

    pub fn ping_calls(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discovers.load(Ordering::SeqCst)
    }
}

impl NetProbe for FakeProbe {
    fn ping<'a>(&'a self, _ip: &'a str) -> BoxFuture<'a, bool> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        future::ready(self.online.load(Ordering::SeqCst)).boxed()
    }

    fn discover_mac<'a>(&'a self, _ip: &'a str) -> BoxFuture<'a, Option<String>> {
        self.discovers.fetch_add(1, Ordering::SeqCst);
        future::ready(self.mac.lock().clone()).boxed()
    }
}

/// A registry and log store rooted in a temp dir, on a manual clock, with an
/// offline probe that discovers nothing.
pub struct Fixture {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub logs: Arc<LogStore>,
    pub probe: Arc<FakeProbe>,
    pub registry: Arc<Registry>,
}

impl Fixture {
    pub fn targets_path(&self) -> PathBuf {
        self.dir.path().join("data").join("targets.json")
    }

    /// Replaces the registry file, e.g. to attach `shutdown`/`reboot` specs.
    pub fn write_targets(&self, doc: serde_json::Value) {
        std::fs::write(self.targets_path(), serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    }

    /// A fresh registry over the same file, as after a restart.
    pub fn reopen(&self) -> Registry {
        Registry::new(self.targets_path(), self.logs.clone(), self.clock.clone())
    }

    pub fn events(&self, evt: &str) -> Vec<LogEntry> {
        self.logs
            .read(0)
            .unwrap()
            .into_iter()
            .filter(|entry| entry.get("evt").and_then(|v| v.as_str()) == Some(evt))
            .collect()
    }
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    let clock = ManualClock::at(datetime!(2024-05-01 21:00:00 +09:00));
    let logs = Arc::new(LogStore::new(dir.path().join("logs").join("lanwake.jsonl"), clock.clone()));
    let probe = Arc::new(FakeProbe::new(false, None));
    let registry = Arc::new(
        Registry::new(dir.path().join("data").join("targets.json"), logs.clone(), clock.clone())
            .with_probe(probe.clone()),
    );
    Fixture { dir, clock, logs, probe, registry }
}
