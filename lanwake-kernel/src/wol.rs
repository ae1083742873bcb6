use crate::config::{Settings, DEFAULT_WAKE_COMMAND};
use crate::error::{WolError, WolResult};
use crate::logs::LogStore;
use crate::power::{trim_text, ERROR_EXCERPT};
use crate::runner::{CommandRunner, ExecRequest, RunError};
use crate::targets::{Registry, Target};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const WOL_PORT: u16 = 9;
const EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);

pub fn parse_mac(mac: &str) -> WolResult<[u8; 6]> {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        return Err(WolError::invalid("invalid mac address; use AA:BB:CC:DD:EE:FF"));
    }
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| WolError::invalid("invalid mac address; use AA:BB:CC:DD:EE:FF"))?;
    }
    Ok(out)
}

pub fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut pkt = [0u8; 102];
    // 6 x 0xFF
    pkt[..6].fill(0xFF);
    // then the MAC 16 times
    for chunk in pkt[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    pkt
}

fn parse_broadcast(hint: &str) -> Ipv4Addr {
    hint.trim().parse().unwrap_or_else(|_| {
        warn!(broadcast = hint, "invalid broadcast address, using 255.255.255.255");
        Ipv4Addr::BROADCAST
    })
}

/// Sends one magic packet to `dest` from an ephemeral socket.
pub async fn send_magic_packet(mac: [u8; 6], dest: SocketAddrV4) -> io::Result<()> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    sock.set_broadcast(true)?;
    sock.send_to(&magic_packet(mac), dest).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeMethod {
    #[default]
    MagicPacket,
    ExternalUtility,
}

impl WakeMethod {
    /// Unknown selectors fall back to the magic packet.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "magic-packet" | "python" | "udp" | "" => WakeMethod::MagicPacket,
            "external-utility" | "etherwake" | "external" => WakeMethod::ExternalUtility,
            other => {
                warn!(method = other, "unknown wake method, using magic-packet");
                WakeMethod::MagicPacket
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WakeMethod::MagicPacket => "magic-packet",
            WakeMethod::ExternalUtility => "external-utility",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub method: WakeMethod,
    pub broadcast: Ipv4Addr,
    pub port: u16,
    pub iface: String,
    pub command_template: String,
    pub timeout: Duration,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl WakeConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            method: WakeMethod::parse(&settings.wol_method),
            broadcast: parse_broadcast(&settings.broadcast),
            port: WOL_PORT,
            iface: settings.lan_iface.clone(),
            command_template: if settings.wol_command.trim().is_empty() {
                DEFAULT_WAKE_COMMAND.to_string()
            } else {
                settings.wol_command.clone()
            },
            timeout: EXTERNAL_TIMEOUT,
        }
    }
}

/// Splits `template` into words and substitutes `{key}` placeholders in
/// each word, so values never get re-split.
pub fn render_wake_command(template: &str, vars: &[(&str, &str)]) -> WolResult<Vec<String>> {
    let words = shell_words::split(template)
        .map_err(|e| WolError::invalid(format!("invalid wake command: {e}")))?;
    if words.is_empty() {
        return Err(WolError::invalid("empty wake command"));
    }
    Ok(words
        .into_iter()
        .map(|word| {
            vars.iter()
                .fold(word, |acc, (key, value)| acc.replace(&format!("{{{key}}}"), value))
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakeReport {
    pub ok: bool,
    pub sent: &'static str,
    pub target: String,
}

pub struct WakeDispatcher {
    registry: Arc<Registry>,
    logs: Arc<LogStore>,
    runner: Arc<dyn CommandRunner>,
    config: WakeConfig,
}

impl WakeDispatcher {
    pub fn new(
        registry: Arc<Registry>,
        logs: Arc<LogStore>,
        runner: Arc<dyn CommandRunner>,
        config: WakeConfig,
    ) -> Self {
        Self { registry, logs, runner, config }
    }

    pub fn config(&self) -> &WakeConfig {
        &self.config
    }

    /// Wakes `name`. A target without a stored MAC gets one from the
    /// neighbor table first, if it is there.
    pub async fn wake(&self, name: &str) -> WolResult<WakeReport> {
        let target = self.registry.get_or_fail(name)?;
        let mac = self
            .resolve_mac(&target)
            .await
            .ok_or_else(|| WolError::invalid("no mac for target"))?;
        let method = self.config.method.as_str();

        if let Err(e) = self.dispatch(&target, &mac).await {
            warn!(name = %target.name, %mac, method, error = %e, "wake failed");
            self.logs.record(json!({
                "evt": "wake",
                "target": target.name,
                "mac": mac,
                "from": "api",
                "method": method,
                "error": e.to_string(),
            }));
            return Err(e);
        }

        info!(name = %target.name, %mac, method, "wake sent");
        self.logs.append(json!({
            "evt": "wake",
            "target": target.name,
            "mac": mac,
            "from": "api",
            "method": method,
        }))?;
        self.registry.record_wake(&target.name);
        Ok(WakeReport { ok: true, sent: method, target: target.name })
    }

    async fn resolve_mac(&self, target: &Target) -> Option<String> {
        if let Some(mac) = &target.mac {
            return Some(mac.clone());
        }
        if target.ip.is_empty() {
            return None;
        }
        debug!(name = %target.name, ip = %target.ip, "no stored mac, trying neighbor table");
        self.registry
            .enrich_mac(&target.name, &target.ip)
            .await
            .and_then(|t| t.mac)
    }

    async fn dispatch(&self, target: &Target, mac: &str) -> WolResult<()> {
        match self.config.method {
            WakeMethod::MagicPacket => {
                let bytes = parse_mac(mac)?;
                let dest = SocketAddrV4::new(self.config.broadcast, self.config.port);
                send_magic_packet(bytes, dest)
                    .await
                    .map_err(|e| WolError::Unavailable(format!("magic packet send failed: {e}")))
            }
            WakeMethod::ExternalUtility => {
                let argv = render_wake_command(
                    &self.config.command_template,
                    &[
                        ("iface", self.config.iface.as_str()),
                        ("mac", mac),
                        ("target", target.name.as_str()),
                        ("ip", target.ip.as_str()),
                    ],
                )?;
                let request = ExecRequest::argv(argv).with_timeout(self.config.timeout);
                match self.runner.run(&request).await {
                    Ok(out) if out.success() => Ok(()),
                    Ok(out) => Err(WolError::CommandFailed {
                        action: "wake".into(),
                        returncode: out.exit_code,
                        stdout: trim_text(&out.stdout, ERROR_EXCERPT),
                        stderr: trim_text(&out.stderr, ERROR_EXCERPT),
                    }),
                    Err(RunError::Timeout(_)) => Err(WolError::Timeout("wake command timed out".into())),
                    Err(RunError::Start(e)) => {
                        Err(WolError::Unavailable(format!("wake command failed to start: {e}")))
                    }
                }
            }
        }
    }
}
