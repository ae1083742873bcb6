use super::model::{Target, TargetPatch, TargetView};
use super::runtime::RuntimeOverlay;
use super::store;
use super::validate::{normalize_mac, normalize_name, validate_ip};
use crate::clock::{format_ts, SharedClock};
use crate::error::{WolError, WolResult};
use crate::logs::LogStore;
use crate::net::NetProbe;
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Registry {
    path: PathBuf,
    seed: Vec<Target>,
    /// Guards the registry file as well as the overlay itself.
    runtime: Mutex<RuntimeOverlay>,
    logs: Arc<LogStore>,
    clock: SharedClock,
    probe: Option<Arc<dyn NetProbe>>,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>, logs: Arc<LogStore>, clock: SharedClock) -> Self {
        Self {
            path: path.into(),
            seed: Vec::new(),
            runtime: Mutex::new(RuntimeOverlay::default()),
            logs,
            clock,
            probe: None,
        }
    }

    /// Target written into the registry file when it does not exist yet.
    pub fn with_seed(mut self, seed: Option<Target>) -> Self {
        self.seed = seed.into_iter().collect();
        self
    }

    /// Neighbor-table probe used for MAC auto-discovery.
    pub fn with_probe(mut self, probe: Arc<dyn NetProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn now(&self) -> String {
        format_ts(self.clock.now())
    }

    // The two helpers below must only run while `self.runtime` is locked.

    fn load_locked(&self) -> WolResult<Vec<Target>> {
        store::load(&self.path, &self.seed, &self.now())
    }

    fn save_locked(&self, targets: &mut [Target]) -> WolResult<()> {
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        store::save(&self.path, targets)
    }

    /// Every target merged with its runtime overlay, ordered by name.
    pub fn list(&self) -> WolResult<Vec<TargetView>> {
        let runtime = self.runtime.lock();
        let targets = self.load_locked()?;
        Ok(targets
            .iter()
            .map(|t| TargetView::merge(t, runtime.get(&t.name)))
            .collect())
    }

    pub fn get(&self, name: &str) -> WolResult<Option<Target>> {
        let name = normalize_name(name)?;
        let _guard = self.runtime.lock();
        Ok(self.load_locked()?.into_iter().find(|t| t.name == name))
    }

    pub fn get_or_fail(&self, name: &str) -> WolResult<Target> {
        self.get(name)?.ok_or_else(WolError::unknown_target)
    }

    pub fn create(&self, name: &str, ip: &str, mac: Option<&str>) -> WolResult<Target> {
        let name = normalize_name(name)?;
        let ip = validate_ip(ip)?;
        let mac = match mac {
            Some(mac) => normalize_mac(mac)?,
            None => None,
        };
        let now = self.now();
        let target = Target {
            name,
            ip,
            mac,
            created_at: now.clone(),
            updated_at: now,
            extra: Map::new(),
        };

        {
            let _guard = self.runtime.lock();
            let mut targets = self.load_locked()?;
            if targets.iter().any(|t| t.name == target.name) {
                return Err(WolError::Conflict("duplicate target name".into()));
            }
            targets.push(target.clone());
            self.save_locked(&mut targets)?;
        }

        info!(name = %target.name, ip = %target.ip, "target created");
        self.logs.append(json!({
            "evt": "target-create",
            "target": target.name,
            "ip": target.ip,
            "mac": target.mac,
        }))?;
        Ok(target)
    }

    /// Partial update. A present-but-blank `mac` clears the stored MAC; a
    /// rename carries the runtime overlay along.
    pub fn update(&self, name: &str, patch: TargetPatch) -> WolResult<Target> {
        let original = normalize_name(name)?;

        let updated = {
            let mut runtime = self.runtime.lock();
            let mut targets = self.load_locked()?;
            let index = targets
                .iter()
                .position(|t| t.name == original)
                .ok_or_else(WolError::unknown_target)?;
            let mut target = targets[index].clone();

            if let Some(new_name) = patch.name.as_deref() {
                let new_name = normalize_name(new_name)?;
                if new_name != original && targets.iter().any(|t| t.name == new_name) {
                    return Err(WolError::Conflict("duplicate target name".into()));
                }
                target.name = new_name;
            }
            if let Some(ip) = patch.ip.as_deref() {
                target.ip = validate_ip(ip)?;
            }
            if let Some(mac) = patch.mac.as_deref() {
                target.mac = normalize_mac(mac)?;
            }
            target.updated_at = self.now();

            targets[index] = target.clone();
            self.save_locked(&mut targets)?;
            runtime.rename(&original, &target.name);
            target
        };

        info!(name = %original, renamed_to = %updated.name, "target updated");
        self.logs.append(json!({
            "evt": "target-update",
            "target": original,
            "updated": updated.name,
        }))?;
        Ok(updated)
    }

    pub fn delete(&self, name: &str) -> WolResult<()> {
        let name = normalize_name(name)?;

        let removed = {
            let mut runtime = self.runtime.lock();
            let mut targets = self.load_locked()?;
            let index = targets
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(WolError::unknown_target)?;
            let removed = targets.remove(index);
            self.save_locked(&mut targets)?;
            runtime.remove(&name);
            removed
        };

        info!(name = %name, "target deleted");
        self.logs.append(json!({
            "evt": "target-delete",
            "target": name,
            "ip": removed.ip,
        }))?;
        Ok(())
    }

    /// Stores `mac` on the target. Writing the MAC already stored is a no-op:
    /// no file write, no `updated_at` bump, no audit entry.
    pub fn set_mac(&self, name: &str, mac: &str) -> WolResult<Target> {
        let mac = normalize_mac(mac)?.ok_or_else(|| WolError::invalid("mac is required"))?;
        let name = normalize_name(name)?;

        let target = {
            let _guard = self.runtime.lock();
            let mut targets = self.load_locked()?;
            let index = targets
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(WolError::unknown_target)?;
            if targets[index].mac.as_deref() == Some(mac.as_str()) {
                return Ok(targets[index].clone());
            }
            targets[index].mac = Some(mac.clone());
            targets[index].updated_at = self.now();
            let target = targets[index].clone();
            self.save_locked(&mut targets)?;
            target
        };

        info!(name = %name, mac = %mac, "target mac set");
        self.logs.append(json!({
            "evt": "target-mac-set",
            "target": name,
            "mac": mac,
        }))?;
        Ok(target)
    }

    /// Updates the overlay. When the target answered and its IP is known, the
    /// neighbor table is consulted to fill in a missing or changed MAC; that
    /// step never fails the caller.
    pub async fn record_status(&self, name: &str, online: bool, ip: Option<&str>) {
        let key = name.trim().to_lowercase();
        let now = self.now();
        self.runtime.lock().record_status(&key, online, now);

        let ip = ip.map(str::trim).filter(|ip| !ip.is_empty());
        if let (true, Some(ip)) = (online, ip) {
            self.enrich_mac(&key, ip).await;
        }
    }

    pub fn record_wake(&self, name: &str) {
        let key = name.trim().to_lowercase();
        let now = self.now();
        self.runtime.lock().record_wake(&key, now);
    }

    pub async fn discover_mac(&self, ip: &str) -> Option<String> {
        match &self.probe {
            Some(probe) => probe.discover_mac(ip).await,
            None => None,
        }
    }

    /// Best-effort MAC enrichment: returns the updated target, or `None` when
    /// nothing was discovered or the target could not be updated.
    pub async fn enrich_mac(&self, name: &str, ip: &str) -> Option<Target> {
        let mac = self.discover_mac(ip).await?;
        match self.set_mac(name, &mac) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!(name, ip, error = %e, "mac enrichment skipped");
                None
            }
        }
    }
}
