// ── In-memory device ──
//
// A device that keeps its configuration tables in memory and answers the
// generic `print`/`add`/`set`/`remove` verbs the engine uses. Backs the
// engine test suite and the CLI's `--dry-run` mode, where the command log
// is what gets shown to the operator.
//
// Failure injection: refuse connections, fail the Nth command, fail every
// command under a path prefix, stall commands, fail or drop uploads, or
// delay their visibility.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use captive_api::{ID_KEY, RET_KEY, Record, Request};

use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::session::{FileTransfer, Link, Transport};

const FILE: &str = "/file";

#[derive(Debug, Default)]
struct SimState {
    tables: BTreeMap<String, Vec<Record>>,
    next_id: u64,
    log: Vec<String>,
    opens: usize,
    closes: usize,
    refuse_connections: bool,
    fail_prefixes: Vec<String>,
    fail_at: Option<usize>,
    stall_prefixes: Vec<String>,
    fail_uploads: bool,
    drop_uploads: bool,
    visibility_delay: usize,
    pending_files: Vec<(usize, Record)>,
    uploads: BTreeMap<String, Vec<u8>>,
}

/// Shared handle to one simulated device. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A typical five-port router with one radio.
    pub fn router() -> Self {
        Self::new().with_interfaces(&["ether1", "ether2", "ether3", "ether4", "ether5"], &["wlan1"])
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Seed the interface table (and wireless table for radios).
    #[must_use]
    pub fn with_interfaces(self, ethernet: &[&str], radios: &[&str]) -> Self {
        for name in ethernet {
            self.seed("/interface", Record::new().with("name", *name).with("type", "ether"));
        }
        for name in radios {
            self.seed("/interface", Record::new().with("name", *name).with("type", "wlan"));
            self.seed(
                "/interface/wireless",
                Record::new().with("name", *name).with("disabled", "true"),
            );
        }
        self
    }

    /// Insert a record as if it had been configured out of band.
    /// Returns its id.
    pub fn seed(&self, class: &str, record: Record) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        let record = record.with(ID_KEY, id.clone());
        state.tables.entry(class.to_owned()).or_default().push(record);
        id
    }

    // ── Failure injection ────────────────────────────────────────────

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Fail every command whose path starts with `prefix`.
    pub fn fail_on(&self, prefix: impl Into<String>) {
        self.state().fail_prefixes.push(prefix.into());
    }

    /// Fail the command with this zero-based index in the log.
    pub fn fail_at(&self, index: usize) {
        self.state().fail_at = Some(index);
    }

    /// Commands under `prefix` never answer.
    pub fn stall_on(&self, prefix: impl Into<String>) {
        self.state().stall_prefixes.push(prefix.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_prefixes.clear();
        state.fail_at = None;
        state.stall_prefixes.clear();
        state.fail_uploads = false;
        state.refuse_connections = false;
    }

    /// Reject every upload.
    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    /// Accept uploads without ever storing them.
    pub fn drop_uploads(&self, drop: bool) {
        self.state().drop_uploads = drop;
    }

    /// Uploaded files appear only after this many `/file/print` calls.
    pub fn delay_file_visibility(&self, polls: usize) {
        self.state().visibility_delay = polls;
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn records(&self, class: &str) -> Vec<Record> {
        self.state().tables.get(class).cloned().unwrap_or_default()
    }

    pub fn count(&self, class: &str) -> usize {
        self.state().tables.get(class).map_or(0, Vec::len)
    }

    /// Object count per class, for comparing whole-device state.
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.state()
            .tables
            .iter()
            .map(|(class, rows)| (class.clone(), rows.len()))
            .collect()
    }

    /// Every command received, rendered as console words.
    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Commands received whose verb mutates state.
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| {
                let path = c.split_whitespace().next().unwrap_or_default();
                !path.ends_with("/print")
            })
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn uploaded(&self, remote_name: &str) -> Option<Vec<u8>> {
        self.state().uploads.get(remote_name).cloned()
    }
}

impl SimState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }

    fn stalls(&self, request: &Request) -> bool {
        self.stall_prefixes
            .iter()
            .any(|p| request.path().starts_with(p.as_str()))
    }

    fn execute(&mut self, request: &Request) -> Result<Vec<Record>, captive_api::Error> {
        let index = self.log.len();
        self.log.push(request.to_string());

        let injected = self.fail_at == Some(index)
            || self
                .fail_prefixes
                .iter()
                .any(|p| request.path().starts_with(p.as_str()));
        if injected {
            return Err(rejected(request, "simulated failure"));
        }

        let class = request.class();
        match request.verb() {
            "print" => Ok(self.print(class, request)),
            "add" => Ok(vec![self.add(class, request)]),
            "set" => self.set(class, request).map(|()| Vec::new()),
            "remove" => self.remove(class, request).map(|()| Vec::new()),
            _ => Err(rejected(request, "no such command")),
        }
    }

    fn print(&mut self, class: &str, request: &Request) -> Vec<Record> {
        if class == FILE {
            self.tick_pending_files();
        }
        self.tables
            .get(class)
            .map(|rows| {
                rows.iter()
                    .filter(|row| request.queries().all(|(k, v)| row.get(k) == Some(v)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add(&mut self, class: &str, request: &Request) -> Record {
        let id = self.allocate_id();
        let mut record = Record::new().with(ID_KEY, id.clone());
        let mut place_before = None;
        for (key, value) in request.attributes() {
            if key == "place-before" {
                place_before = Some(value.to_owned());
            } else {
                record.insert(key, value);
            }
        }

        let rows = self.tables.entry(class.to_owned()).or_default();
        let position = place_before
            .and_then(|before| rows.iter().position(|r| r.id() == Some(before.as_str())))
            .unwrap_or(rows.len());
        rows.insert(position, record);
        Record::new().with(RET_KEY, id)
    }

    fn set(&mut self, class: &str, request: &Request) -> Result<(), captive_api::Error> {
        let rows = self.tables.entry(class.to_owned()).or_default();
        let row = match request.attribute(ID_KEY) {
            Some(id) => rows
                .iter_mut()
                .find(|r| r.id() == Some(id))
                .ok_or_else(|| rejected(request, "no such item"))?,
            // Singleton menus (`/interface/wireless/cap`) are set without an id.
            None => {
                if rows.is_empty() {
                    rows.push(Record::new());
                }
                &mut rows[0]
            }
        };
        for (key, value) in request.attributes().filter(|(k, _)| *k != ID_KEY) {
            row.insert(key, value);
        }
        Ok(())
    }

    fn remove(&mut self, class: &str, request: &Request) -> Result<(), captive_api::Error> {
        let id = request
            .attribute(ID_KEY)
            .ok_or_else(|| rejected(request, "missing .id"))?;
        let rows = self.tables.entry(class.to_owned()).or_default();
        let position = rows
            .iter()
            .position(|r| r.id() == Some(id))
            .ok_or_else(|| rejected(request, "no such item"))?;
        rows.remove(position);
        Ok(())
    }

    fn tick_pending_files(&mut self) {
        let mut visible = Vec::new();
        self.pending_files.retain_mut(|(polls, record)| {
            *polls = polls.saturating_sub(1);
            if *polls == 0 {
                visible.push(record.clone());
                false
            } else {
                true
            }
        });
        self.tables.entry(FILE.to_owned()).or_default().extend(visible);
    }
}

fn rejected(request: &Request, detail: &str) -> captive_api::Error {
    captive_api::Error::Command {
        path: request.path().to_owned(),
        status: 400,
        message: "Bad Request".into(),
        detail: Some(detail.to_owned()),
    }
}

// ── Seams ───────────────────────────────────────────────────────────

#[async_trait]
impl Transport for SimulatedDevice {
    async fn open(&self, device: &DeviceConfig) -> Result<Box<dyn Link>, CoreError> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(CoreError::ConnectionFailed {
                url: device.url.to_string(),
                reason: "connection refused".into(),
            });
        }
        state.opens += 1;
        Ok(Box::new(SimLink {
            device: self.clone(),
        }))
    }
}

struct SimLink {
    device: SimulatedDevice,
}

#[async_trait]
impl Link for SimLink {
    async fn execute(&mut self, request: &Request) -> Result<Vec<Record>, captive_api::Error> {
        let stalled = self.device.state().stalls(request);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.device.state().execute(request)
    }

    async fn close(&mut self) -> Result<(), captive_api::Error> {
        self.device.state().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl FileTransfer for SimulatedDevice {
    async fn put(
        &self,
        _device: &DeviceConfig,
        remote_name: &str,
        contents: &[u8],
    ) -> Result<(), captive_api::Error> {
        let mut state = self.state();
        if state.fail_uploads {
            return Err(captive_api::Error::Command {
                path: FILE.to_owned(),
                status: 500,
                message: "Internal Server Error".into(),
                detail: Some(format!("simulated upload failure: {remote_name}")),
            });
        }
        if state.drop_uploads {
            return Ok(());
        }
        let id = state.allocate_id();
        let record = Record::new()
            .with(ID_KEY, id)
            .with("name", remote_name)
            .with("size", contents.len().to_string());
        state.uploads.insert(remote_name.to_owned(), contents.to_vec());
        match state.visibility_delay {
            0 => state.tables.entry(FILE.to_owned()).or_default().push(record),
            polls => state.pending_files.push((polls, record)),
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn add_print_remove() {
        let device = SimulatedDevice::new();
        let mut state = device.state();
        let ret = state
            .execute(&Request::add("/ip/pool").attr("name", "hs-pool-1"))
            .unwrap();
        let id = ret[0].id().unwrap().to_owned();

        let found = state
            .execute(&Request::print("/ip/pool").query("name", "hs-pool-1"))
            .unwrap();
        assert_eq!(found.len(), 1);

        state.execute(&Request::remove("/ip/pool", &id)).unwrap();
        let err = state.execute(&Request::remove("/ip/pool", &id)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn place_before_orders_rows() {
        let device = SimulatedDevice::new();
        let drop_id = device.seed("/ip/firewall/filter", Record::new().with("action", "drop"));
        device
            .state()
            .execute(
                &Request::add("/ip/firewall/filter")
                    .attr("action", "accept")
                    .attr("place-before", drop_id.as_str()),
            )
            .unwrap();
        let rows = device.records("/ip/firewall/filter");
        assert_eq!(rows[0].get("action"), Some("accept"));
        assert_eq!(rows[1].get("action"), Some("drop"));
        assert_eq!(rows[0].get("place-before"), None);
    }

    #[test]
    fn injected_failure_hits_only_the_indexed_command() {
        let device = SimulatedDevice::new();
        device.fail_at(1);
        let mut state = device.state();
        assert!(state.execute(&Request::print("/interface")).is_ok());
        assert!(state.execute(&Request::print("/interface")).is_err());
        assert!(state.execute(&Request::print("/interface")).is_ok());
    }
}
