// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Physical memory of a running QEMU guest, read through the QMP monitor.
//!
//! Each read asks QEMU to `pmemsave` the requested range into a staging file
//! and reads that file back. The staging path depends only on the endpoint,
//! so reads against one endpoint must not overlap.

use crate::address_space::{AddressSpace, MemoryWindow, Run};
use crate::error::{ConfigError, QmpError, ReadError};
use crate::session::Session;
use crate::transport::{ChannelConnector, ControlChannel, Endpoint};
use log::{debug, info};
use regex::Regex;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const SCHEME: &str = "qmp";

const STAGING_PREFIX: &str = "qmp_";

// Cap on up-front allocation for a read; larger reads grow as data arrives.
const MAX_PREALLOC: u64 = 1 << 20;

static MEMORY_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^base memory: ([0-9]+)").expect("valid memory size regex"));

/// Parse `qmp://hostname:port` into an endpoint.
pub fn parse_url(url: &str) -> Result<Endpoint, ConfigError> {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(ConfigError::WrongScheme(url.to_string()));
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let authority = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        match v6.split_once(']') {
            Some((h, tail)) => (h, tail.strip_prefix(':')),
            None => (v6, None),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        }
    };

    let host = urlencoding::decode(host)
        .map(|h| h.into_owned())
        .unwrap_or_else(|_| host.to_string())
        .to_ascii_lowercase();
    if host.is_empty() {
        return Err(ConfigError::MissingHost(url.to_string()));
    }

    let port = match port {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ConfigError::MissingPort(url.to_string())),
    };
    let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
        url: url.to_string(),
        port: port.to_string(),
    })?;

    Ok(Endpoint { host, port })
}

/// Staging file for an endpoint: `<dir>/qmp_<host>_<port>`.
pub fn staging_path(dir: &Path, endpoint: &Endpoint) -> PathBuf {
    dir.join(format!(
        "{}{}_{}",
        STAGING_PREFIX, endpoint.host, endpoint.port
    ))
}

/// Extract the base memory size from `info memory_size_summary` output.
pub fn parse_memory_size(response: &str) -> Option<u64> {
    MEMORY_SIZE_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

pub struct QmpAddressSpace {
    name: String,
    endpoint: Endpoint,
    window: MemoryWindow,
    datapath: PathBuf,
    channel: RefCell<Box<dyn ControlChannel>>,
}

impl std::fmt::Debug for QmpAddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QmpAddressSpace")
            .field("endpoint", &self.endpoint)
            .field("window", &self.window)
            .field("datapath", &self.datapath)
            .finish()
    }
}

impl QmpAddressSpace {
    /// Open a QMP address space.
    ///
    /// `base` must be `None`: this is always the innermost layer. The URL is
    /// taken from `filename`, falling back to the session's `filename`
    /// parameter. `connector` is the protocol binding; `None` means this
    /// build cannot talk QMP.
    pub fn open(
        base: Option<&dyn AddressSpace>,
        filename: Option<&str>,
        session: &mut Session,
        connector: Option<&dyn ChannelConnector>,
    ) -> Result<Self, QmpError> {
        let connector = connector.ok_or(ConfigError::BindingUnavailable)?;
        if base.is_some() {
            return Err(ConfigError::NotBaseLayer.into());
        }
        let url = filename
            .or_else(|| session.get_filename())
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUrl)?
            .to_string();
        let endpoint = parse_url(&url)?;
        let datapath = staging_path(&session.params().staging_dir(), &endpoint);

        let mut channel = connector.connect(&endpoint)?;
        let reply = channel.command(
            "human-monitor-command",
            json!({ "command-line": "info memory_size_summary" }),
        )?;
        let response = match reply.get("return") {
            Some(Value::String(s)) => s.clone(),
            _ => Value::Object(reply.clone()).to_string(),
        };
        let window = parse_memory_size(&response)
            .and_then(|size| MemoryWindow::with_size(0, size))
            .ok_or(QmpError::ProtocolMismatch { response })?;

        let name = format!("{}://{}", SCHEME, endpoint);
        info!(
            "Connected to {}: physical memory 0x{:x}-0x{:x}",
            name, window.min_addr, window.max_addr
        );

        let hook_name = name.clone();
        session.register_flush_hook(name.clone(), move || Self::close_channel(&hook_name));

        Ok(Self {
            name,
            endpoint,
            window,
            datapath,
            channel: RefCell::new(channel),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn window(&self) -> MemoryWindow {
        self.window
    }

    pub fn staging_path(&self) -> &Path {
        &self.datapath
    }

    /// The monitor connection is owned by the channel; there is nothing to release here.
    pub fn close(&self) {
        Self::close_channel(&self.name);
    }

    fn close_channel(name: &str) {
        debug!("Closing {}", name);
    }

    /// Typed read. `read` wraps this and turns every error into an empty result.
    pub fn try_read(&self, addr: u64, size: u64) -> Result<Vec<u8>, ReadError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        // Held until the staging file has been read back
        let mut channel = self
            .channel
            .try_borrow_mut()
            .map_err(|_| ReadError::Busy)?;

        let reply = channel
            .command(
                "pmemsave",
                json!({
                    "val": addr,
                    "size": size,
                    "filename": self.datapath.to_string_lossy(),
                }),
            )
            .map_err(|e| ReadError::Command {
                addr,
                size,
                reason: e.to_string(),
            })?;
        if !reply.contains_key("return") {
            let reason = reply
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_else(|| "reply has no return value".to_string());
            return Err(ReadError::Command { addr, size, reason });
        }

        let artifact = |source| ReadError::Artifact {
            path: self.datapath.clone(),
            source,
        };
        let file = File::open(&self.datapath).map_err(artifact)?;
        let mut data = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
        file.take(size).read_to_end(&mut data).map_err(artifact)?;
        Ok(data)
    }
}

impl AddressSpace for QmpAddressSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, addr: u64, size: u64) -> Vec<u8> {
        match self.try_read(addr, size) {
            Ok(data) => data,
            Err(e) => {
                debug!("{}: read of {} bytes at 0x{:x} failed: {}", self.name, size, addr, e);
                Vec::new()
            }
        }
    }

    fn write(&self, _addr: u64, _data: &[u8]) -> bool {
        false
    }

    fn is_valid_address(&self, addr: Option<u64>) -> bool {
        addr.is_some_and(|a| self.window.contains(a))
    }

    fn get_available_addresses(&self) -> Box<dyn Iterator<Item = (u64, u64)> + '_> {
        Box::new(std::iter::once((self.window.min_addr, self.window.max_addr)))
    }

    /// Guest physical memory is one flat run; the requested range does not narrow it.
    fn get_mappings(&self, _start: u64, _end: u64) -> Box<dyn Iterator<Item = Run> + '_> {
        Box::new(std::iter::once(Run {
            start: self.window.min_addr,
            end: self.window.max_addr,
            file_offset: 0,
        }))
    }

    fn is_volatile(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::session::SessionParameters;
    use serde_json::Map;
    use std::fs;
    use std::rc::Rc;

    /// Pretends to be QEMU: answers the memory summary and implements pmemsave over `image`.
    #[derive(Clone)]
    struct FakeMonitor {
        summary: Value,
        image: Rc<Vec<u8>>,
        fail_pmemsave: bool,
        write_artifact: bool,
        commands: Rc<RefCell<Vec<String>>>,
    }

    impl FakeMonitor {
        fn new(image: Vec<u8>) -> Self {
            Self {
                summary: Value::String(format!("base memory: {}\r\nplugged memory: 0\r\n", image.len())),
                image: Rc::new(image),
                fail_pmemsave: false,
                write_artifact: true,
                commands: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl ControlChannel for FakeMonitor {
        fn command(&mut self, name: &str, args: Value) -> Result<Map<String, Value>, ChannelError> {
            self.commands.borrow_mut().push(name.to_string());
            let reply = match name {
                "human-monitor-command" => json!({ "return": self.summary }),
                "pmemsave" if self.fail_pmemsave => {
                    json!({ "error": { "class": "GenericError", "desc": "Invalid addr" } })
                }
                "pmemsave" if !self.write_artifact => json!({ "return": {} }),
                "pmemsave" => {
                    let addr = args["val"].as_u64().unwrap() as usize;
                    let size = args["size"].as_u64().unwrap() as usize;
                    let path = args["filename"].as_str().unwrap();
                    let end = (addr + size).min(self.image.len());
                    fs::write(path, &self.image[addr.min(end)..end]).unwrap();
                    json!({ "return": {} })
                }
                _ => json!({ "error": { "class": "CommandNotFound" } }),
            };
            Ok(reply.as_object().unwrap().clone())
        }
    }

    struct FakeConnector(FakeMonitor);

    impl ChannelConnector for FakeConnector {
        fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn ControlChannel>, ChannelError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    fn session_in(dir: &Path, url: Option<&str>) -> Session {
        Session::new(SessionParameters {
            filename: url.map(str::to_string),
            staging_dir: Some(dir.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    fn open_with(monitor: FakeMonitor, dir: &Path) -> (QmpAddressSpace, Session) {
        let mut session = session_in(dir, Some("qmp://localhost:4444"));
        let conn = FakeConnector(monitor);
        let space = QmpAddressSpace::open(None, None, &mut session, Some(&conn)).unwrap();
        (space, session)
    }

    #[test]
    fn parse_url_variants() {
        let ep = parse_url("qmp://LocalHost:4444").unwrap();
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 4444);
        let ep = parse_url("qmp://[::1]:5555/").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 5555);

        assert_eq!(
            parse_url("tcp://localhost:4444"),
            Err(ConfigError::WrongScheme("tcp://localhost:4444".into()))
        );
        assert_eq!(
            parse_url("qmp:///localhost:4444"),
            Err(ConfigError::MissingHost("qmp:///localhost:4444".into()))
        );
        assert_eq!(
            parse_url("qmp://localhost"),
            Err(ConfigError::MissingPort("qmp://localhost".into()))
        );
        assert!(matches!(
            parse_url("qmp://localhost:http"),
            Err(ConfigError::InvalidPort { .. })
        ));
    }

    #[test]
    fn memory_size_pattern() {
        assert_eq!(parse_memory_size("base memory: 134217728\r\n"), Some(134217728));
        assert_eq!(parse_memory_size("plugged memory: 0\r\nbase memory: 1"), None);
        assert_eq!(parse_memory_size("unknown command"), None);
    }

    #[test]
    fn validation_order() {
        let dir = tempfile::tempdir().unwrap();
        let conn = FakeConnector(FakeMonitor::new(vec![0; 16]));

        let mut session = session_in(dir.path(), Some("qmp://localhost:4444"));
        let err = QmpAddressSpace::open(None, None, &mut session, None).unwrap_err();
        assert!(matches!(err, QmpError::Config(ConfigError::BindingUnavailable)));

        let base = crate::address_space::BufferAddressSpace::new("dump", 0, vec![]);
        let err = QmpAddressSpace::open(Some(&base), None, &mut session, Some(&conn)).unwrap_err();
        assert!(matches!(err, QmpError::Config(ConfigError::NotBaseLayer)));

        let mut empty = session_in(dir.path(), None);
        let err = QmpAddressSpace::open(None, None, &mut empty, Some(&conn)).unwrap_err();
        assert!(matches!(err, QmpError::Config(ConfigError::MissingUrl)));

        let err = QmpAddressSpace::open(None, Some("file:///tmp/x"), &mut empty, Some(&conn))
            .unwrap_err();
        assert!(matches!(err, QmpError::Config(ConfigError::WrongScheme(_))));
    }

    #[test]
    fn explicit_url_overrides_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path(), Some("qmp://ignored:1"));
        let conn = FakeConnector(FakeMonitor::new(vec![0; 16]));
        let space =
            QmpAddressSpace::open(None, Some("qmp://vmhost:4444"), &mut session, Some(&conn))
                .unwrap();
        assert_eq!(space.endpoint().host, "vmhost");
        assert_eq!(space.staging_path(), dir.path().join("qmp_vmhost_4444"));
    }

    #[test]
    fn protocol_mismatch_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = FakeMonitor::new(vec![0; 16]);
        monitor.summary = Value::String("Error: unknown command".to_string());
        let mut session = session_in(dir.path(), Some("qmp://localhost:4444"));
        let err = QmpAddressSpace::open(None, None, &mut session, Some(&FakeConnector(monitor)))
            .unwrap_err();
        assert!(matches!(err, QmpError::ProtocolMismatch { .. }));
        assert_eq!(session.flush_hook_count(), 0);
    }

    #[test]
    fn zero_memory_size_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = FakeMonitor::new(vec![]);
        monitor.summary = Value::String("base memory: 0\r\n".to_string());
        let mut session = session_in(dir.path(), Some("qmp://localhost:4444"));
        let err = QmpAddressSpace::open(None, None, &mut session, Some(&FakeConnector(monitor)))
            .unwrap_err();
        assert!(matches!(err, QmpError::ProtocolMismatch { response } if response.starts_with("base memory: 0")));
    }

    struct RefusingConnector;

    impl ChannelConnector for RefusingConnector {
        fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn ControlChannel>, ChannelError> {
            Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }
    }

    #[test]
    fn connect_failure_is_channel_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path(), Some("qmp://localhost:4444"));
        let err = QmpAddressSpace::open(None, None, &mut session, Some(&RefusingConnector))
            .unwrap_err();
        assert!(matches!(err, QmpError::Channel(ChannelError::Io(_))));
        assert_eq!(session.flush_hook_count(), 0);
    }

    #[test]
    fn window_and_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let (space, session) = open_with(FakeMonitor::new(vec![0; 0x1000]), dir.path());
        assert_eq!(space.window(), MemoryWindow::new(0, 0xfff).unwrap());
        assert!(space.is_valid_address(Some(0)));
        assert!(space.is_valid_address(Some(0xfff)));
        assert!(!space.is_valid_address(Some(0x1000)));
        assert!(!space.is_valid_address(None));
        let ranges: Vec<_> = space.get_available_addresses().collect();
        assert_eq!(ranges, vec![(0, 0xfff)]);
        let runs: Vec<_> = space.get_mappings(0, u64::MAX).collect();
        assert_eq!(
            runs,
            vec![Run {
                start: 0,
                end: 0xfff,
                file_offset: 0
            }]
        );
        let narrowed: Vec<_> = space.get_mappings(0x100, 0x1ff).collect();
        assert_eq!(narrowed, runs);
        assert!(space.is_volatile());
        assert!(!space.write(0, &[1]));
        assert_eq!(session.flush_hook_count(), 1);
    }

    #[test]
    fn read_returns_requested_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let image: Vec<u8> = (0..=255u8).cycle().take(0x400).collect();
        let (space, _session) = open_with(FakeMonitor::new(image.clone()), dir.path());
        assert_eq!(space.read(0x10, 8), image[0x10..0x18].to_vec());
        // Short staging file is passed through as-is
        assert_eq!(space.read(0x3fc, 16), image[0x3fc..].to_vec());
        assert!(space.read(0x10, 0).is_empty());
    }

    #[test]
    fn failed_read_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = FakeMonitor::new(vec![0xcc; 64]);
        monitor.fail_pmemsave = true;
        let (space, _session) = open_with(monitor, dir.path());
        assert!(space.read(0, 16).is_empty());
        assert!(matches!(space.try_read(0, 16), Err(ReadError::Command { .. })));
    }

    #[test]
    fn missing_artifact_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = FakeMonitor::new(vec![0xcc; 64]);
        monitor.write_artifact = false;
        let (space, _session) = open_with(monitor, dir.path());
        assert!(space.read(0, 16).is_empty());
        assert!(matches!(space.try_read(0, 16), Err(ReadError::Artifact { .. })));
    }

    #[test]
    fn read_issues_pmemsave_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = FakeMonitor::new(vec![0; 64]);
        let commands = monitor.commands.clone();
        let (space, _session) = open_with(monitor, dir.path());
        space.read(0, 4);
        space.read(4, 4);
        assert_eq!(
            *commands.borrow(),
            vec!["human-monitor-command", "pmemsave", "pmemsave"]
        );
    }

    #[test]
    fn reentrant_read_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (space, _session) = open_with(FakeMonitor::new(vec![0; 64]), dir.path());
        let _held = space.channel.borrow_mut();
        assert!(matches!(space.try_read(0, 4), Err(ReadError::Busy)));
    }
}
