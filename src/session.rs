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

//! Session-scoped state: tunable parameters, teardown hooks and the resume
//! point for repeated disassembly.

use crate::error::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_buffer_size() -> usize {
    4096
}

fn default_arch() -> String {
    "I386".to_string()
}

fn default_io_timeout_ms() -> u64 {
    5000
}

/// Parameters normally supplied by the host session. Loadable from a JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionParameters {
    /// Connection string, e.g. "qmp://localhost:4444".
    #[serde(default)]
    pub filename: Option<String>,
    /// Bytes fetched per read while decoding.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Profile architecture. "I386" selects 32-bit decoding, anything else 64-bit.
    #[serde(default = "default_arch")]
    pub arch: String,
    /// Directory for pmemsave staging files. Defaults to the OS temp dir.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            filename: None,
            buffer_size: default_buffer_size(),
            arch: default_arch(),
            staging_dir: None,
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl SessionParameters {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "buffer_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Where the next disassembly without an explicit start address begins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeState {
    pub next_offset: Option<u64>,
}

type FlushHook = Box<dyn FnMut()>;

pub struct Session {
    params: SessionParameters,
    flush_hooks: Vec<(String, FlushHook)>,
    pub resume: ResumeState,
}

impl Session {
    pub fn new(params: SessionParameters) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            params,
            flush_hooks: Vec::new(),
            resume: ResumeState::default(),
        })
    }

    pub fn params(&self) -> &SessionParameters {
        &self.params
    }

    pub fn get_filename(&self) -> Option<&str> {
        self.params.filename.as_deref()
    }

    pub fn buffer_size(&self) -> usize {
        self.params.buffer_size
    }

    pub fn arch(&self) -> &str {
        &self.params.arch
    }

    /// Register a teardown hook run on the next `flush`.
    pub fn register_flush_hook(&mut self, owner: impl Into<String>, hook: impl FnMut() + 'static) {
        self.flush_hooks.push((owner.into(), Box::new(hook)));
    }

    pub fn flush_hook_count(&self) -> usize {
        self.flush_hooks.len()
    }

    /// Run and drop every registered hook. Flushing twice is harmless.
    pub fn flush(&mut self) {
        for (owner, mut hook) in self.flush_hooks.drain(..) {
            debug!("Running flush hook for {}", owner);
            hook();
        }
        self.resume = ResumeState::default();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn parameters_defaults_from_json() {
        let p: SessionParameters = serde_json::from_str(r#"{"filename": "qmp://h:1"}"#).unwrap();
        assert_eq!(p.filename.as_deref(), Some("qmp://h:1"));
        assert_eq!(p.buffer_size, 4096);
        assert_eq!(p.arch, "I386");
        assert_eq!(p.io_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_buffer_size_rejected() {
        let p = SessionParameters {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Session::new(p),
            Err(ConfigError::InvalidParameter { name: "buffer_size", .. })
        ));
    }

    #[test]
    fn flush_runs_hooks_once() {
        let calls = Rc::new(Cell::new(0));
        let mut session = Session::new(SessionParameters::default()).unwrap();
        let c = calls.clone();
        session.register_flush_hook("test", move || c.set(c.get() + 1));
        session.resume.next_offset = Some(0x1000);

        session.flush();
        session.flush();
        assert_eq!(calls.get(), 1);
        assert_eq!(session.flush_hook_count(), 0);
        assert_eq!(session.resume.next_offset, None);
    }
}
