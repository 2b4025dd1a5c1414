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

//! Error types shared across the helper.
//!
//! Configuration and protocol errors are fatal and surface from constructors.
//! `ReadError` never leaves `AddressSpace::read`; it only exists so the cause
//! of an empty read can be logged.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A precondition for opening a memory source was not met.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the QMP protocol binding is not available in this build")]
    BindingUnavailable,
    #[error("QMP address space must be the first (base) address space")]
    NotBaseLayer,
    #[error("filename must be specified in session (e.g. filename = \"qmp://hostname:port\")")]
    MissingUrl,
    #[error("URL scheme must be qmp://, got {0:?}")]
    WrongScheme(String),
    #[error("no hostname specified in {0:?}")]
    MissingHost(String),
    #[error("no port specified in {0:?}")]
    MissingPort(String),
    #[error("invalid port {port:?} in {url:?}")]
    InvalidPort { url: String, port: String },
    #[error("invalid session parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Failures of the control channel itself.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error on control channel: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message on control channel: {0}")]
    Json(#[from] serde_json::Error),
    #[error("control channel closed by peer")]
    Closed,
    #[error("unexpected greeting from monitor: {0}")]
    Greeting(String),
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },
}

/// Fatal errors when opening a QMP address space.
#[derive(Debug, Error)]
pub enum QmpError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to talk to QMP monitor: {0}")]
    Channel(#[from] ChannelError),
    #[error("unexpected memory size response from monitor: {response:?}")]
    ProtocolMismatch { response: String },
}

/// Why a single read produced no data. Logged, never returned to callers of `read`.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("pmemsave of {size:#x} bytes at {addr:#x} failed: {reason}")]
    Command { addr: u64, size: u64, reason: String },
    #[error("staging file {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("another read is already in flight on this endpoint")]
    Busy,
}

/// Failure to load a symbol table from disk.
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: object::Error,
    },
}
