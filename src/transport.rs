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

use crate::error::ChannelError;
use log::{debug, trace};
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Host and port of a hypervisor monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Command/response connection to a hypervisor monitor.
pub trait ControlChannel {
    /// Execute `name` with `arguments` and return the whole reply object.
    /// A reply carrying `error` is still `Ok`; callers decide what failure means.
    fn command(&mut self, name: &str, arguments: Value) -> Result<Map<String, Value>, ChannelError>;
}

/// Opens control channels. This is the protocol "binding" a QMP address space needs.
pub trait ChannelConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn ControlChannel>, ChannelError>;
}

/// The connector compiled into this build, if any.
pub fn default_connector(io_timeout: Duration) -> Option<Box<dyn ChannelConnector>> {
    if cfg!(feature = "qmp-tcp") {
        Some(Box::new(TcpConnector { io_timeout }))
    } else {
        None
    }
}

pub struct TcpConnector {
    pub io_timeout: Duration,
}

impl ChannelConnector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn ControlChannel>, ChannelError> {
        let client = QmpTcpClient::connect(endpoint, self.io_timeout)?;
        Ok(Box::new(client))
    }
}

// QMP over TCP: one JSON object per line in each direction.
pub struct QmpTcpClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl QmpTcpClient {
    /// Connects, consumes the greeting and leaves capabilities negotiation mode.
    pub fn connect(endpoint: &Endpoint, io_timeout: Duration) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        let mut client = Self { reader, writer };

        let greeting = client.read_message()?;
        if greeting.get("QMP").is_none() {
            return Err(ChannelError::Greeting(greeting.to_string()));
        }
        debug!("QMP greeting from {}: {}", endpoint, greeting);

        let reply = client.command("qmp_capabilities", json!({}))?;
        if let Some(err) = reply.get("error") {
            return Err(ChannelError::Command {
                command: "qmp_capabilities".to_string(),
                message: err.to_string(),
            });
        }
        Ok(client)
    }

    fn read_message(&mut self) -> Result<Value, ChannelError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Err(ChannelError::Closed);
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    fn write_message(&mut self, msg: &Value) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(msg)?;
        self.writer.write_all(&body)?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl ControlChannel for QmpTcpClient {
    fn command(&mut self, name: &str, arguments: Value) -> Result<Map<String, Value>, ChannelError> {
        let msg = if arguments.as_object().is_some_and(|a| !a.is_empty()) {
            json!({ "execute": name, "arguments": arguments })
        } else {
            json!({ "execute": name })
        };
        trace!("QMP -> {}", msg);
        self.write_message(&msg)?;
        loop {
            let reply = self.read_message()?;
            trace!("QMP <- {}", reply);
            let Value::Object(map) = reply else {
                continue;
            };
            // Asynchronous events can arrive between a command and its reply
            if map.contains_key("event") {
                continue;
            }
            if map.contains_key("return") || map.contains_key("error") {
                return Ok(map);
            }
        }
    }
}
