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

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, warn};
use serde_json::json;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use vmdis_helper::address_space::{AddressSpace, BufferAddressSpace};
use vmdis_helper::capstone::{CapstoneDecoder, ProcessorMode};
use vmdis_helper::debug::init_logging;
use vmdis_helper::disassemble::{DisassembleOptions, Disassembly};
use vmdis_helper::qmp::QmpAddressSpace;
use vmdis_helper::render::{serialize_compact_lines, TextRenderer};
use vmdis_helper::session::{Session, SessionParameters};
use vmdis_helper::symbols::{NoSymbols, Resolver, SymbolTable};
use vmdis_helper::transport::default_connector;
use vmdis_helper::utils::{canonicalize_path, parse_number};

#[derive(Parser, Debug)]
#[command(version, about = "Disassemble live QEMU guest memory over QMP", long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short = 'd', long = "debug", global = true, default_value_t = false)]
    debug: bool,

    /// Write logs to files in this directory (warnings still go to stderr)
    #[arg(long = "log-dir", global = true)]
    log_dir: Option<PathBuf>,

    /// Session parameters as JSON
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disassemble code
    Dis(DisArgs),
    /// Show the memory window of a QMP target
    Info(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Monitor URL, e.g. qmp://localhost:4444
    #[arg(long = "url")]
    url: Option<String>,
}

#[derive(Args, Debug)]
struct DisArgs {
    /// Start address or symbol (`name`, `name+0x10`); continues from the previous run when omitted
    offset: Option<String>,

    #[command(flatten)]
    target: TargetArgs,

    /// Raw memory image to disassemble instead of a live target
    #[arg(long = "image", conflicts_with = "url")]
    image: Option<String>,

    /// Load address of --image
    #[arg(long = "base", value_parser = parse_number, default_value = "0")]
    base: u64,

    /// Number of instructions to disassemble
    #[arg(short = 'l', long = "length", value_parser = parse_count)]
    length: Option<usize>,

    /// Last address to disassemble
    #[arg(short = 'e', long = "end", value_parser = parse_number)]
    end: Option<u64>,

    /// Processor mode (I386 or AMD64)
    #[arg(long = "mode")]
    mode: Option<ProcessorMode>,

    /// Bytes fetched per read
    #[arg(long = "buffer-size", value_parser = parse_count)]
    buffer_size: Option<usize>,

    /// ELF/PE/Mach-O file providing symbols
    #[arg(long = "symbols")]
    symbols: Option<String>,

    /// Emit compact JSON instead of a table
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    /// Run this many times, each continuing where the previous stopped
    #[arg(long = "repeat", default_value_t = 1)]
    repeat: usize,

    #[arg(long = "suppress-headers", default_value_t = false)]
    suppress_headers: bool,
}

fn parse_count(input: &str) -> Result<usize, String> {
    let n = parse_number(input)?;
    usize::try_from(n).map_err(|e| format!("{}: {}", input, e))
}

/// A number, else a symbol name with optional `+offset`.
fn resolve_offset(text: &str, table: Option<&SymbolTable>) -> Result<u64> {
    if let Ok(n) = parse_number(text) {
        return Ok(n);
    }
    table
        .and_then(|t| t.lookup_address(text))
        .ok_or_else(|| anyhow!("{:?} is neither an address nor a known symbol", text))
}

fn load_params(cli: &Cli) -> Result<SessionParameters> {
    match &cli.config {
        Some(path) => SessionParameters::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SessionParameters::default()),
    }
}

fn open_target(
    session: &mut Session,
    target: &TargetArgs,
    image: Option<&str>,
    base: u64,
) -> Result<Box<dyn AddressSpace>> {
    if let Some(image) = image {
        let path = canonicalize_path(image);
        let data =
            fs::read(&path).with_context(|| format!("Failed to read image {}", path.display()))?;
        debug!("Loaded {} bytes from {}", data.len(), path.display());
        return Ok(Box::new(BufferAddressSpace::new(
            path.display().to_string(),
            base,
            data,
        )));
    }
    let connector = default_connector(session.params().io_timeout());
    let space = QmpAddressSpace::open(None, target.url.as_deref(), session, connector.as_deref())?;
    Ok(Box::new(space))
}

fn run_dis(cli: &Cli, args: &DisArgs) -> Result<()> {
    let mut params = load_params(cli)?;
    if let Some(size) = args.buffer_size {
        params.buffer_size = size;
    }
    if let Some(mode) = args.mode {
        params.arch = match mode {
            ProcessorMode::Bits32 => "I386".to_string(),
            ProcessorMode::Bits64 => "AMD64".to_string(),
        };
    }
    let mut session = Session::new(params)?;

    let space = open_target(&mut session, &args.target, args.image.as_deref(), args.base)?;
    let table = match &args.symbols {
        Some(file) => {
            let table = SymbolTable::load(&canonicalize_path(file))?;
            if table.is_empty() {
                warn!("No code or data symbols in {}", file);
            }
            Some(table)
        }
        None => None,
    };
    let resolver: &dyn Resolver = match &table {
        Some(t) => t,
        None => &NoSymbols,
    };
    let offset = args
        .offset
        .as_deref()
        .map(|text| resolve_offset(text, table.as_ref()))
        .transpose()?;

    let mut opts = DisassembleOptions {
        offset,
        end: args.end,
        suppress_headers: args.suppress_headers,
        ..Default::default()
    };
    if args.length.is_some() {
        opts.length = args.length;
    } else if args.end.is_some() {
        // An explicit end bound replaces the default instruction count
        opts.length = None;
    }
    let mode = opts.mode(&session);
    let decoder = CapstoneDecoder::new(mode).map_err(|e| anyhow!("capstone: {}", e))?;
    let dis = Disassembly::new(space.as_ref(), &decoder, resolver);

    let stdout = io::stdout();
    for pass in 0..args.repeat.max(1) {
        if pass > 0 {
            opts.offset = None;
        }
        if args.json {
            let listing = dis.run(&mut session, &opts);
            let msg = serialize_compact_lines(&listing.lines, listing.next_offset);
            writeln!(stdout.lock(), "{}", msg)?;
            continue;
        }
        let mut renderer = TextRenderer::new(stdout.lock(), mode);
        renderer.table_header()?;
        let mut result = Ok(());
        dis.run_into(&mut session, &opts, |line| {
            if result.is_ok() {
                result = renderer.line(&line);
            }
        });
        result?;
        renderer.flush()?;
    }

    session.flush();
    Ok(())
}

fn run_info(cli: &Cli, target: &TargetArgs) -> Result<()> {
    let mut session = Session::new(load_params(cli)?)?;
    let connector = default_connector(session.params().io_timeout());
    let space = QmpAddressSpace::open(None, target.url.as_deref(), &mut session, connector.as_deref())?;
    let window = space.window();

    let ranges: Vec<_> = space
        .get_available_addresses()
        .map(|(start, end)| json!({ "start": format!("0x{:x}", start), "end": format!("0x{:x}", end) }))
        .collect();
    let runs: Vec<_> = space
        .get_mappings(window.min_addr, window.max_addr)
        .map(|r| r.to_json())
        .collect();
    let msg = json!({
        "name": space.name(),
        "staging": space.staging_path().display().to_string(),
        "window": window.to_json(),
        "ranges": ranges,
        "mappings": runs,
    });
    println!("{}", serde_json::to_string_pretty(&msg)?);

    space.close();
    session.flush();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.debug, cli.log_dir.as_deref())?;

    match &cli.command {
        Command::Dis(args) => run_dis(&cli, args),
        Command::Info(target) => run_info(&cli, target),
    }
}
