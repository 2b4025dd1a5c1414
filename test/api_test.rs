use serde_json::{json, Map, Value};
use std::fs;
use vmdis_helper::annotate::Line;
use vmdis_helper::error::ChannelError;
use vmdis_helper::symbols::{Symbol, SymbolType};
use vmdis_helper::transport::{ChannelConnector, ControlChannel, Endpoint};
use vmdis_helper::{
    AddressSpace, CapstoneDecoder, DisassembleOptions, Disassembly, ProcessorMode,
    QmpAddressSpace, Session, SessionParameters, SymbolTable,
};

// push ebp; mov ebp, esp; mov eax, [0x2000]; call 0x1000; pop ebp; ret
const CODE: [u8; 15] = [
    0x55, 0x89, 0xe5, 0xa1, 0x00, 0x20, 0x00, 0x00, 0xe8, 0xf3, 0xff, 0xff, 0xff, 0x5d, 0xc3,
];

/// Monitor stand-in that serves `pmemsave` from a fixed guest image.
#[derive(Clone)]
struct GuestMonitor {
    ram: Vec<u8>,
}

impl ControlChannel for GuestMonitor {
    fn command(&mut self, name: &str, args: Value) -> Result<Map<String, Value>, ChannelError> {
        let reply = match name {
            "human-monitor-command" => {
                json!({ "return": format!("base memory: {}\r\n", self.ram.len()) })
            }
            "pmemsave" => {
                let addr = args["val"].as_u64().unwrap() as usize;
                let size = args["size"].as_u64().unwrap() as usize;
                let end = (addr + size).min(self.ram.len());
                fs::write(args["filename"].as_str().unwrap(), &self.ram[addr.min(end)..end])
                    .unwrap();
                json!({ "return": {} })
            }
            other => json!({ "error": { "class": "CommandNotFound", "desc": other } }),
        };
        Ok(reply.as_object().unwrap().clone())
    }
}

struct GuestConnector(GuestMonitor);

impl ChannelConnector for GuestConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn ControlChannel>, ChannelError> {
        Ok(Box::new(self.0.clone()))
    }
}

fn guest_ram() -> Vec<u8> {
    let mut ram = vec![0x90u8; 0x3000];
    ram[0x1000..0x1000 + CODE.len()].copy_from_slice(&CODE);
    ram[0x2000..0x2004].copy_from_slice(&0x1000u32.to_le_bytes());
    ram
}

fn symbols() -> SymbolTable {
    let mut table = SymbolTable::new();
    table.insert(Symbol::new("func_entry", 0x1000, SymbolType::Function));
    table.insert(Symbol::new("data_base", 0x2000, SymbolType::Data));
    table
}

#[test]
fn test_live_disassembly_with_resume() {
    let staging = tempfile::tempdir().unwrap();
    let mut session = Session::new(SessionParameters {
        filename: Some("qmp://localhost:4444".to_string()),
        staging_dir: Some(staging.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();

    // 1. Open the live target
    let connector = GuestConnector(GuestMonitor { ram: guest_ram() });
    let space = QmpAddressSpace::open(None, None, &mut session, Some(&connector))
        .expect("Failed to open QMP target");
    assert!(space.is_valid_address(Some(0x2fff)));
    assert!(!space.is_valid_address(Some(0x3000)));
    assert_eq!(space.read(0x2000, 4), vec![0x00, 0x10, 0x00, 0x00]);

    // 2. Disassemble three instructions, then continue from where we stopped
    let decoder = CapstoneDecoder::new(ProcessorMode::Bits32).unwrap();
    let table = symbols();
    let dis = Disassembly::new(&space, &decoder, &table);
    let opts = DisassembleOptions {
        offset: Some(0x1000),
        length: Some(3),
        ..Default::default()
    };
    let first = dis.run(&mut session, &opts);
    assert_eq!(first.lines[0], Line::Header("func_entry".to_string()));
    let rows: Vec<_> = first.rows().collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].instruction, "push ebp");
    assert_eq!(rows[0].relative_offset.as_deref(), Some("0"));
    assert_eq!(rows[1].hexdump, "89e5");
    assert_eq!(rows[2].address, 0x1003);
    assert_eq!(rows[2].relative_offset.as_deref(), Some("3"));
    assert_eq!(rows[2].comment, "0x1000 data_base -> func_entry");
    assert_eq!(first.next_offset, 0x1008);

    let second = dis.run(
        &mut session,
        &DisassembleOptions {
            offset: None,
            ..opts
        },
    );
    let rows: Vec<_> = second.rows().collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].address, 0x1008);
    assert_eq!(rows[0].instruction, "call 0x1000");
    assert_eq!(rows[0].comment, "func_entry");
    assert_eq!(rows[2].instruction, "ret");
    assert_eq!(second.next_offset, 0x100f);

    // 3. Teardown runs the hook registered by the address space
    assert_eq!(session.flush_hook_count(), 1);
    session.flush();
    assert_eq!(session.flush_hook_count(), 0);
    assert_eq!(session.resume.next_offset, None);
}

#[test]
fn test_session_config_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(&path, r#"{ "filename": "qmp://vm:4444", "buffer_size": 512 }"#).unwrap();

    let params = SessionParameters::from_json_file(&path).unwrap();
    assert_eq!(params.filename.as_deref(), Some("qmp://vm:4444"));
    assert_eq!(params.buffer_size, 512);
    assert_eq!(params.arch, "I386");

    let bad = SessionParameters {
        buffer_size: 0,
        ..params
    };
    assert!(Session::new(bad).is_err());
}
