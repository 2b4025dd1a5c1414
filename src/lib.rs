// Crate root: declare modules and control visibility
pub mod address_space;
pub mod annotate;
pub mod capstone;
pub mod debug;
pub mod disassemble;
pub mod error;
pub mod qmp;
pub mod render;
pub mod session;
pub mod stream;
pub mod symbols;
pub mod transport;
pub mod utils;

// Re-export commonly used API from the library for binaries/tests
pub use address_space::{AddressSpace, BufferAddressSpace, MemoryWindow, Run};
pub use annotate::{AnnotatedRow, Annotator, Line};
pub use capstone::{CapstoneDecoder, DecodedInstruction, Decoder, ProcessorMode};
pub use disassemble::{DisassembleOptions, Disassembly, Listing};
pub use qmp::QmpAddressSpace;
pub use session::{Session, SessionParameters};
pub use symbols::{NoSymbols, Resolver, SymbolTable};
pub use utils::canonicalize_path;
