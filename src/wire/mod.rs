//! Wire framing and transport fault handling
//!
//! Shared by the attach handshake, the breakpoint command loop and the
//! coordinator IPC socket.

pub mod codec;
pub mod fault;

pub use codec::{
    read_bool, read_exact, read_frame, read_string, read_u32, write_bool, write_frame, write_raw,
    write_string, write_u32,
};
pub use fault::{EscapePoint, Fault, FaultHandler, Invalidate};
