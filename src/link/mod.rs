//! Mission-link protocol layer.
//!
//! A framed request/response protocol over a byte-oriented serial channel to
//! the mission-management controller. The layer issues transmit requests for
//! top-ranked records, resolves them to confirmed/rejected/abandoned, emits
//! heartbeats while idle, and surfaces controller-initiated commands. It
//! drives the confirm-then-reclaim lifecycle: a record's space is only
//! reclaimed after the controller has acknowledged receipt.

mod channel;
mod errors;
mod frame;
mod session;

pub use channel::{MemChannel, SerialChannel};
pub use errors::LinkError;
pub use frame::{
    DecodedItem, Frame, FrameDecoder, NackReason, Opcode, FRAME_START, MAX_FRAME_LEN,
};
pub use session::{ControllerCommand, LinkEvent, LinkOptions, LinkSession, TransmitHandle};
