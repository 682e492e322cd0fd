//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! socket reads
//!     → decoder.rs (reassemble frames, phase-typed decode)
//!     → messages.rs (structured negotiation messages)
//!     → frame.rs (header layout, codes, error numbers)
//!
//! Outbound:
//!     messages.rs encoders produce complete frames
//!     → written to the socket verbatim
//! ```
//!
//! # Design Decisions
//! - Only the three negotiation messages are structured; everything else
//!   stays an opaque frame
//! - The decode phase is owned by the leg and passed into each call

pub mod decoder;
pub mod frame;
pub mod messages;

pub use decoder::{ClientFrame, FrameDecoder, FramingError, Phase, PoolFrame, RequestError};
