//! Architecture interfaces the core consumes.
//!
//! Boot, GDT/IDT, PIT/PIC, ATA and the rest of the freestanding x86-64
//! bring-up are out of scope for this crate (see `SPEC_FULL.md` §1); this
//! module only names the two things the event core actually calls through:
//! a monotonic time source and a byte sink for the logger.

pub mod serial;
pub mod time;

pub use time::{now_tsc, TimeSource};
