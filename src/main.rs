//! Freestanding entry point.
//!
//! Bring-up (GDT/IDT, paging, the jump out of whatever bootloader handed
//! control here) is out of scope (`SPEC_FULL.md` §1) — by the time `_start`
//! runs, long mode and the heap's backing pages are assumed already mapped.
//! What belongs to this crate is everything after: wire up the serial
//! logger, carve out the kernel heap, build a [`ringdeck::System`], and
//! drive it forever.
//! The panic and alloc-error handlers live in `ringdeck::lib` (compiled into
//! this binary via the `ringdeck` rlib) — a `#[panic_handler]` here too would
//! be a duplicate lang item at link time.
#![no_main]
#![no_std]

use ringdeck::config::KernelConfig;
use ringdeck::log::{self, LevelFilter};
use ringdeck::mem::heap;
use ringdeck::System;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    ringdeck::arch::serial::init();
    log::init(LevelFilter::Info);
    // Safety: the loader maps [heap::HEAP_START, HEAP_START + HEAP_SIZE)
    // RW before transferring control here; see the module's own doc comment.
    unsafe {
        heap::init();
    }

    log::info!("ringdeck: core up, building System");
    let system = System::new(&KernelConfig::default());

    loop {
        if !system.step() {
            core::hint::spin_loop();
        }
    }
}
