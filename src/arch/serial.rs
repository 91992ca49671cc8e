//! 16550 serial port driver (COM1), used only as the freestanding logger's
//! [`crate::log::LogSink`]. Grounded on the teacher's `arch::x86_64::serial`.

#![cfg(not(test))]

use core::fmt;
use spin::Mutex;
use x86_64::instructions::port::Port;

pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    /// # Safety
    /// `base` must be a valid, owned serial port base address (COM1 = 0x3F8).
    pub const unsafe fn new(base: u16) -> Self {
        SerialPort {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    pub fn init(&mut self) {
        unsafe {
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x80);
            self.data.write(0x03);
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x0B);
            self.int_enable.write(0x01);
        }
    }

    fn is_transmit_empty(&mut self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    pub fn send(&mut self, data: u8) {
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe {
            self.data.write(data);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.send(b);
        }
        Ok(())
    }
}

static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Initializes COM1. Safe to call once during boot.
pub fn init() {
    let mut port = unsafe { SerialPort::new(0x3F8) };
    port.init();
    *SERIAL1.lock() = Some(port);
}

/// Guard exposing `fmt::Write` over the global serial port. Lazily
/// initializes COM1 on first use so early log lines before `init()` aren't
/// silently dropped.
pub fn writer() -> impl fmt::Write {
    struct Writer;
    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut guard = SERIAL1.lock();
            if guard.is_none() {
                let mut port = unsafe { SerialPort::new(0x3F8) };
                port.init();
                *guard = Some(port);
            }
            guard.as_mut().unwrap().write_str(s)
        }
    }
    Writer
}
