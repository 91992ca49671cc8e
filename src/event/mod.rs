//! The wire types that cross the user↔kernel rings (§3, §6).
//!
//! `Event` and `Response` are fixed-size and directly copyable so the SPSC
//! rings can move them word-by-word with no serialization step. Per-type
//! payload encode/decode helpers live in [`payload`].

pub mod payload;

use crate::config::EVENT_DATA_SIZE;

/// The closed set of operation-tag families (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Memory = 1,
    File = 2,
    TagFile = 3,
    Process = 4,
    Ipc = 5,
    Timer = 6,
    Device = 7,
    Network = 8,
}

impl EventType {
    pub fn from_raw(v: u8) -> Option<Self> {
        Some(match v {
            1 => EventType::Memory,
            2 => EventType::File,
            3 => EventType::TagFile,
            4 => EventType::Process,
            5 => EventType::Ipc,
            6 => EventType::Timer,
            7 => EventType::Device,
            8 => EventType::Network,
            _ => return None,
        })
    }
}

/// A request record produced by user space. `id == 0` marks an
/// unstamped, user-originated event (§3 invariant); the Receiver assigns a
/// non-zero id before anything downstream sees it.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Event {
    pub id: u64,
    pub kind: u8,
    pub user_id: u64,
    pub timestamp: u64,
    pub data_len: u32,
    pub data: [u8; EVENT_DATA_SIZE],
}

impl Event {
    /// Builds an unstamped event as user space would before pushing it onto
    /// the user→kernel ring.
    pub fn new(kind: EventType, user_id: u64, data: &[u8]) -> Self {
        let mut buf = [0u8; EVENT_DATA_SIZE];
        let n = data.len().min(EVENT_DATA_SIZE);
        buf[..n].copy_from_slice(&data[..n]);
        Self {
            id: 0,
            kind: kind as u8,
            user_id,
            timestamp: 0,
            data_len: n as u32,
            data: buf,
        }
    }

    pub fn kind(&self) -> Option<EventType> {
        EventType::from_raw(self.kind)
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.data_len as usize).min(EVENT_DATA_SIZE)]
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: 0,
            kind: 0,
            user_id: 0,
            timestamp: 0,
            data_len: 0,
            data: [0u8; EVENT_DATA_SIZE],
        }
    }
}

/// Completion status for a [`Response`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Processing = 0,
    Success = 1,
    Error = 2,
    Denied = 3,
}

/// A completion record for one event. Emitted at most once per `event_id`
/// (§3 invariant).
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Response {
    pub event_id: u64,
    pub status: ResponseStatus,
    pub error_code: u32,
    pub timestamp: u64,
    pub result_len: u32,
    pub result_truncated: bool,
    pub result: [u8; crate::config::RESULT_INLINE_SIZE],
}

impl Response {
    pub fn new(event_id: u64, status: ResponseStatus, error_code: u32, timestamp: u64) -> Self {
        Self {
            event_id,
            status,
            error_code,
            timestamp,
            result_len: 0,
            result_truncated: false,
            result: [0u8; crate::config::RESULT_INLINE_SIZE],
        }
    }

    pub fn with_result(mut self, bytes: &[u8]) -> Self {
        let cap = self.result.len();
        let n = bytes.len().min(cap);
        self.result[..n].copy_from_slice(&bytes[..n]);
        self.result_len = n as u32;
        self.result_truncated = bytes.len() > cap;
        self
    }

    pub fn result(&self) -> &[u8] {
        &self.result[..(self.result_len as usize).min(self.result.len())]
    }
}
