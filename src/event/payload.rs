//! Per-type payload encodings (§6). All fields are little-endian,
//! byte-addressed, and packed with no padding — this is the wire format
//! user space and the kernel agree on, so it is hand-rolled rather than
//! derived, the way the teacher's `syscall` module hand-decodes raw
//! register/byte arguments.

use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    TooShort,
    PathNotNulTerminated,
    PathTooLong,
}

fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}
fn read_u64(buf: &[u8], off: usize) -> Option<u64> {
    buf.get(off..off + 8).map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

/// Every event family has more than one operation (§6), so `data[0]` is a
/// one-byte operation selector and `data[1..]` is the operation's own body,
/// encoded/decoded by the per-struct helpers below. `encode_op`/`split_op`
/// glue the two together; this is the one place the op-byte convention is
/// spelled out.
pub fn encode_op(op: u8, body: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(1 + body.len());
    v.push(op);
    v.extend_from_slice(body);
    v
}

pub fn split_op(buf: &[u8]) -> Option<(u8, &[u8])> {
    buf.split_first().map(|(op, rest)| (*op, rest))
}

macro_rules! op_enum {
    ($name:ident { $($variant:ident = $val:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $val),+
        }
        impl $name {
            pub fn from_raw(v: u8) -> Option<Self> {
                Some(match v {
                    $($val => Self::$variant,)+
                    _ => return None,
                })
            }
        }
    };
}

op_enum!(MemoryOp { Alloc = 0, Free = 1, Map = 2 });
op_enum!(FileOp {
    Open = 0,
    Close = 1,
    Read = 2,
    Write = 3,
    Stat = 4,
    CreateTagged = 5,
    Query = 6,
    TagAdd = 7,
    TagRemove = 8,
    TagGet = 9,
});
op_enum!(ProcessOp { Create = 0, Exit = 1, Kill = 2, Wait = 3, GetPid = 4, Signal = 5 });
op_enum!(IpcOp { Send = 0, Recv = 1, ShmCreate = 2, ShmAttach = 3, PipeCreate = 4 });
op_enum!(TimerOp { Create = 0, Cancel = 1, Sleep = 2, GetTicks = 3 });
op_enum!(DeviceOp { Open = 0, Ioctl = 1, Read = 2, Write = 3 });
op_enum!(NetworkOp { Socket = 0, Connect = 1, Send = 2, Recv = 3 });

pub struct MemoryAlloc {
    pub size: u64,
}
impl MemoryAlloc {
    pub fn encode(size: u64) -> Vec<u8> {
        size.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { size: read_u64(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

pub struct FileOpen<'a> {
    pub path: &'a str,
}
impl<'a> FileOpen<'a> {
    pub fn encode(path: &str) -> Vec<u8> {
        let mut v = Vec::with_capacity(path.len() + 1);
        v.extend_from_slice(path.as_bytes());
        v.push(0);
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let nul = buf.iter().position(|&b| b == 0).ok_or(DecodeError::PathNotNulTerminated)?;
        let path = core::str::from_utf8(&buf[..nul]).map_err(|_| DecodeError::PathTooLong)?;
        Ok(Self { path })
    }
}

pub struct MemoryFree {
    pub address: u64,
}
impl MemoryFree {
    pub fn encode(address: u64) -> Vec<u8> {
        address.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { address: read_u64(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

/// `MemoryOp::Map` body: `space` names the address space handed to
/// [`crate::mem::PageMapper`] (the `page_table` field of a `Task`).
pub struct MemoryMap {
    pub space: u64,
    pub virt_addr: u64,
    pub frame_addr: u64,
}
impl MemoryMap {
    pub fn encode(space: u64, virt_addr: u64, frame_addr: u64) -> Vec<u8> {
        let mut v = Vec::with_capacity(24);
        v.extend_from_slice(&space.to_le_bytes());
        v.extend_from_slice(&virt_addr.to_le_bytes());
        v.extend_from_slice(&frame_addr.to_le_bytes());
        v
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let space = read_u64(buf, 0).ok_or(DecodeError::TooShort)?;
        let virt_addr = read_u64(buf, 8).ok_or(DecodeError::TooShort)?;
        let frame_addr = read_u64(buf, 16).ok_or(DecodeError::TooShort)?;
        Ok(Self { space, virt_addr, frame_addr })
    }
}

pub struct FileRead {
    pub fd: i32,
    pub size: u64,
}
impl FileRead {
    pub fn encode(fd: i32, size: u64) -> Vec<u8> {
        let mut v = Vec::with_capacity(12);
        v.extend_from_slice(&fd.to_le_bytes());
        v.extend_from_slice(&size.to_le_bytes());
        v
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let fd = i32::from_le_bytes(buf.get(0..4).ok_or(DecodeError::TooShort)?.try_into().unwrap());
        let size = read_u64(buf, 4).ok_or(DecodeError::TooShort)?;
        Ok(Self { fd, size })
    }
}

pub struct FileWrite<'a> {
    pub fd: i32,
    pub size: u64,
    pub bytes: &'a [u8],
}
impl<'a> FileWrite<'a> {
    pub fn encode(fd: i32, bytes: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(12 + bytes.len());
        v.extend_from_slice(&fd.to_le_bytes());
        v.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        v.extend_from_slice(bytes);
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let fd = i32::from_le_bytes(buf.get(0..4).ok_or(DecodeError::TooShort)?.try_into().unwrap());
        let size = read_u64(buf, 4).ok_or(DecodeError::TooShort)?;
        let bytes = buf.get(12..12 + size as usize).ok_or(DecodeError::TooShort)?;
        Ok(Self { fd, size, bytes })
    }
}

pub struct ProcCreate<'a> {
    pub name: &'a str,
    pub entry_address: u64,
    pub energy: u8,
}
impl<'a> ProcCreate<'a> {
    pub fn encode(name: &str, entry_address: u64, energy: u8) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + name.len() + 9);
        v.extend_from_slice(&(name.len() as u32).to_le_bytes());
        v.extend_from_slice(name.as_bytes());
        v.extend_from_slice(&entry_address.to_le_bytes());
        v.push(energy);
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let name_len = read_u32(buf, 0).ok_or(DecodeError::TooShort)? as usize;
        let name_bytes = buf.get(4..4 + name_len).ok_or(DecodeError::TooShort)?;
        let name = core::str::from_utf8(name_bytes).map_err(|_| DecodeError::PathTooLong)?;
        let entry_off = 4 + name_len;
        let entry_address = read_u64(buf, entry_off).ok_or(DecodeError::TooShort)?;
        let energy = *buf.get(entry_off + 8).ok_or(DecodeError::TooShort)?;
        Ok(Self { name, entry_address, energy })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalOp {
    Pause = 0,
    Resume = 1,
    Boost = 2,
    Throttle = 3,
    Wake = 4,
}
impl SignalOp {
    pub fn from_raw(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Pause,
            1 => Self::Resume,
            2 => Self::Boost,
            3 => Self::Throttle,
            4 => Self::Wake,
            _ => return None,
        })
    }
}

pub struct ProcSignal {
    pub task_id: u64,
    pub op: SignalOp,
    pub value: u32,
}
impl ProcSignal {
    pub fn encode(task_id: u64, op: SignalOp, value: u32) -> Vec<u8> {
        let mut v = Vec::with_capacity(16);
        v.extend_from_slice(&task_id.to_le_bytes());
        v.extend_from_slice(&(op as u32).to_le_bytes());
        v.extend_from_slice(&value.to_le_bytes());
        v
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let task_id = read_u64(buf, 0).ok_or(DecodeError::TooShort)?;
        let op_raw = read_u32(buf, 8).ok_or(DecodeError::TooShort)?;
        let op = SignalOp::from_raw(op_raw).ok_or(DecodeError::TooShort)?;
        let value = read_u32(buf, 12).ok_or(DecodeError::TooShort)?;
        Ok(Self { task_id, op, value })
    }
}

/// `ProcessOp::Exit`/`Kill` body: the target task. `Exit` targets the
/// caller's own task (`event.user_id` doubles as the acting task id — see
/// the repository's open-question resolution); `Kill` names another task.
pub struct TaskIdPayload {
    pub task_id: u64,
}
impl TaskIdPayload {
    pub fn encode(task_id: u64) -> Vec<u8> {
        task_id.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { task_id: read_u64(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

/// `ProcessOp::Wait` body: how long (in TSC-unit ticks) the caller's task
/// sleeps before rejoining the run queue.
pub struct ProcWait {
    pub duration_ticks: u64,
}
impl ProcWait {
    pub fn encode(duration_ticks: u64) -> Vec<u8> {
        duration_ticks.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { duration_ticks: read_u64(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

pub struct TimerCreate {
    pub delay_ms: u64,
    pub interval_ms: u64,
}
impl TimerCreate {
    pub fn encode(delay_ms: u64, interval_ms: u64) -> Vec<u8> {
        let mut v = Vec::with_capacity(16);
        v.extend_from_slice(&delay_ms.to_le_bytes());
        v.extend_from_slice(&interval_ms.to_le_bytes());
        v
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let delay_ms = read_u64(buf, 0).ok_or(DecodeError::TooShort)?;
        let interval_ms = read_u64(buf, 8).ok_or(DecodeError::TooShort)?;
        Ok(Self { delay_ms, interval_ms })
    }
}

/// `TimerOp::Cancel` body: the timer id returned by `TimerOp::Create`.
pub struct TimerId {
    pub timer_id: u32,
}
impl TimerId {
    pub fn encode(timer_id: u32) -> Vec<u8> {
        timer_id.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { timer_id: read_u32(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

/// `TimerOp::Sleep` body: a task-sleep request routed through the Hardware
/// deck's timer table rather than Operations (§6 lists `sleep` under the
/// `timer` family).
pub struct TimerSleep {
    pub delay_ticks: u64,
}
impl TimerSleep {
    pub fn encode(delay_ticks: u64) -> Vec<u8> {
        delay_ticks.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { delay_ticks: read_u64(buf, 0).ok_or(DecodeError::TooShort)? })
    }
}

pub(crate) fn encode_tag(v: &mut Vec<u8>, key: &str, value: &str) {
    v.extend_from_slice(&(key.len() as u32).to_le_bytes());
    v.extend_from_slice(key.as_bytes());
    v.extend_from_slice(&(value.len() as u32).to_le_bytes());
    v.extend_from_slice(value.as_bytes());
}

fn decode_tag<'a>(buf: &'a [u8], off: &mut usize) -> Result<(&'a str, &'a str), DecodeError> {
    let key_len = read_u32(buf, *off).ok_or(DecodeError::TooShort)? as usize;
    *off += 4;
    let key = core::str::from_utf8(buf.get(*off..*off + key_len).ok_or(DecodeError::TooShort)?)
        .map_err(|_| DecodeError::PathTooLong)?;
    *off += key_len;
    let value_len = read_u32(buf, *off).ok_or(DecodeError::TooShort)? as usize;
    *off += 4;
    let value = core::str::from_utf8(buf.get(*off..*off + value_len).ok_or(DecodeError::TooShort)?)
        .map_err(|_| DecodeError::PathTooLong)?;
    *off += value_len;
    Ok((key, value))
}

/// `FileOp::CreateTagged` body: a path plus its initial tag set (§4.10).
pub struct FileCreateTagged<'a> {
    pub path: &'a str,
    pub tags: Vec<(&'a str, &'a str)>,
}
impl<'a> FileCreateTagged<'a> {
    pub fn encode(path: &str, tags: &[(&str, &str)]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&(path.len() as u32).to_le_bytes());
        v.extend_from_slice(path.as_bytes());
        v.extend_from_slice(&(tags.len() as u32).to_le_bytes());
        for (key, value) in tags {
            encode_tag(&mut v, key, value);
        }
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let path_len = read_u32(buf, 0).ok_or(DecodeError::TooShort)? as usize;
        let path = core::str::from_utf8(buf.get(4..4 + path_len).ok_or(DecodeError::TooShort)?)
            .map_err(|_| DecodeError::PathTooLong)?;
        let mut off = 4 + path_len;
        let count = read_u32(buf, off).ok_or(DecodeError::TooShort)? as usize;
        off += 4;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            tags.push(decode_tag(buf, &mut off)?);
        }
        Ok(Self { path, tags })
    }
}

/// Query combinator matching [`crate::tagfs::tag::TagIndex`]'s `query_and`/
/// `query_or`/`query_not`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryMode {
    And = 0,
    Or = 1,
    Not = 2,
}
impl QueryMode {
    pub fn from_raw(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::And,
            1 => Self::Or,
            2 => Self::Not,
            _ => return None,
        })
    }
}

/// `FileOp::Query` body: a combinator plus the tag set to match against.
pub struct FileQuery<'a> {
    pub mode: QueryMode,
    pub tags: Vec<(&'a str, &'a str)>,
}
impl<'a> FileQuery<'a> {
    pub fn encode(mode: QueryMode, tags: &[(&str, &str)]) -> Vec<u8> {
        let mut v = Vec::new();
        v.push(mode as u8);
        v.extend_from_slice(&(tags.len() as u32).to_le_bytes());
        for (key, value) in tags {
            encode_tag(&mut v, key, value);
        }
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mode = QueryMode::from_raw(*buf.first().ok_or(DecodeError::TooShort)?).ok_or(DecodeError::TooShort)?;
        let mut off = 1;
        let count = read_u32(buf, off).ok_or(DecodeError::TooShort)? as usize;
        off += 4;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            tags.push(decode_tag(buf, &mut off)?);
        }
        Ok(Self { mode, tags })
    }
}

/// `FileOp::TagAdd`/`TagRemove` body: the target fd plus a single tag.
pub struct FileTagEdit<'a> {
    pub fd: i32,
    pub key: &'a str,
    pub value: &'a str,
}
impl<'a> FileTagEdit<'a> {
    pub fn encode(fd: i32, key: &str, value: &str) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + key.len() + value.len() + 8);
        v.extend_from_slice(&fd.to_le_bytes());
        encode_tag(&mut v, key, value);
        v
    }
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let fd = i32::from_le_bytes(buf.get(0..4).ok_or(DecodeError::TooShort)?.try_into().unwrap());
        let mut off = 4;
        let (key, value) = decode_tag(buf, &mut off)?;
        Ok(Self { fd, key, value })
    }
}

/// `FileOp::TagGet` body: just the target fd.
pub struct FileTagGet {
    pub fd: i32,
}
impl FileTagGet {
    pub fn encode(fd: i32) -> Vec<u8> {
        fd.to_le_bytes().to_vec()
    }
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let fd = i32::from_le_bytes(buf.get(0..4).ok_or(DecodeError::TooShort)?.try_into().unwrap());
        Ok(Self { fd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_open_round_trips_path() {
        let buf = FileOpen::encode("/newfile");
        let decoded = FileOpen::decode(&buf).unwrap();
        assert_eq!(decoded.path, "/newfile");
    }

    #[test]
    fn file_write_round_trips_bytes() {
        let buf = FileWrite::encode(3, b"hello");
        let decoded = FileWrite::decode(&buf).unwrap();
        assert_eq!(decoded.fd, 3);
        assert_eq!(decoded.bytes, b"hello");
    }

    #[test]
    fn proc_create_round_trips_name() {
        let buf = ProcCreate::encode("worker", 0x1000, 50);
        let decoded = ProcCreate::decode(&buf).unwrap();
        assert_eq!(decoded.name, "worker");
        assert_eq!(decoded.entry_address, 0x1000);
        assert_eq!(decoded.energy, 50);
    }

    #[test]
    fn proc_signal_rejects_unknown_op() {
        let mut buf = ProcSignal::encode(1, SignalOp::Pause, 0);
        buf[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(ProcSignal::decode(&buf).is_err());
    }

    #[test]
    fn file_create_tagged_round_trips_path_and_tags() {
        let buf = FileCreateTagged::encode("/photos/a.jpg", &[("kind", "photo"), ("year", "2024")]);
        let decoded = FileCreateTagged::decode(&buf).unwrap();
        assert_eq!(decoded.path, "/photos/a.jpg");
        assert_eq!(decoded.tags, alloc::vec![("kind", "photo"), ("year", "2024")]);
    }

    #[test]
    fn file_query_round_trips_mode_and_tags() {
        let buf = FileQuery::encode(QueryMode::Or, &[("kind", "photo")]);
        let decoded = FileQuery::decode(&buf).unwrap();
        assert_eq!(decoded.mode, QueryMode::Or);
        assert_eq!(decoded.tags, alloc::vec![("kind", "photo")]);
    }

    #[test]
    fn file_tag_edit_round_trips_fd_and_tag() {
        let buf = FileTagEdit::encode(5, "kind", "photo");
        let decoded = FileTagEdit::decode(&buf).unwrap();
        assert_eq!(decoded.fd, 5);
        assert_eq!(decoded.key, "kind");
        assert_eq!(decoded.value, "photo");
    }

    #[test]
    fn memory_map_round_trips_space_and_addresses() {
        let buf = MemoryMap::encode(1, 0x2000, 0x3000);
        let decoded = MemoryMap::decode(&buf).unwrap();
        assert_eq!(decoded.space, 1);
        assert_eq!(decoded.virt_addr, 0x2000);
        assert_eq!(decoded.frame_addr, 0x3000);
    }

    #[test]
    fn task_id_payload_round_trips() {
        let buf = TaskIdPayload::encode(9);
        assert_eq!(TaskIdPayload::decode(&buf).unwrap().task_id, 9);
    }

    #[test]
    fn timer_sleep_round_trips_delay() {
        let buf = TimerSleep::encode(500);
        assert_eq!(TimerSleep::decode(&buf).unwrap().delay_ticks, 500);
    }

    #[test]
    fn encode_op_prefixes_selector_byte_ahead_of_body() {
        let body = MemoryAlloc::encode(4096);
        let wire = encode_op(MemoryOp::Alloc as u8, &body);
        let (op, rest) = split_op(&wire).unwrap();
        assert_eq!(op, MemoryOp::Alloc as u8);
        assert_eq!(MemoryAlloc::decode(rest).unwrap().size, 4096);
    }
}
