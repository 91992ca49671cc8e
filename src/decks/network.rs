//! Network deck (§4.6): fully stubbed. Out of scope per §1 ("no real NIC
//! driver, no protocol stack") — every op is acknowledged with a fixed fake
//! handle so callers see a deterministic, non-erroring completion rather
//! than the family being unroutable. Compiled only when `network-deck` is
//! enabled so a minimal build can drop the dead weight entirely.

use alloc::vec::Vec;

use crate::event::payload::{split_op, NetworkOp};
use crate::event::{Event, EventType};

use super::{ERR_BAD_PAYLOAD, ERR_UNKNOWN_OP};

/// Socket/connection handle every stubbed op hands back.
const FAKE_HANDLE: u64 = 1;

pub struct NetworkDeck;

impl NetworkDeck {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, event: &Event) -> Result<Vec<u8>, u32> {
        if event.kind() != Some(EventType::Network) {
            return Err(ERR_UNKNOWN_OP);
        }
        let (op, _body) = split_op(event.payload()).ok_or(ERR_BAD_PAYLOAD)?;
        NetworkOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)?;
        Ok(FAKE_HANDLE.to_le_bytes().to_vec())
    }
}

impl Default for NetworkDeck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::encode_op;

    #[test]
    fn every_network_op_returns_the_fake_handle() {
        let deck = NetworkDeck::new();
        for op in [NetworkOp::Socket, NetworkOp::Connect, NetworkOp::Send, NetworkOp::Recv] {
            let ev = Event::new(EventType::Network, 1, &encode_op(op as u8, &[]));
            let bytes = deck.process(&ev).unwrap();
            assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), FAKE_HANDLE);
        }
    }

    #[test]
    fn unknown_op_is_rejected() {
        let deck = NetworkDeck::new();
        let ev = Event::new(EventType::Network, 1, &encode_op(200, &[]));
        assert_eq!(deck.process(&ev), Err(ERR_UNKNOWN_OP));
    }
}
