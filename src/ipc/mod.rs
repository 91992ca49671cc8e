//! In-kernel IPC: per-task mailboxes, request/response matching, and
//! subscriptions (§4.9).

use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::Mutex;

use crate::config::{IPC_QUEUE_DEPTH, MAX_SUBSCRIPTIONS};
use crate::task::TaskTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Message,
    Request,
    Response,
}

#[derive(Clone, Copy)]
pub struct IpcMessage {
    pub sender_id: u64,
    pub receiver_id: u64,
    pub message_id: u64,
    pub request_id: u64,
    pub kind: MessageKind,
    pub data: [u8; 256],
    pub len: usize,
    pub timestamp: u64,
}

impl IpcMessage {
    fn new(
        sender_id: u64,
        receiver_id: u64,
        message_id: u64,
        request_id: u64,
        kind: MessageKind,
        bytes: &[u8],
        timestamp: u64,
    ) -> Self {
        let mut data = [0u8; 256];
        let n = bytes.len().min(256);
        data[..n].copy_from_slice(&bytes[..n]);
        Self { sender_id, receiver_id, message_id, request_id, kind, data, len: n, timestamp }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MailboxStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_received: u64,
}

#[derive(Default)]
struct Mailbox {
    messages: arrayvec::ArrayVec<IpcMessage, IPC_QUEUE_DEPTH>,
    stats: MailboxStats,
}

impl Mailbox {
    fn push(&mut self, message: IpcMessage) -> bool {
        if self.messages.try_push(message).is_ok() {
            self.stats.sent += 1;
            true
        } else {
            self.stats.dropped += 1;
            false
        }
    }

    fn pop(&mut self) -> Option<IpcMessage> {
        if self.messages.is_empty() {
            None
        } else {
            self.stats.received += 1;
            Some(self.messages.remove(0))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    NoSuchMailbox,
}

#[derive(Clone, Copy)]
struct Subscription {
    subscriber: u64,
    publisher: u64,
    active: bool,
}

struct Inner {
    mailboxes: HashMap<u64, Mailbox>,
    subscriptions: arrayvec::ArrayVec<Subscription, MAX_SUBSCRIPTIONS>,
}

/// One coarse spinlock over every mailbox and subscription record (§5: "IPC
/// queues... each has one coarse spinlock").
pub struct IpcSystem {
    inner: Mutex<Inner>,
    message_ids: AtomicU64,
    request_ids: AtomicU64,
}

impl IpcSystem {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { mailboxes: HashMap::new(), subscriptions: arrayvec::ArrayVec::new() }),
            message_ids: AtomicU64::new(1),
            request_ids: AtomicU64::new(1),
        }
    }

    /// Lazily creates a task's mailbox on first touch; a task with no
    /// traffic never allocates one.
    fn ensure_mailbox<'a>(inner: &'a mut Inner, task_id: u64) -> &'a mut Mailbox {
        inner.mailboxes.entry(task_id).or_insert_with(Mailbox::default)
    }

    pub fn register(&self, task_id: u64) {
        let mut inner = self.inner.lock();
        Self::ensure_mailbox(&mut inner, task_id);
    }

    pub fn unregister(&self, task_id: u64) {
        self.inner.lock().mailboxes.remove(&task_id);
    }

    /// `send`: enqueues a `message`-kind record, drop-on-full.
    pub fn send(&self, sender: u64, receiver: u64, data: &[u8], now: u64) -> bool {
        let id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let mailbox = Self::ensure_mailbox(&mut inner, receiver);
        mailbox.push(IpcMessage::new(sender, receiver, id, 0, MessageKind::Message, data, now))
    }

    /// `request`: like `send` but stamps a fresh `request_id`, returned to
    /// the caller for later matching against a `respond` — see
    /// [`Self::respond`] for why there is no persisted request→sender table.
    pub fn request(&self, sender: u64, receiver: u64, data: &[u8], now: u64) -> u64 {
        let request_id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let mailbox = Self::ensure_mailbox(&mut inner, receiver);
        mailbox.push(IpcMessage::new(sender, receiver, message_id, request_id, MessageKind::Request, data, now));
        request_id
    }

    /// `respond`: enqueues a `response`-kind record to `sender`. Per §4.9,
    /// this subsystem does not persist a `request_id → sender` table —
    /// the responder must already know who to answer (it read `sender_id`
    /// off the original request). Caller-side matching is final, not a
    /// stub (see the repository's open-question resolution).
    pub fn respond(&self, responder: u64, sender: u64, request_id: u64, data: &[u8], now: u64) -> bool {
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let mailbox = Self::ensure_mailbox(&mut inner, sender);
        mailbox.push(IpcMessage::new(responder, sender, message_id, request_id, MessageKind::Response, data, now))
    }

    /// `receive`: non-blocking pop from the head.
    pub fn receive(&self, task_id: u64) -> Option<IpcMessage> {
        let mut inner = self.inner.lock();
        inner.mailboxes.get_mut(&task_id).and_then(Mailbox::pop)
    }

    /// `broadcast`: enqueues to every member of `group_id` (§4.8 groups'
    /// "mailbox fan-out" placeholder, made concrete here).
    pub fn broadcast(
        &self,
        sender: u64,
        groups: &crate::task::group::TaskGroups,
        group_id: u32,
        data: &[u8],
        now: u64,
    ) -> usize {
        let Ok(members) = groups.members(group_id) else {
            return 0;
        };
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        for &member in members.iter() {
            let mailbox = Self::ensure_mailbox(&mut inner, member);
            if mailbox.push(IpcMessage::new(sender, member, message_id, 0, MessageKind::Message, data, now)) {
                mailbox.stats.broadcasts_received += 1;
                delivered += 1;
            }
        }
        delivered
    }

    pub fn stats(&self, task_id: u64) -> Result<MailboxStats, IpcError> {
        self.inner.lock().mailboxes.get(&task_id).map(|m| m.stats).ok_or(IpcError::NoSuchMailbox)
    }

    pub fn subscribe(&self, subscriber: u64, publisher: u64) -> bool {
        let mut inner = self.inner.lock();
        inner.subscriptions.try_push(Subscription { subscriber, publisher, active: true }).is_ok()
    }

    pub fn unsubscribe(&self, subscriber: u64, publisher: u64) {
        let mut inner = self.inner.lock();
        for sub in inner.subscriptions.iter_mut() {
            if sub.subscriber == subscriber && sub.publisher == publisher {
                sub.active = false;
            }
        }
    }

    pub fn is_subscribed(&self, subscriber: u64, publisher: u64) -> bool {
        let inner = self.inner.lock();
        inner.subscriptions.iter().any(|s| s.subscriber == subscriber && s.publisher == publisher && s.active)
    }
}

impl Default for IpcSystem {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_task_alive(table: &TaskTable, task_id: u64) -> bool {
    table.with_task(task_id, |_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_receive_preserves_payload_and_sender() {
        let ipc = IpcSystem::new();
        ipc.send(1, 2, b"hi", 100);
        let message = ipc.receive(2).unwrap();
        assert_eq!(message.sender_id, 1);
        assert_eq!(message.payload(), b"hi");
    }

    #[test]
    fn request_then_respond_round_trips_via_caller_side_matching() {
        let ipc = IpcSystem::new();
        let request_id = ipc.request(1, 2, b"ping", 1);
        let request = ipc.receive(2).unwrap();
        assert_eq!(request.kind, MessageKind::Request);
        assert_eq!(request.request_id, request_id);

        ipc.respond(2, request.sender_id, request.request_id, b"pong", 2);
        let response = ipc.receive(1).unwrap();
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.payload(), b"pong");
    }

    #[test]
    fn mailbox_drops_messages_past_capacity() {
        let ipc = IpcSystem::new();
        for i in 0..(crate::config::IPC_QUEUE_DEPTH + 5) {
            ipc.send(1, 9, &[i as u8], i as u64);
        }
        let stats = ipc.stats(9).unwrap();
        assert_eq!(stats.dropped, 5);
        assert_eq!(stats.sent, crate::config::IPC_QUEUE_DEPTH as u64);
    }

    #[test]
    fn broadcast_delivers_to_every_group_member() {
        let ipc = IpcSystem::new();
        let groups = crate::task::group::TaskGroups::new();
        let gid = groups.create("squad", 0, 100, 0).unwrap();
        groups.add_member(gid, 10).unwrap();
        groups.add_member(gid, 11).unwrap();

        let delivered = ipc.broadcast(1, &groups, gid, b"go", 5);
        assert_eq!(delivered, 2);
        assert!(ipc.receive(10).is_some());
        assert!(ipc.receive(11).is_some());
    }
}
