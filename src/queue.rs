//! Fixed-slot message ring (spec §3, §4.3).
//!
//! Slot framing (32-byte header + 224-byte payload, additive checksum) is
//! grounded on the teacher's `ringbuffer.rs`; the head/tail cursor protocol
//! (relaxed load of the producer's own cursor, acquire load of the other
//! cursor only on a cache miss, release store on publish) follows the
//! pattern documented in `debasishg-ringmpsc-rs`'s `Ring<T>`, adapted from a
//! generic SPSC channel to this crate's fixed-size, checksum-framed slots.

use crate::error::QueueError;
use crate::memory::MemoryProvider;
use std::sync::Arc;
use std::sync::atomic::Ordering;

pub const MESSAGE_HEADER_SIZE: usize = 32;
pub const MESSAGE_PAYLOAD_SIZE: usize = 224;
pub const MESSAGE_SLOT_SIZE: usize = MESSAGE_HEADER_SIZE + MESSAGE_PAYLOAD_SIZE;
pub const MSG_MAGIC: u64 = 0x4D53475F45504F43;

#[derive(Debug, Clone)]
pub struct Message {
    pub sequence: u64,
    pub msg_type: u8,
    pub priority: u8,
    pub sender_epoch: u8,
    pub receiver_epoch: u8,
    pub flags: u16,
    pub payload: Vec<u8>,
}

fn checksum(header_without_checksum: &[u8], payload: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for byte in header_without_checksum.iter().chain(payload.iter()) {
        sum = sum.wrapping_add(*byte as u32);
    }
    (sum & 0xFFFF) as u16
}

fn encode_slot(msg: &Message) -> Result<[u8; MESSAGE_SLOT_SIZE], QueueError> {
    if msg.payload.len() > MESSAGE_PAYLOAD_SIZE {
        return Err(QueueError::PayloadTooLarge {
            size: msg.payload.len(),
            max: MESSAGE_PAYLOAD_SIZE,
        });
    }
    let mut slot = [0u8; MESSAGE_SLOT_SIZE];
    slot[0..8].copy_from_slice(&MSG_MAGIC.to_le_bytes());
    slot[8..16].copy_from_slice(&msg.sequence.to_le_bytes());
    slot[16] = msg.msg_type;
    slot[17] = msg.priority;
    slot[18] = msg.sender_epoch;
    slot[19] = msg.receiver_epoch;
    slot[20..22].copy_from_slice(&msg.flags.to_le_bytes());
    slot[22..24].copy_from_slice(&(msg.payload.len() as u16).to_le_bytes());
    // slot[24..26] is the checksum, filled in below.
    // slot[26..32] is reserved, left zeroed.
    slot[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + msg.payload.len()].copy_from_slice(&msg.payload);

    let mut header_for_checksum = [0u8; MESSAGE_HEADER_SIZE - 2];
    header_for_checksum.copy_from_slice(&slot[0..24]);
    let sum = checksum(&header_for_checksum, &msg.payload);
    slot[24..26].copy_from_slice(&sum.to_le_bytes());

    Ok(slot)
}

fn decode_slot(slot: &[u8; MESSAGE_SLOT_SIZE]) -> Result<Message, QueueError> {
    let magic = u64::from_le_bytes(slot[0..8].try_into().unwrap());
    if magic != MSG_MAGIC {
        return Err(QueueError::CorruptedMessage);
    }
    let sequence = u64::from_le_bytes(slot[8..16].try_into().unwrap());
    let msg_type = slot[16];
    let priority = slot[17];
    let sender_epoch = slot[18];
    let receiver_epoch = slot[19];
    let flags = u16::from_le_bytes(slot[20..22].try_into().unwrap());
    let data_size = u16::from_le_bytes(slot[22..24].try_into().unwrap()) as usize;
    let stored_checksum = u16::from_le_bytes(slot[24..26].try_into().unwrap());

    if data_size > MESSAGE_PAYLOAD_SIZE {
        return Err(QueueError::CorruptedMessage);
    }
    let payload = slot[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + data_size].to_vec();
    let mut header_for_checksum = [0u8; MESSAGE_HEADER_SIZE - 2];
    header_for_checksum.copy_from_slice(&slot[0..24]);
    if checksum(&header_for_checksum, &payload) != stored_checksum {
        return Err(QueueError::CorruptedMessage);
    }

    Ok(Message {
        sequence,
        msg_type,
        priority,
        sender_epoch,
        receiver_epoch,
        flags,
        payload,
    })
}

/// A fixed-capacity circular buffer of 256-byte message slots, with the
/// head/tail cursors stored as the 4 bytes immediately preceding the slot
/// array (spec §3). `capacity` must be a power of two.
pub struct MessageQueue {
    mem: Arc<dyn MemoryProvider>,
    base_offset: usize,
    capacity: usize,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl MessageQueue {
    pub fn new(mem: Arc<dyn MemoryProvider>, base_offset: usize, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        Self {
            mem,
            base_offset,
            capacity,
            next_sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn head_offset(&self) -> usize {
        self.base_offset
    }

    fn tail_offset(&self) -> usize {
        self.base_offset + 4
    }

    fn slot_offset(&self, index: usize) -> usize {
        self.base_offset + 8 + index * MESSAGE_SLOT_SIZE
    }

    fn head(&self) -> u32 {
        self.mem.atomic_load_u32(self.head_offset()).unwrap_or(0)
    }

    fn tail(&self) -> u32 {
        self.mem.atomic_load_u32(self.tail_offset()).unwrap_or(0)
    }

    fn mask(&self) -> u32 {
        (self.capacity - 1) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.tail() == self.head()
    }

    pub fn is_full(&self) -> bool {
        let mask = self.mask();
        (self.tail().wrapping_add(1)) & mask == self.head() & mask
    }

    /// Writes a message into the next free slot and advances the tail.
    /// Single-writer only: concurrent producers must be serialized by a
    /// [`crate::guard::RegionGuard`] upstream.
    pub fn enqueue(
        &self,
        msg_type: u8,
        priority: u8,
        sender_epoch: u8,
        receiver_epoch: u8,
        flags: u16,
        payload: &[u8],
    ) -> Result<u64, QueueError> {
        if self.is_full() {
            return Err(QueueError::Full);
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let msg = Message {
            sequence,
            msg_type,
            priority,
            sender_epoch,
            receiver_epoch,
            flags,
            payload: payload.to_vec(),
        };
        let slot = encode_slot(&msg)?;

        let tail = self.tail();
        let index = (tail & self.mask()) as usize;
        self.mem.write_at(self.slot_offset(index), &slot).map_err(|_| QueueError::Full)?;
        self.mem
            .atomic_store_u32(self.tail_offset(), tail.wrapping_add(1))
            .map_err(|_| QueueError::Full)?;
        Ok(sequence)
    }

    /// Reads the slot at the current head and advances it. Returns
    /// `QueueError::Empty` when the cursors coincide, `CorruptedMessage`
    /// when the magic or checksum fails validation (the slot is still
    /// consumed so a single bad frame doesn't wedge the queue).
    pub fn dequeue(&self) -> Result<Message, QueueError> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        let head = self.head();
        let index = (head & self.mask()) as usize;
        let raw = self
            .mem
            .read_at(self.slot_offset(index), MESSAGE_SLOT_SIZE)
            .map_err(|_| QueueError::Empty)?;
        let slot: [u8; MESSAGE_SLOT_SIZE] = raw.try_into().map_err(|_| QueueError::CorruptedMessage)?;
        let _ = self.mem.atomic_store_u32(self.head_offset(), head.wrapping_add(1));
        decode_slot(&slot)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn region_size(capacity: usize) -> usize {
        8 + capacity * MESSAGE_SLOT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessMemory;

    fn queue(capacity: usize) -> MessageQueue {
        let size = MessageQueue::region_size(capacity);
        MessageQueue::new(Arc::new(InProcessMemory::new(size)), 0, capacity)
    }

    #[test]
    fn round_trips_a_message() {
        let q = queue(8);
        q.enqueue(1, 0, 1, 2, 0, b"hello").unwrap();
        let msg = q.dequeue().unwrap();
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.msg_type, 1);
        assert_eq!(msg.sender_epoch, 1);
        assert_eq!(msg.receiver_epoch, 2);
    }

    #[test]
    fn empty_queue_errors() {
        let q = queue(4);
        assert_eq!(q.dequeue().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn full_queue_rejects_enqueue() {
        let q = queue(4);
        for _ in 0..3 {
            q.enqueue(0, 0, 0, 0, 0, b"x").unwrap();
        }
        assert_eq!(q.enqueue(0, 0, 0, 0, 0, b"x").unwrap_err(), QueueError::Full);
    }

    #[test]
    fn wraps_around_capacity() {
        let q = queue(4);
        for i in 0..3u8 {
            q.enqueue(i, 0, 0, 0, 0, &[i]).unwrap();
        }
        for _ in 0..3 {
            q.dequeue().unwrap();
        }
        for i in 0..3u8 {
            q.enqueue(i + 10, 0, 0, 0, 0, &[i]).unwrap();
        }
        let msg = q.dequeue().unwrap();
        assert_eq!(msg.msg_type, 10);
    }

    #[test]
    fn payload_too_large_is_rejected() {
        let q = queue(4);
        let payload = vec![0u8; MESSAGE_PAYLOAD_SIZE + 1];
        assert!(matches!(
            q.enqueue(0, 0, 0, 0, 0, &payload),
            Err(QueueError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn corrupted_magic_is_detected() {
        let q = queue(4);
        q.enqueue(0, 0, 0, 0, 0, b"ok").unwrap();
        // Corrupt the magic bytes of the slot directly.
        q.mem.write_at(q.slot_offset(0), &[0u8; 8]).unwrap();
        assert_eq!(q.dequeue().unwrap_err(), QueueError::CorruptedMessage);
    }
}
