use std::collections::VecDeque;

/// Append-only guest console output.
///
/// Bytes are only ever appended while a session runs, so any snapshot a reader takes is a prefix of
/// every later snapshot. [`ConsoleBuffer::clear`] exists for session teardown only.
#[derive(Debug, Default, Clone)]
pub struct ConsoleBuffer {
    bytes: Vec<u8>,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Full contents decoded as UTF-8. Invalid sequences (e.g. a multi-byte character split across
    /// two `console_putchar` calls that has not completed yet) are replaced with U+FFFD.
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// FIFO of pending guest input bytes.
#[derive(Debug, Default, Clone)]
pub struct InputQueue {
    pending: VecDeque<u8>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) {
        self.pending.push_back(byte);
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_prefixes_of_later_snapshots() {
        let mut console = ConsoleBuffer::new();
        console.extend_from_slice(b"OpenSBI v1.3\r\n");
        let first = console.snapshot();
        console.extend_from_slice(b"Linux version 6.6.0\r\n");
        let second = console.snapshot();
        assert!(second.starts_with(&first));
        assert_eq!(console.len(), second.len());
    }

    #[test]
    fn split_utf8_sequence_is_replaced_not_dropped() {
        let mut console = ConsoleBuffer::new();
        // First byte of "é" (0xC3 0xA9).
        console.extend_from_slice(b"caf\xC3");
        assert_eq!(console.snapshot(), "caf\u{FFFD}");
        console.push(0xA9);
        assert_eq!(console.snapshot(), "café");
    }

    #[test]
    fn input_queue_is_fifo() {
        let mut queue = InputQueue::new();
        for byte in b"ls\n" {
            queue.push(*byte);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(b'l'));
        assert_eq!(queue.pop(), Some(b's'));
        assert_eq!(queue.pop(), Some(b'\n'));
        assert_eq!(queue.pop(), None);
    }
}
