// Frame reassembler - Turns an arbitrarily chunked byte stream into record payloads
use bytes::{Buf, Bytes, BytesMut};

const START_MARKER: &[u8] = b"{\"";

/// Default upper bound on a single buffered payload (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Nothing buffered
    Idle,
    /// A start marker sits at the head of the buffer, waiting for its end marker
    AwaitingEnd,
    /// Leftover bytes with no start marker yet (at most a split marker prefix)
    CarryingOver,
}

/// Incremental search for the end of the payload at the head of the buffer.
/// `]}` ends a payload wherever it appears. `}]` ends it only when the `}`
/// closes the outermost object, so arrays of objects inside a payload are
/// carried through.
#[derive(Debug, Clone, Copy)]
struct EndScan {
    depth: usize,
    in_string: bool,
    escaped: bool,
    prev: u8,
    closed_outer: bool,
}

impl EndScan {
    /// State right after the start marker: inside the outer object and inside
    /// its first key.
    fn after_start() -> Self {
        Self {
            depth: 1,
            in_string: true,
            escaped: false,
            prev: START_MARKER[1],
            closed_outer: false,
        }
    }

    /// Consume one byte, returning true when it completes an end marker
    fn step(&mut self, byte: u8) -> bool {
        let ends = match (self.prev, byte) {
            (b']', b'}') => true,
            (b'}', b']') => self.closed_outer,
            _ => false,
        };

        self.closed_outer = false;
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
        } else {
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.closed_outer = byte == b'}' && self.depth == 0;
                }
                _ => {}
            }
        }
        self.prev = byte;
        ends
    }
}

/// Explicit framing state machine. Payloads run from `{"` through the first
/// end marker that follows it, both markers included.
#[derive(Debug)]
pub struct FrameReassembler {
    state: FrameState,
    pending: BytesMut,
    // Offset into `pending` already fed to `end_scan`
    scanned: usize,
    end_scan: EndScan,
    max_frame_bytes: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameReassembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            state: FrameState::Idle,
            pending: BytesMut::new(),
            scanned: 0,
            end_scan: EndScan::after_start(),
            max_frame_bytes: max_frame_bytes.max(START_MARKER.len() + 2),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accept a chunk and lazily yield every payload it completes, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.pending.extend_from_slice(chunk);
        Frames { reassembler: self }
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                FrameState::Idle | FrameState::CarryingOver => {
                    let Some(start) = find(&self.pending, START_MARKER) else {
                        self.discard_noise();
                        return None;
                    };
                    if start > 0 {
                        tracing::debug!(skipped = start, "Discarding bytes before start marker");
                    }
                    self.pending.advance(start);
                    self.scanned = START_MARKER.len();
                    self.end_scan = EndScan::after_start();
                    self.state = FrameState::AwaitingEnd;
                }
                FrameState::AwaitingEnd => {
                    if let Some(end) = self.find_end() {
                        let frame = self.pending.split_to(end).freeze();
                        self.scanned = 0;
                        self.state = if self.pending.is_empty() {
                            FrameState::Idle
                        } else {
                            FrameState::CarryingOver
                        };
                        return Some(frame);
                    }

                    if self.pending.len() > self.max_frame_bytes {
                        tracing::warn!(
                            buffered = self.pending.len(),
                            limit = self.max_frame_bytes,
                            "Abandoning oversized partial payload, resynchronising"
                        );
                        self.pending.advance(START_MARKER.len());
                        self.scanned = 0;
                        self.state = FrameState::CarryingOver;
                        continue;
                    }

                    return None;
                }
            }
        }
    }

    /// Feed unscanned bytes to the end search. Returns the index one past the
    /// end marker, or records progress and returns `None`.
    fn find_end(&mut self) -> Option<usize> {
        while self.scanned < self.pending.len() {
            let byte = self.pending[self.scanned];
            self.scanned += 1;
            if self.end_scan.step(byte) {
                return Some(self.scanned);
            }
        }
        None
    }

    /// Drop bytes that cannot belong to a payload, keeping a trailing `{`
    /// that may be the first half of a split start marker.
    fn discard_noise(&mut self) {
        let keep = usize::from(self.pending.last() == Some(&START_MARKER[0]));
        let noise = self.pending.len() - keep;
        self.pending.advance(noise);
        self.scanned = 0;
        self.state = if self.pending.is_empty() {
            FrameState::Idle
        } else {
            FrameState::CarryingOver
        };
    }
}

/// Payloads completed by a single `feed` call
pub struct Frames<'a> {
    reassembler: &'a mut FrameReassembler,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.reassembler.next_frame()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(beam: u32) -> String {
        format!(
            "{{\"bmnum\":{beam},\"noise\":{{\"sky\":3.5}},\"time.sc\":{beam},\"slist\":[1,2,3]}}"
        )
    }

    fn stream(count: u32) -> (Vec<u8>, Vec<String>) {
        let payloads: Vec<String> = (0..count).map(payload).collect();
        (payloads.concat().into_bytes(), payloads)
    }

    fn collect(reassembler: &mut FrameReassembler, chunks: &[&[u8]]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|chunk| reassembler.feed(chunk).collect::<Vec<_>>())
            .map(|frame| String::from_utf8(frame.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_single_chunk_with_many_payloads() {
        let (bytes, expected) = stream(4);
        let mut reassembler = FrameReassembler::default();

        assert_eq!(collect(&mut reassembler, &[bytes.as_slice()]), expected);
        assert_eq!(reassembler.state(), FrameState::Idle);
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let (bytes, expected) = stream(3);
        let mut reassembler = FrameReassembler::default();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();

        assert_eq!(collect(&mut reassembler, &chunks), expected);
    }

    #[test]
    fn test_every_chunk_size_yields_same_payloads() {
        let (bytes, expected) = stream(5);
        for size in 1..=bytes.len() {
            let mut reassembler = FrameReassembler::default();
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(collect(&mut reassembler, &chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_every_three_way_split() {
        let (bytes, expected) = stream(2);
        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                let mut reassembler = FrameReassembler::default();
                let chunks = [&bytes[..a], &bytes[a..b], &bytes[b..]];
                assert_eq!(collect(&mut reassembler, &chunks), expected, "split {a}/{b}");
            }
        }
    }

    #[test]
    fn test_awaits_end_marker() {
        let text = payload(1);
        let (head, tail) = text.split_at(text.len() - 1);
        let mut reassembler = FrameReassembler::default();

        assert!(reassembler.feed(head.as_bytes()).next().is_none());
        assert_eq!(reassembler.state(), FrameState::AwaitingEnd);
        assert_eq!(collect(&mut reassembler, &[tail.as_bytes()]), vec![text]);
    }

    #[test]
    fn test_spurious_end_before_start_is_noise() {
        let text = payload(2);
        let noisy = format!("]}}garbage}}]{text}]}}{text}");
        let mut reassembler = FrameReassembler::default();

        let frames = collect(&mut reassembler, &[noisy.as_bytes()]);

        assert_eq!(frames, vec![text.clone(), text]);
        assert_eq!(reassembler.state(), FrameState::Idle);
    }

    #[test]
    fn test_alternate_end_marker() {
        let mut reassembler = FrameReassembler::default();
        let frames = collect(&mut reassembler, &[b"[{\"bmnum\":4,\"cp\":153}]".as_slice()]);
        assert_eq!(frames, vec!["{\"bmnum\":4,\"cp\":153}]".to_string()]);
    }

    #[test]
    fn test_inner_array_of_objects_does_not_end_payload() {
        let text = r#"{"bmnum":1,"extra":[{"k":1},{"k":"}]"}],"slist":[1],"v":[2.0]}"#;
        for size in 1..=text.len() {
            let mut reassembler = FrameReassembler::default();
            let chunks: Vec<&[u8]> = text.as_bytes().chunks(size).collect();
            assert_eq!(collect(&mut reassembler, &chunks), vec![text.to_string()], "chunk size {size}");
            assert_eq!(reassembler.state(), FrameState::Idle);
        }
    }

    #[test]
    fn test_list_terminator_split_across_chunks() {
        let mut reassembler = FrameReassembler::default();
        assert!(reassembler.feed(b"[{\"cp\":153}").next().is_none());
        let frames = collect(&mut reassembler, &[b"]".as_slice()]);
        assert_eq!(frames, vec!["{\"cp\":153}]".to_string()]);
    }

    #[test]
    fn test_keeps_trailing_partial_start_marker() {
        let mut reassembler = FrameReassembler::default();
        assert!(reassembler.feed(b"noise{").next().is_none());
        assert_eq!(reassembler.state(), FrameState::CarryingOver);
        assert_eq!(reassembler.pending_len(), 1);

        let frames = collect(&mut reassembler, &[b"\"slist\":[1]}".as_slice()]);
        assert_eq!(frames, vec!["{\"slist\":[1]}".to_string()]);
    }

    #[test]
    fn test_oversized_payload_is_abandoned() {
        let mut reassembler = FrameReassembler::new(32);
        let runaway = format!("{{\"v\":[{}", "1,".repeat(40));
        assert!(reassembler.feed(runaway.as_bytes()).next().is_none());
        assert!(reassembler.pending_len() <= 32);

        let text = payload(9);
        assert_eq!(collect(&mut reassembler, &[text.as_bytes()]), vec![text]);
    }
}
