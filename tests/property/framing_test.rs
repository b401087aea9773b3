// tests/property/framing_test.rs

//! However a stream of messages is chunked, the client frame buffer yields
//! each message exactly once and in order.

use partyline::client::FrameBuffer;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_any_chunking_yields_each_message_once(
        messages in prop::collection::vec("[a-zA-Z0-9 {}:,\"é]{1,40}", 1..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30),
    ) {
        // Whitespace-only lines carry no payload and are skipped.
        let messages: Vec<String> = messages
            .into_iter()
            .filter(|m| !m.trim().is_empty())
            .collect();
        let mut wire = Vec::new();
        for message in &messages {
            wire.extend_from_slice(message.as_bytes());
            wire.push(b'\n');
        }

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
        offsets.push(0);
        offsets.push(wire.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut frames = FrameBuffer::new();
        let mut received = Vec::new();
        for window in offsets.windows(2) {
            received.extend(frames.push(&wire[window[0]..window[1]]).unwrap());
        }

        prop_assert_eq!(received, messages);
        prop_assert_eq!(frames.pending(), 0);
    }
}
