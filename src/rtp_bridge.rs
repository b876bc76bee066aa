//! RTP bridge interface (component J).
//!
//! `CallSession` is implemented entirely by the embedder; the core never
//! touches RTP bytes (§4.J). It is constructed from a negotiated offer and
//! produces the SDP answer the UAS/UAC facades place in the 200 OK or
//! re-INVITE response.

use async_trait::async_trait;

use crate::sdp::Session;

/// The embedder-provided media engine for one call leg.
#[async_trait]
pub trait CallSession: Send + Sync {
    /// The SDP answer produced when this session was constructed from the
    /// offer, local IP, and local RTP port passed to the embedder's
    /// constructor (construction itself is outside this trait, since it
    /// varies per embedder).
    fn sdp_answer(&self) -> &Session;

    /// Start forwarding media.
    async fn start(&self);

    /// Stop forwarding media and release RTP resources.
    async fn stop(&self);

    /// Invoked by the embedder's media engine when a frame of decoded PCM
    /// audio is available.
    fn on_audio(&self, pcm: &[u8], timestamp_ms: u64);

    /// Invoked when an RTP `telephone-event` (or in-band DTMF) completes.
    fn on_dtmf(&self, digit: char, duration_ms: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::build_offer;
    use crate::types::Direction;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingSession {
        answer: Session,
        started: AtomicBool,
    }

    #[async_trait]
    impl CallSession for RecordingSession {
        fn sdp_answer(&self) -> &Session {
            &self.answer
        }
        async fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
        }
        async fn stop(&self) {
            self.started.store(false, Ordering::SeqCst);
        }
        fn on_audio(&self, _pcm: &[u8], _timestamp_ms: u64) {}
        fn on_dtmf(&self, _digit: char, _duration_ms: u32) {}
    }

    #[tokio::test]
    async fn start_and_stop_flip_session_state() {
        let session = RecordingSession {
            answer: build_offer("192.0.2.1", 20000, 0, Direction::Sendrecv),
            started: AtomicBool::new(false),
        };
        session.start().await;
        assert!(session.started.load(Ordering::SeqCst));
        session.stop().await;
        assert!(!session.started.load(Ordering::SeqCst));
    }
}
