use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ChatError;

/// A microphone. `start` may be refused by the person or the platform;
/// that refusal is reported as [`ChatError::DeviceDenied`].
pub trait AudioCapture: Send {
    fn start(&mut self) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// End the session and return the encoded audio chunks captured so far.
    fn stop(&mut self) -> impl Future<Output = Result<Vec<Bytes>, ChatError>> + Send;

    /// End the session and throw the audio away.
    fn abort(&mut self);
}

/// Press-to-record state machine around an [`AudioCapture`] device.
pub struct VoiceRecorder<C> {
    device: C,
    started_at: Option<Instant>,
}

impl<C: AudioCapture> VoiceRecorder<C> {
    pub fn new(device: C) -> Self {
        Self {
            device,
            started_at: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Starting while already recording is a no-op.
    pub async fn start(&mut self) -> Result<(), ChatError> {
        if self.is_recording() {
            return Ok(());
        }
        self.device.start().await.inspect_err(|e| warn!("Microphone unavailable: {}", e))?;
        self.started_at = Some(Instant::now());
        debug!("Voice recording started");
        Ok(())
    }

    /// Stop recording and return the clip, or `None` if nothing was
    /// recorded (not recording, or the device produced no audio).
    pub async fn finish(&mut self) -> Result<Option<Bytes>, ChatError> {
        let Some(started_at) = self.started_at.take() else {
            return Ok(None);
        };
        let chunks = self.device.stop().await?;
        debug!("Voice recording stopped after {}", format_elapsed(started_at.elapsed()));

        if chunks.iter().all(|c| c.is_empty()) {
            return Ok(None);
        }
        let mut clip = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            clip.extend_from_slice(chunk);
        }
        Ok(Some(clip.freeze()))
    }

    pub fn cancel(&mut self) {
        if self.started_at.take().is_some() {
            self.device.abort();
            debug!("Voice recording cancelled");
        }
    }
}

/// `mm:ss`, as shown next to the pulsing heart while recording.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted microphone for tests.
    pub(crate) struct FakeMic {
        pub deny: bool,
        pub chunks: Vec<Bytes>,
        pub aborted: bool,
    }

    impl FakeMic {
        pub(crate) fn with_audio(chunks: &[&'static [u8]]) -> Self {
            Self {
                deny: false,
                chunks: chunks.iter().map(|c| Bytes::from_static(c)).collect(),
                aborted: false,
            }
        }

        pub(crate) fn denied() -> Self {
            Self {
                deny: true,
                chunks: vec![],
                aborted: false,
            }
        }
    }

    impl AudioCapture for FakeMic {
        async fn start(&mut self) -> Result<(), ChatError> {
            if self.deny {
                return Err(ChatError::DeviceDenied("NotAllowedError".into()));
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<Vec<Bytes>, ChatError> {
            Ok(std::mem::take(&mut self.chunks))
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    #[tokio::test]
    async fn finish_joins_chunks() {
        let mut rec = VoiceRecorder::new(FakeMic::with_audio(&[b"abc", b"def"]));
        rec.start().await.unwrap();
        assert!(rec.is_recording());
        assert_eq!(rec.finish().await.unwrap(), Some(Bytes::from_static(b"abcdef")));
        assert!(!rec.is_recording());
        assert_eq!(rec.finish().await.unwrap(), None);
    }

    #[tokio::test]
    async fn silent_recording_yields_nothing() {
        let mut rec = VoiceRecorder::new(FakeMic::with_audio(&[]));
        rec.start().await.unwrap();
        assert_eq!(rec.finish().await.unwrap(), None);
    }

    #[tokio::test]
    async fn denied_microphone_stays_idle() {
        let mut rec = VoiceRecorder::new(FakeMic::denied());
        let err = rec.start().await.unwrap_err();
        assert!(matches!(err, ChatError::DeviceDenied(_)));
        assert!(!rec.is_recording());
    }

    #[tokio::test]
    async fn cancel_discards_audio() {
        let mut rec = VoiceRecorder::new(FakeMic::with_audio(&[b"abc"]));
        rec.start().await.unwrap();
        rec.cancel();
        assert!(rec.device.aborted);
        assert_eq!(rec.finish().await.unwrap(), None);
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(75)), "01:15");
        assert_eq!(format_elapsed(Duration::from_millis(599_999)), "09:59");
    }
}
