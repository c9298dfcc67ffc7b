mod test_pattern;

pub use test_pattern::TestPattern;

use crate::config::CaptureRegion;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A frame as produced by the capture provider. The payload is handed to
/// the outbound track untouched.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

#[async_trait]
pub trait CaptureSource: Send {
    async fn open(&mut self, region: CaptureRegion) -> Result<()>;

    async fn grab_frame(&mut self) -> Result<Frame>;

    /// Whether frames are already encoded for the outbound track's codec.
    fn encoded(&self) -> bool {
        true
    }

    async fn close(&mut self);
}
