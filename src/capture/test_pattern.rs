use super::{CaptureSource, Frame};
use crate::config::CaptureRegion;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

const BYTES_PER_PIXEL: usize = 3;

/// Synthetic BGR frames cycling through a gray ramp.
///
/// The payload is raw pixels, not VP8: it exercises pacing and the RTP path
/// but receivers cannot decode it.
pub struct TestPattern {
    region: Option<CaptureRegion>,
    frame_duration: Duration,
    counter: u64,
}

impl TestPattern {
    pub fn new(fps: u32) -> Self {
        Self {
            region: None,
            frame_duration: Duration::from_secs(1) / fps.max(1),
            counter: 0,
        }
    }
}

#[async_trait]
impl CaptureSource for TestPattern {
    async fn open(&mut self, region: CaptureRegion) -> Result<()> {
        if region.width == 0 || region.height == 0 {
            return Err(Error::capture(format!(
                "empty capture region {}x{}",
                region.width, region.height
            )));
        }
        self.region = Some(region);
        self.counter = 0;
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame> {
        let region = self
            .region
            .ok_or_else(|| Error::capture("capture source is not open"))?;
        let shade = (self.counter % 256) as u8;
        self.counter += 1;

        let len = region.width as usize * region.height as usize * BYTES_PER_PIXEL;
        Ok(Frame {
            data: Bytes::from(vec![shade; len]),
            width: region.width,
            height: region.height,
            duration: self.frame_duration,
        })
    }

    async fn close(&mut self) {
        self.region = None;
    }

    fn encoded(&self) -> bool {
        false
    }
}
