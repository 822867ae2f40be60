//! Streaming rate conversion of capture frames to the outbound rate.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{Result, VoiceError};

/// Converts mono frames from the capture rate to the target rate.
///
/// State carries across frames, so consecutive frames join without clicks.
/// Input is consumed in whole chunks; a remainder waits for the next frame.
pub struct FrameResampler {
    inner: SincFixedIn<f32>,
    chunk_size: usize,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl FrameResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(VoiceError::Resample(format!(
                "invalid parameters: {} -> {} Hz, chunk {}",
                from_rate, to_rate, chunk_size
            )));
        }
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1)
            .map_err(|e| VoiceError::Resample(format!("resampler init failed: {}", e)))?;
        log::debug!(
            "Capture resampler ready: {} -> {} Hz, chunk {}",
            from_rate,
            to_rate,
            chunk_size
        );
        Ok(Self {
            inner,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * 2),
            from_rate,
            to_rate,
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from_rate, self.to_rate)
    }

    /// Resample one capture frame. Output covers every whole chunk buffered
    /// so far and may be empty.
    pub fn process(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(frame);
        let chunks = self.pending.len() / self.chunk_size;
        let mut output = Vec::with_capacity(
            chunks * self.chunk_size * self.to_rate as usize / self.from_rate as usize + 1,
        );
        for i in 0..chunks {
            let start = i * self.chunk_size;
            let input = [&self.pending[start..start + self.chunk_size]];
            let result = self
                .inner
                .process(&input[..], None)
                .map_err(|e| VoiceError::Resample(e.to_string()))?;
            if let Some(channel) = result.into_iter().next() {
                output.extend_from_slice(&channel);
            }
        }
        self.pending.drain(..chunks * self.chunk_size);
        Ok(output)
    }

    /// Samples waiting for a full chunk.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
