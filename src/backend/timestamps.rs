// GPU timestamps
//
// One query pool per frame slot. A slot's queries are read back after
// `FrameRing::begin_frame` waited on the slot's fence, so reading never
// stalls.
//
//   FRAME_START ── texture pass ── TEXTURE_END   IMAGE_START ── toy pass ── FRAME_END

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Query indices inside one slot's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    FrameStart = 0,
    TextureEnd = 1,
    ImageStart = 2,
    FrameEnd = 3,
}

const QUERY_COUNT: u32 = 4;

/// Durations of one frame on the GPU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuTimings {
    pub frame_ms: f32,
    pub texture_ms: f32,
    pub image_ms: f32,
}

impl GpuTimings {
    /// `ticks` is indexed by `Timestamp`; `period_ns` is nanoseconds per tick
    pub fn from_ticks(ticks: &[u64; QUERY_COUNT as usize], period_ns: f32) -> Self {
        let span = |from: Timestamp, to: Timestamp| {
            ticks_to_ms(ticks[from as usize], ticks[to as usize], period_ns)
        };
        Self {
            frame_ms: span(Timestamp::FrameStart, Timestamp::FrameEnd),
            texture_ms: span(Timestamp::FrameStart, Timestamp::TextureEnd),
            image_ms: span(Timestamp::ImageStart, Timestamp::FrameEnd),
        }
    }
}

/// Tick difference in milliseconds. Out-of-order ticks count as zero.
pub fn ticks_to_ms(start: u64, end: u64, period_ns: f32) -> f32 {
    (end.saturating_sub(start) as f64 * period_ns as f64 / 1_000_000.0) as f32
}

pub struct GpuTimer {
    pools: Vec<vk::QueryPool>,
    /// Slots whose last submission wrote a full set of queries
    submitted: Vec<bool>,
    period_ns: f32,
    device: Arc<VulkanDevice>,
}

impl GpuTimer {
    /// `None` when the device cannot write timestamps on the graphics queue
    pub fn new(device: Arc<VulkanDevice>, slot_count: usize) -> Result<Option<Self>> {
        let Some(period_ns) = device.timestamp_period else {
            return Ok(None);
        };

        let pool_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(QUERY_COUNT);

        let mut pools = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            match unsafe { device.device.create_query_pool(&pool_info, None) } {
                Ok(pool) => pools.push(pool),
                Err(e) => {
                    for pool in pools {
                        unsafe { device.device.destroy_query_pool(pool, None) };
                    }
                    return Err(e).context("Failed to create timestamp query pool");
                }
            }
        }

        Ok(Some(Self {
            submitted: vec![false; pools.len()],
            pools,
            period_ns,
            device,
        }))
    }

    /// Reset the slot's queries and write `FrameStart`. Must be recorded
    /// outside of rendering.
    pub fn begin(&mut self, cmd: vk::CommandBuffer, slot: usize) {
        self.submitted[slot] = false;
        unsafe {
            self.device
                .device
                .cmd_reset_query_pool(cmd, self.pools[slot], 0, QUERY_COUNT);
        }
        self.write(cmd, slot, Timestamp::FrameStart);
    }

    pub fn write(&self, cmd: vk::CommandBuffer, slot: usize, timestamp: Timestamp) {
        unsafe {
            self.device.device.cmd_write_timestamp2(
                cmd,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                self.pools[slot],
                timestamp as u32,
            );
        }
    }

    /// The slot's command buffer reached the queue
    pub fn mark_submitted(&mut self, slot: usize) {
        self.submitted[slot] = true;
    }

    /// Read the slot's last frame. Call only after the slot's fence wait.
    pub fn read(&mut self, slot: usize) -> Option<GpuTimings> {
        if !std::mem::take(&mut self.submitted[slot]) {
            return None;
        }

        let mut ticks = [0u64; QUERY_COUNT as usize];
        let result = unsafe {
            self.device.device.get_query_pool_results(
                self.pools[slot],
                0,
                QUERY_COUNT,
                &mut ticks,
                vk::QueryResultFlags::TYPE_64,
            )
        };

        match result {
            Ok(()) => Some(GpuTimings::from_ticks(&ticks, self.period_ns)),
            Err(e) => {
                log::trace!("Timestamps of slot {} unavailable: {:?}", slot, e);
                None
            }
        }
    }
}

impl Drop for GpuTimer {
    fn drop(&mut self) {
        for &pool in &self.pools {
            unsafe { self.device.device.destroy_query_pool(pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_ms() {
        // 1 ns per tick: 2.5 million ticks are 2.5 ms
        assert!((ticks_to_ms(1_000, 2_501_000, 1.0) - 2.5).abs() < 1e-6);
        // 52.08 ns per tick is common on integrated GPUs
        assert!((ticks_to_ms(0, 19_200, 52.08) - 0.999_936).abs() < 1e-4);
    }

    #[test]
    fn test_reversed_ticks_are_zero() {
        assert_eq!(ticks_to_ms(500, 100, 1.0), 0.0);
    }

    #[test]
    fn test_timings_from_ticks() {
        let ticks = [0, 1_000_000, 1_500_000, 4_000_000];
        let timings = GpuTimings::from_ticks(&ticks, 1.0);
        assert!((timings.frame_ms - 4.0).abs() < 1e-6);
        assert!((timings.texture_ms - 1.0).abs() < 1e-6);
        assert!((timings.image_ms - 2.5).abs() < 1e-6);
    }
}
