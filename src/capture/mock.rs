//! Synthetic sources
//!
//! Deterministic stand-ins for real drivers, used by the demo binary and tests.

use super::traits::{ImageFrame, Payload, PixelFormat, Source, SourceError};

/// Joint-state style sensor producing `dim` sine waves with staggered phase
pub struct MockSensor {
    dim: usize,
    step: u64,
}

impl MockSensor {
    pub fn new(dim: usize) -> Self {
        tracing::debug!("Mock sensor initialized ({} channels)", dim);
        Self { dim, step: 0 }
    }
}

impl Source for MockSensor {
    fn poll(&mut self) -> Result<Payload, SourceError> {
        let t = self.step as f64 * 0.01;
        self.step += 1;
        let values = (0..self.dim)
            .map(|i| (t + i as f64 * 0.5).sin())
            .collect();
        Ok(Payload::Vector(values))
    }
}

/// Teleoperation controller producing arm targets plus a body velocity
pub struct MockController {
    arm_joints: usize,
    step: u64,
}

impl MockController {
    pub fn new(arm_joints: usize) -> Self {
        Self {
            arm_joints,
            step: 0,
        }
    }
}

impl Source for MockController {
    fn poll(&mut self) -> Result<Payload, SourceError> {
        let t = self.step as f64 * 0.02;
        self.step += 1;
        let mut values: Vec<f64> = (0..self.arm_joints)
            .map(|i| 0.1 * (t * (1.0 + i as f64 * 0.1)).cos())
            .collect();
        // body x/y/z
        values.extend([0.05, 0.0, 0.02]);
        Ok(Payload::Vector(values))
    }
}

/// Camera producing a scrolling RGB gradient
pub struct MockCamera {
    width: u32,
    height: u32,
    frame_index: u32,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        tracing::debug!("Mock camera initialized ({}x{})", width, height);
        Self {
            width,
            height,
            frame_index: 0,
        }
    }
}

impl Source for MockCamera {
    fn poll(&mut self) -> Result<Payload, SourceError> {
        let (w, h) = (self.width, self.height);
        let shift = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);

        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        Ok(Payload::Image(ImageFrame::new(w, h, PixelFormat::Rgb8, data)))
    }
}
