//! Moving-average distance filter

use std::collections::VecDeque;

/// Fixed-capacity FIFO of raw distances; output is the window mean.
/// A push into a full window evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct DistanceFilter {
    window: VecDeque<f32>,
    capacity: usize,
}

impl DistanceFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample and return the updated mean
    pub fn push(&mut self, value: f32) -> f32 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.mean().unwrap_or(value)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<f32>() / self.window.len() as f32)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
