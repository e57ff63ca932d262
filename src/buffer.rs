use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::types::{Channel, SensorPacket};

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Raw buffer shared between the ingest path (single writer) and the fit worker
pub type SharedRawBuffer = Arc<Mutex<RawBuffer>>;

/// Bounded FIFO of raw packets in arrival order
#[derive(Clone, Debug)]
pub struct RawBuffer {
    packets: VecDeque<SensorPacket>,
    capacity: usize,
}

impl RawBuffer {
    /// Create a buffer holding at most `capacity` packets (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RawBuffer {
            packets: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn shared(capacity: usize) -> SharedRawBuffer {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Append a packet, returning the evicted oldest packet when full
    pub fn append(&mut self, packet: SensorPacket) -> Option<SensorPacket> {
        let evicted = if self.packets.len() >= self.capacity {
            self.packets.pop_front()
        } else {
            None
        };
        self.packets.push_back(packet);
        evicted
    }

    /// Copy of the most recent `min(n, len)` packets, oldest first
    pub fn window(&self, n: usize) -> Vec<SensorPacket> {
        let start = self.packets.len().saturating_sub(n);
        self.packets.range(start..).copied().collect()
    }

    pub fn latest(&self) -> Option<&SensorPacket> {
        self.packets.back()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorPacket> {
        self.packets.iter()
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Fitted values for one window, same length and timestamps as the window
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FittedBuffer {
    packets: Vec<SensorPacket>,
}

impl FittedBuffer {
    /// Start from the raw window; channels are overwritten as fits complete
    pub fn from_window(window: &[SensorPacket]) -> Self {
        FittedBuffer {
            packets: window.to_vec(),
        }
    }

    /// Overwrite one channel with fitted values, position by position
    pub fn set_channel(&mut self, channel: Channel, values: &[f64]) {
        for (packet, value) in self.packets.iter_mut().zip(values) {
            *packet = packet.with_channel(channel, *value);
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn as_slice(&self) -> &[SensorPacket] {
        &self.packets
    }

    pub fn into_vec(self) -> Vec<SensorPacket> {
        self.packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;

    fn packet(ts: f64) -> SensorPacket {
        SensorPacket {
            timestamp: ts,
            acc: Vector3::new(ts, 0.0, 0.0),
            ..SensorPacket::default()
        }
    }

    #[test]
    fn test_append_below_capacity() {
        let mut buffer = RawBuffer::new(3);
        assert!(buffer.append(packet(1.0)).is_none());
        assert!(buffer.append(packet(2.0)).is_none());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.latest().map(|p| p.timestamp), Some(2.0));
    }

    #[test]
    fn test_capacity_invariant() {
        let mut buffer = RawBuffer::new(5);
        for i in 0..23 {
            buffer.append(packet(i as f64));
            assert!(buffer.len() <= 5);
        }
        let timestamps: Vec<f64> = buffer.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![18.0, 19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn test_eviction_returns_oldest() {
        let mut buffer = RawBuffer::new(2);
        buffer.append(packet(1.0));
        buffer.append(packet(2.0));
        let evicted = buffer.append(packet(3.0));
        assert_eq!(evicted.map(|p| p.timestamp), Some(1.0));
    }

    #[test]
    fn test_window_is_most_recent_in_order() {
        let mut buffer = RawBuffer::new(10);
        for i in 0..8 {
            buffer.append(packet(i as f64));
        }
        let window: Vec<f64> = buffer.window(3).iter().map(|p| p.timestamp).collect();
        assert_eq!(window, vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_short_window() {
        let mut buffer = RawBuffer::new(10);
        buffer.append(packet(1.0));
        buffer.append(packet(2.0));
        assert_eq!(buffer.window(100).len(), 2);
        assert!(RawBuffer::new(10).window(5).is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buffer = RawBuffer::new(0);
        buffer.append(packet(1.0));
        buffer.append(packet(2.0));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_fitted_set_channel() {
        let window = vec![packet(1.0), packet(2.0)];
        let mut fitted = FittedBuffer::from_window(&window);
        fitted.set_channel(Channel::AccX, &[10.0, 20.0]);
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted.as_slice()[1].acc.x, 20.0);
        assert_eq!(fitted.as_slice()[1].timestamp, 2.0);
    }
}
