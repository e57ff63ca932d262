pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One 3D sample of a sensor axis group
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(6);
        write!(
            f,
            "[X: {:.*}; Y: {:.*}; Z: {:.*}]",
            prec, self.x, prec, self.y, prec, self.z
        )
    }
}

/// One timestamped sample of all three sensors
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorPacket {
    /// Device clock, seconds
    pub timestamp: f64,
    pub acc: Vector3,
    pub gyro: Vector3,
    pub mag: Vector3,
}

impl SensorPacket {
    pub fn new(timestamp: f64, acc: Vector3, gyro: Vector3, mag: Vector3) -> Self {
        Self {
            timestamp,
            acc,
            gyro,
            mag,
        }
    }

    /// Read a single scalar channel
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::AccX => self.acc.x,
            Channel::AccY => self.acc.y,
            Channel::AccZ => self.acc.z,
            Channel::GyroX => self.gyro.x,
            Channel::GyroY => self.gyro.y,
            Channel::GyroZ => self.gyro.z,
            Channel::MagX => self.mag.x,
            Channel::MagY => self.mag.y,
            Channel::MagZ => self.mag.z,
        }
    }

    /// Copy of this packet with one channel replaced
    pub fn with_channel(mut self, channel: Channel, value: f64) -> Self {
        let slot = match channel {
            Channel::AccX => &mut self.acc.x,
            Channel::AccY => &mut self.acc.y,
            Channel::AccZ => &mut self.acc.z,
            Channel::GyroX => &mut self.gyro.x,
            Channel::GyroY => &mut self.gyro.y,
            Channel::GyroZ => &mut self.gyro.z,
            Channel::MagX => &mut self.mag.x,
            Channel::MagY => &mut self.mag.y,
            Channel::MagZ => &mut self.mag.z,
        };
        *slot = value;
        self
    }
}

impl fmt::Display for SensorPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(6);
        write!(
            f,
            "{{timeStamp: {:.*}; acc: {:.*}; gyro: {:.*}; mag: {:.*}}}",
            prec, self.timestamp, prec, self.acc, prec, self.gyro, prec, self.mag
        )
    }
}

/// The nine scalar channels fitted independently
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    AccX,
    AccY,
    AccZ,
    GyroX,
    GyroY,
    GyroZ,
    MagX,
    MagY,
    MagZ,
}

impl Channel {
    pub const COUNT: usize = 9;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::AccX,
        Channel::AccY,
        Channel::AccZ,
        Channel::GyroX,
        Channel::GyroY,
        Channel::GyroZ,
        Channel::MagX,
        Channel::MagY,
        Channel::MagZ,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::AccX => "acc.x",
            Channel::AccY => "acc.y",
            Channel::AccZ => "acc.z",
            Channel::GyroX => "gyro.x",
            Channel::GyroY => "gyro.y",
            Channel::GyroZ => "gyro.z",
            Channel::MagX => "mag.x",
            Channel::MagY => "mag.y",
            Channel::MagZ => "mag.z",
        }
    }

    /// Column index in `Channel::ALL`
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        let packet = SensorPacket::default();
        for (i, channel) in Channel::ALL.iter().enumerate() {
            let updated = packet.with_channel(*channel, i as f64 + 1.0);
            assert_eq!(updated.channel(*channel), i as f64 + 1.0);
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn test_with_channel_leaves_others() {
        let packet = SensorPacket::new(
            1.0,
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
            Vector3::new(7.0, 8.0, 9.0),
        );
        let updated = packet.with_channel(Channel::GyroY, -1.0);
        assert_eq!(updated.acc, packet.acc);
        assert_eq!(updated.mag, packet.mag);
        assert_eq!(updated.gyro, Vector3::new(4.0, -1.0, 6.0));
        assert_eq!(updated.timestamp, 1.0);
    }

    #[test]
    fn test_display_format() {
        let packet = SensorPacket::new(
            2.5,
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::default(),
            Vector3::default(),
        );
        let text = format!("{:.1}", packet);
        assert_eq!(
            text,
            "{timeStamp: 2.5; acc: [X: 1.0; Y: 2.0; Z: 3.0]; gyro: [X: 0.0; Y: 0.0; Z: 0.0]; mag: [X: 0.0; Y: 0.0; Z: 0.0]}"
        );
    }

    #[test]
    fn test_magnitude() {
        assert_eq!(Vector3::new(3.0, 4.0, 0.0).magnitude(), 5.0);
    }
}
