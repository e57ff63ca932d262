//! Wire grammars for racket sensor datagrams
//!
//! Two text formats are in the field and they cannot be told apart reliably
//! from a prefix, so the grammar is always chosen explicitly:
//!
//! - Tagged CSV: `"90594.75079, 3, -0.059, 0.098, 9.826, 4, -0.000, 0.001, 0.001, 5, 16.191, 12.642, -34.497"`.
//!   Groups `3` (acc), `4` (gyro) and `5` (mag) are optional; an omitted group
//!   keeps the previous packet's value.
//! - Edisson: `"s@TimeStamp@accX@accY@accZ@gyroX@gyroY@gyroZ@w@x@y@z@;"`.
//!   The quaternion is checked and then dropped; mag is carried forward.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{SensorPacket, Vector3};

const TAG_ACC: i64 = 3;
const TAG_GYRO: i64 = 4;
const TAG_MAG: i64 = 5;

const EDISSON_START: char = 's';
const EDISSON_TERMINATOR: char = ';';
const EDISSON_SEPARATOR: char = '@';
const EDISSON_FIELDS: usize = 11; // ts, acc(3), gyro(3), quaternion(4)

/// Wire grammar of the connected device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireGrammar {
    /// Tagged-group CSV (grammar A)
    Tagged,
    /// `@`-delimited Edisson board format (grammar B)
    Edisson,
}

impl WireGrammar {
    pub fn from_is_edisson(is_edisson: bool) -> Self {
        if is_edisson {
            WireGrammar::Edisson
        } else {
            WireGrammar::Tagged
        }
    }
}

/// Which optional groups to emit when formatting tagged CSV
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaggedGroups {
    pub acc: bool,
    pub gyro: bool,
    pub mag: bool,
}

impl TaggedGroups {
    pub const ALL: TaggedGroups = TaggedGroups {
        acc: true,
        gyro: true,
        mag: true,
    };
}

/// Stateless parser bound to one grammar
#[derive(Clone, Copy, Debug)]
pub struct PacketParser {
    grammar: WireGrammar,
}

impl PacketParser {
    pub fn new(grammar: WireGrammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> WireGrammar {
        self.grammar
    }

    /// Parse one datagram's text; `previous` supplies any omitted groups
    pub fn parse(&self, text: &str, previous: &SensorPacket) -> Result<SensorPacket, ParseError> {
        match self.grammar {
            WireGrammar::Tagged => parse_tagged(text, previous),
            WireGrammar::Edisson => parse_edisson(text, previous),
        }
    }
}

/// Parse grammar A (tagged-group CSV)
pub fn parse_tagged(text: &str, previous: &SensorPacket) -> Result<SensorPacket, ParseError> {
    let body = text.trim();
    let body = body.strip_suffix(',').unwrap_or(body);
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens: Vec<&str> = body.split(',').map(str::trim).collect();
    let timestamp = parse_number(tokens[0], 0)?;

    let mut packet = SensorPacket {
        timestamp,
        ..*previous
    };

    let mut pos = 1;
    while pos < tokens.len() {
        let tag = parse_tag(tokens[pos], pos)?;
        if tokens.len() - pos - 1 < 3 {
            return Err(ParseError::TruncatedGroup { tag, position: pos });
        }
        let values = parse_vector(&tokens[pos + 1..pos + 4], pos + 1)?;
        match tag {
            TAG_ACC => packet.acc = values,
            TAG_GYRO => packet.gyro = values,
            TAG_MAG => packet.mag = values,
            other => log::trace!("Skipping unknown group tag {} at field {}", other, pos),
        }
        pos += 4;
    }

    Ok(packet)
}

/// Parse grammar B (Edisson `@`-delimited)
pub fn parse_edisson(text: &str, previous: &SensorPacket) -> Result<SensorPacket, ParseError> {
    let body = text.trim();
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    // Framing is exactly `s@` ... `@;`
    let body = body
        .strip_prefix(EDISSON_START)
        .and_then(|b| b.strip_prefix(EDISSON_SEPARATOR))
        .ok_or(ParseError::MissingStartTag)?;
    let body = body
        .strip_suffix(EDISSON_TERMINATOR)
        .and_then(|b| b.strip_suffix(EDISSON_SEPARATOR))
        .ok_or(ParseError::MissingTerminator)?;

    let fields: Vec<&str> = body.split(EDISSON_SEPARATOR).map(str::trim).collect();
    if fields.len() != EDISSON_FIELDS {
        return Err(ParseError::FieldCount {
            expected: EDISSON_FIELDS,
            found: fields.len(),
        });
    }

    let mut values = [0.0; EDISSON_FIELDS];
    for (position, (slot, token)) in values.iter_mut().zip(fields.iter()).enumerate() {
        *slot = parse_number(token, position + 1)?;
    }

    // values[7..11] is the orientation quaternion, not part of the packet
    Ok(SensorPacket {
        timestamp: values[0],
        acc: Vector3::new(values[1], values[2], values[3]),
        gyro: Vector3::new(values[4], values[5], values[6]),
        mag: previous.mag,
    })
}

/// Render a packet as tagged CSV, emitting only the selected groups
pub fn format_tagged(packet: &SensorPacket, groups: TaggedGroups) -> String {
    let mut out = format!("{:.5}", packet.timestamp);
    let mut push_group = |tag: i64, v: &Vector3| {
        out.push_str(&format!(", {}, {:.3}, {:.3}, {:.3}", tag, v.x, v.y, v.z));
    };
    if groups.acc {
        push_group(TAG_ACC, &packet.acc);
    }
    if groups.gyro {
        push_group(TAG_GYRO, &packet.gyro);
    }
    if groups.mag {
        push_group(TAG_MAG, &packet.mag);
    }
    out
}

/// Render a packet in the Edisson format with an identity quaternion
pub fn format_edisson(packet: &SensorPacket) -> String {
    format!(
        "s@{:.5}@{:.3}@{:.3}@{:.3}@{:.3}@{:.3}@{:.3}@1.0@0.0@0.0@0.0@;",
        packet.timestamp,
        packet.acc.x,
        packet.acc.y,
        packet.acc.z,
        packet.gyro.x,
        packet.gyro.y,
        packet.gyro.z,
    )
}

fn parse_number(token: &str, position: usize) -> Result<f64, ParseError> {
    let value: f64 = token.parse().map_err(|_| ParseError::InvalidNumber {
        position,
        token: token.to_string(),
    })?;
    if !value.is_finite() {
        return Err(ParseError::NonFinite {
            position,
            token: token.to_string(),
        });
    }
    Ok(value)
}

fn parse_tag(token: &str, position: usize) -> Result<i64, ParseError> {
    token.parse().map_err(|_| ParseError::InvalidTag {
        position,
        token: token.to_string(),
    })
}

fn parse_vector(tokens: &[&str], first_position: usize) -> Result<Vector3, ParseError> {
    Ok(Vector3::new(
        parse_number(tokens[0], first_position)?,
        parse_number(tokens[1], first_position + 1)?,
        parse_number(tokens[2], first_position + 2)?,
    ))
}
