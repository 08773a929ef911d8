// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Instant;

use strum_macros::Display;
use strum_macros::EnumIter;

/// An item that can be stored in a queue discipline.
pub trait QueueDiscItem {
    /// Size of the item on the wire in bytes.
    fn size(&self) -> u32;

    /// Try to set the congestion experienced mark on the item.
    ///
    /// Return false if the item is not ECN capable.
    fn mark(&mut self) -> bool;
}

/// ECN codepoint carried in the IP header.
/// See RFC 3168 Section 5
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, EnumIter, Display)]
pub enum Ecn {
    /// Not ECN-Capable Transport.
    #[default]
    #[strum(serialize = "Not-ECT")]
    NotEct = 0b00,

    /// ECN Capable Transport(1).
    #[strum(serialize = "ECT(1)")]
    Ect1 = 0b01,

    /// ECN Capable Transport(0).
    #[strum(serialize = "ECT(0)")]
    Ect0 = 0b10,

    /// Congestion Experienced.
    #[strum(serialize = "CE")]
    Ce = 0b11,
}

impl Ecn {
    /// Parse the codepoint from the low two bits of the TOS/traffic class.
    pub fn from_bits(bits: u8) -> Ecn {
        match bits & 0b11 {
            0b01 => Ecn::Ect1,
            0b10 => Ecn::Ect0,
            0b11 => Ecn::Ce,
            _ => Ecn::NotEct,
        }
    }

    /// Check whether the transport has negotiated ECN.
    pub fn is_capable(&self) -> bool {
        *self != Ecn::NotEct
    }
}

/// A packet queued in the bottleneck.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet identifier, only used for tracing.
    pub id: u64,

    /// Packet size in bytes.
    pub size: u32,

    /// ECN codepoint.
    pub ecn: Ecn,

    /// The time the packet arrived at the queue.
    pub arrival_time: Option<Instant>,
}

impl Packet {
    pub fn new(id: u64, size: u32, ecn: Ecn) -> Self {
        Self {
            id,
            size,
            ecn,
            arrival_time: None,
        }
    }

    /// Whether the packet carries the CE mark.
    pub fn is_marked(&self) -> bool {
        self.ecn == Ecn::Ce
    }
}

impl QueueDiscItem for Packet {
    fn size(&self) -> u32 {
        self.size
    }

    fn mark(&mut self) -> bool {
        if !self.ecn.is_capable() {
            return false;
        }
        self.ecn = Ecn::Ce;
        true
    }
}
