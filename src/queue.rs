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

//! Bounded packet stores used as the internal queue of a queue discipline.

use core::str::FromStr;
use std::collections::VecDeque;
use std::fmt;

use log::*;
use strum_macros::EnumIter;

use crate::packet::QueueDiscItem;
use crate::Error;
use crate::Result;

/// Unit in which the size of a queue is measured.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, EnumIter)]
pub enum QueueSizeUnit {
    /// Occupancy is the number of queued packets.
    #[default]
    Packets,

    /// Occupancy is the number of queued bytes.
    Bytes,
}

impl QueueSizeUnit {
    fn suffix(&self) -> char {
        match self {
            QueueSizeUnit::Packets => 'p',
            QueueSizeUnit::Bytes => 'B',
        }
    }
}

/// A queue size, i.e. a value together with its unit.
///
/// The textual form is the value followed by the unit suffix, e.g. `500p` for
/// 500 packets or `75000B` for 75000 bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueSize {
    pub unit: QueueSizeUnit,
    pub value: u32,
}

impl QueueSize {
    pub fn new(unit: QueueSizeUnit, value: u32) -> Self {
        Self { unit, value }
    }

    pub fn packets(value: u32) -> Self {
        Self::new(QueueSizeUnit::Packets, value)
    }

    pub fn bytes(value: u32) -> Self {
        Self::new(QueueSizeUnit::Bytes, value)
    }
}

impl fmt::Display for QueueSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for QueueSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<QueueSize> {
        let s = s.trim();
        let unit = match s.chars().last() {
            Some('p') => QueueSizeUnit::Packets,
            Some('B') => QueueSizeUnit::Bytes,
            _ => return Err(Error::InvalidConfig(format!("queue size {:?}", s))),
        };

        let value = s[..s.len() - 1]
            .parse::<u32>()
            .map_err(|_| Error::InvalidConfig(format!("queue size {:?}", s)))?;

        Ok(QueueSize { unit, value })
    }
}

/// A bounded FIFO store of queue disc items.
pub trait PacketQueue<T: QueueDiscItem> {
    /// Maximum size of the store.
    fn max_size(&self) -> QueueSize;

    /// Append an item to the tail. Return false if the item was dropped because
    /// the store is full.
    fn enqueue(&mut self, item: T) -> bool;

    /// Remove the item at the head.
    fn dequeue(&mut self) -> Option<T>;

    /// Return a reference to the item at the head.
    fn peek(&self) -> Option<&T>;

    /// Number of queued packets.
    fn n_packets(&self) -> u64;

    /// Number of queued bytes.
    fn n_bytes(&self) -> u64;

    /// Unit of the store.
    fn unit(&self) -> QueueSizeUnit {
        self.max_size().unit
    }

    /// Current occupancy in the given unit.
    fn occupancy(&self, unit: QueueSizeUnit) -> u64 {
        match unit {
            QueueSizeUnit::Packets => self.n_packets(),
            QueueSizeUnit::Bytes => self.n_bytes(),
        }
    }

    fn is_empty(&self) -> bool {
        self.n_packets() == 0
    }
}

/// A FIFO that drops arriving items once its maximum size is reached.
#[derive(Debug)]
pub struct DropTailQueue<T> {
    items: VecDeque<T>,

    /// Maximum size.
    max_size: QueueSize,

    /// Queued bytes.
    bytes: u64,

    /// Items dropped because the queue was full.
    drops: u64,
}

impl<T: QueueDiscItem> DropTailQueue<T> {
    pub fn new(max_size: QueueSize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            bytes: 0,
            drops: 0,
        }
    }

    /// Number of items dropped because the queue was full.
    pub fn drops(&self) -> u64 {
        self.drops
    }

    fn would_overflow(&self, item: &T) -> bool {
        let limit = self.max_size.value as u64;
        match self.max_size.unit {
            QueueSizeUnit::Packets => self.items.len() as u64 + 1 > limit,
            QueueSizeUnit::Bytes => self.bytes + item.size() as u64 > limit,
        }
    }
}

impl<T: QueueDiscItem> PacketQueue<T> for DropTailQueue<T> {
    fn max_size(&self) -> QueueSize {
        self.max_size
    }

    fn enqueue(&mut self, item: T) -> bool {
        if self.would_overflow(&item) {
            debug!(
                "drop tail queue full: {} packets, {} bytes, max {}",
                self.items.len(),
                self.bytes,
                self.max_size
            );
            self.drops = self.drops.saturating_add(1);
            return false;
        }

        self.bytes += item.size() as u64;
        self.items.push_back(item);
        true
    }

    fn dequeue(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.bytes = self.bytes.saturating_sub(item.size() as u64);
        Some(item)
    }

    fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    fn n_packets(&self) -> u64 {
        self.items.len() as u64
    }

    fn n_bytes(&self) -> u64 {
        self.bytes
    }
}
