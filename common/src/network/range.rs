use std::fmt;
use std::ops::RangeInclusive;

use rand::seq::SliceRandom;

/// An inclusive range of TCP/UDP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortRange {
    /// Builds a range, swapping the bounds when given in reverse order.
    pub fn new(start_port: u16, end_port: u16) -> Self {
        if start_port > end_port {
            return Self {
                start_port: end_port,
                end_port: start_port,
            };
        }
        Self {
            start_port,
            end_port,
        }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn to_iter(&self) -> RangeInclusive<u16> {
        self.start_port..=self.end_port
    }

    pub fn len(&self) -> usize {
        usize::from(self.end_port - self.start_port) + 1
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_port == self.end_port {
            write!(f, "{}", self.start_port)
        } else {
            write!(f, "{}-{}", self.start_port, self.end_port)
        }
    }
}

/// One or more port ranges, kept sorted by their first port.
///
/// Iteration chains the ranges in ascending order, which is the order
/// the scanner and the connect loop visit ports in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList {
    ranges: Vec<PortRange>,
}

impl PortList {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn add_range(&mut self, range: PortRange) {
        let idx = self
            .ranges
            .partition_point(|existing| existing.start_port <= range.start_port);
        self.ranges.insert(idx, range);
    }

    pub fn add_single(&mut self, port: u16) {
        self.add_range(PortRange::single(port));
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().map(PortRange::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the only port of the list, if it holds exactly one.
    pub fn as_single(&self) -> Option<u16> {
        match self.ranges.as_slice() {
            [range] if range.len() == 1 => Some(range.start_port),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(PortRange::to_iter)
    }

    /// Collects every port in random order (netcat `-r`).
    pub fn shuffled(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.iter().collect();
        ports.shuffle(&mut rand::rng());
        ports
    }
}

impl From<PortRange> for PortList {
    fn from(range: PortRange) -> Self {
        Self {
            ranges: vec![range],
        }
    }
}

impl From<u16> for PortList {
    fn from(port: u16) -> Self {
        PortRange::single(port).into()
    }
}

impl fmt::Display for PortList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
