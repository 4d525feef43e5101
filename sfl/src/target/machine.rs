//! Capabilities the session needs from the machine it runs on.
//!
//! The protocol writes host-supplied bytes at host-supplied addresses and
//! finally jumps to a host-supplied address. Both go through [`Machine`] so
//! an environment can restrict them without touching the state machine;
//! [`BoundedMachine`] restricts writes to a list of [`Region`]s.

use crate::error::{Error, Result};
use log::warn;
use std::fmt;
use std::str::FromStr;

/// Parameters handed to the booted program in argument registers 1–3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootParams {
    /// Address of the kernel command line.
    pub cmdline: u32,
    /// First address of the initial ramdisk.
    pub initrd_start: u32,
    /// End address of the initial ramdisk.
    pub initrd_end: u32,
}

/// Memory and control-transfer capabilities.
pub trait Machine {
    /// Write `data` at consecutive addresses starting at `address`.
    ///
    /// Returning an error refuses the write; the session then answers the
    /// frame with [`Ack::Error`](crate::Ack::Error).
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Jump to `address` with `params` in the first three argument registers.
    ///
    /// Implementations invalidate any instruction cache that could still
    /// hold stale code for the target range. There is no way back.
    fn transfer_control(&mut self, params: BootParams, address: u32) -> !;
}

impl<M: Machine + ?Sized> Machine for &mut M {
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        (**self).write_memory(address, data)
    }

    fn transfer_control(&mut self, params: BootParams, address: u32) -> ! {
        (**self).transfer_control(params, address)
    }
}

/// A contiguous address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    /// First address.
    pub start: u32,
    /// Size in bytes.
    pub size: u32,
}

impl Region {
    /// Create a region.
    pub fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// One past the last address, computed without overflow.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.size)
    }

    /// Whether `len` bytes starting at `address` lie entirely inside.
    pub fn contains(&self, address: u32, len: usize) -> bool {
        let first = u64::from(address);
        first >= u64::from(self.start) && first + len as u64 <= self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}..0x{:08X}", self.start, self.end())
    }
}

/// Parse `0x`-prefixed hexadecimal or plain decimal.
pub(crate) fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

impl FromStr for Region {
    type Err = String;

    /// Parses `start:size`, e.g. `0x40000000:0x4000000`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, size) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid region '{s}', expected 'start:size'"))?;
        let region = Self::new(parse_u32(start)?, parse_u32(size)?);
        if region.end() > u64::from(u32::MAX) + 1 {
            return Err(format!("region {region} runs past the 32-bit address space"));
        }
        Ok(region)
    }
}

/// Decorator refusing writes that fall outside the allowed regions.
///
/// Empty writes are always let through. Control transfer is not checked.
pub struct BoundedMachine<M: Machine> {
    inner: M,
    regions: Vec<Region>,
}

impl<M: Machine> BoundedMachine<M> {
    /// Restrict `inner` to `regions`.
    pub fn new(inner: M, regions: Vec<Region>) -> Self {
        Self { inner, regions }
    }

    /// Allowed regions.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Get a reference to the wrapped machine.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn allows(&self, address: u32, len: usize) -> bool {
        len == 0 || self.regions.iter().any(|r| r.contains(address, len))
    }
}

impl<M: Machine> Machine for BoundedMachine<M> {
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if !self.allows(address, data.len()) {
            warn!(
                "Refusing write of {} bytes at 0x{address:08X}: outside allowed regions",
                data.len()
            );
            return Err(Error::MemoryRejected {
                address,
                len: data.len(),
            });
        }
        self.inner.write_memory(address, data)
    }

    fn transfer_control(&mut self, params: BootParams, address: u32) -> ! {
        self.inner.transfer_control(params, address)
    }
}
