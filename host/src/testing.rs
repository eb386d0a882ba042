//! In-memory register window for unit tests.
use std::collections::{HashMap, VecDeque};

use crate::regs::{RegisterPort, WINDOW_SIZE};

/// Error returned by a [`FakePort`] with `fail` set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bus fault")]
pub struct BusFault;

/// Register window backed by plain memory, logging every write.
#[derive(Debug, Default)]
pub struct FakePort {
    regs: HashMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    scripts: HashMap<u32, VecDeque<u32>>,
    reads: HashMap<u32, usize>,
    /// Fails every access with [`BusFault`] while set.
    pub fail: bool,
}

impl FakePort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of a register.
    pub fn get(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    /// Presets a register without logging a write.
    pub fn set(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    /// Queues values returned by successive reads of a register, ahead of its
    /// stored value.
    pub fn script(&mut self, offset: u32, values: impl IntoIterator<Item = u32>) {
        self.scripts.entry(offset).or_default().extend(values);
    }

    /// Returns every write since creation or the last [`clear_log`](Self::clear_log).
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }

    /// Returns how many times a register was read.
    pub fn reads_of(&self, offset: u32) -> usize {
        self.reads.get(&offset).copied().unwrap_or(0)
    }
}

impl RegisterPort for FakePort {
    type Error = BusFault;

    fn read(&mut self, offset: u32) -> Result<u32, Self::Error> {
        if self.fail {
            return Err(BusFault);
        }
        assert!(offset < WINDOW_SIZE, "read outside window: {offset:#x}");
        *self.reads.entry(offset).or_default() += 1;
        if let Some(value) = self.scripts.get_mut(&offset).and_then(VecDeque::pop_front) {
            return Ok(value);
        }
        Ok(self.get(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), Self::Error> {
        if self.fail {
            return Err(BusFault);
        }
        assert!(offset < WINDOW_SIZE, "write outside window: {offset:#x}");
        self.writes.push((offset, value));
        self.regs.insert(offset, value);
        Ok(())
    }
}
