//! Canonical "machine" integration layer for the Kestrel emulator.
//!
//! This crate composes the CPU core (`kestrel-cpu`) and physical memory
//! (`kestrel-mem`) into a single embeddable value: construct a [`Machine`]
//! from a flat program image, then tick it in slices. External devices are
//! modeled as interrupt sources: the built-in deterministic timer, and
//! whatever the embedder injects through [`Machine::inject_interrupt`].

#![forbid(unsafe_code)]

use kestrel_cpu::{Cpu, CpuExit};
use kestrel_isa::intcode;
use kestrel_mem::DenseMemory;
use thiserror::Error;

pub const DEFAULT_MEM_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("memory size must be non-zero")]
    ZeroMemory,
    #[error("image ({image} bytes) does not fit in memory ({mem_size} bytes)")]
    ImageTooLarge { image: usize, mem_size: u64 },
    #[error("timer interval must be non-zero")]
    ZeroTimerInterval,
    #[error("interrupt code {0:#04x} is outside the hardware range")]
    NotAHardwareInterrupt(u8),
}

/// Configuration for [`Machine`].
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub mem_size: u64,
    /// Flat image copied to physical address 0 on construction and reset.
    pub image: Vec<u8>,
    pub start_ip: u64,
    /// Raise `TIMER_CLOCK` every this many ticks, when set.
    pub timer_interval: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mem_size: DEFAULT_MEM_SIZE,
            image: Vec::new(),
            start_ip: 0,
            timer_interval: None,
        }
    }
}

impl MachineConfig {
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Self::default()
        }
    }
}

/// Why [`Machine::run_slice`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The tick budget was spent.
    Completed { executed: u64 },
    /// An interrupt was raised while one was already in flight. Terminal.
    DoubleFault { executed: u64 },
    /// A bus error during interrupt delivery. Terminal.
    MemoryFault { executed: u64 },
}

impl RunExit {
    pub fn executed(&self) -> u64 {
        match *self {
            RunExit::Completed { executed }
            | RunExit::DoubleFault { executed }
            | RunExit::MemoryFault { executed } => executed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunExit::Completed { .. })
    }
}

#[derive(Debug)]
pub struct Machine {
    cpu: Cpu,
    mem: DenseMemory,
    config: MachineConfig,
    ticks: u64,
    timer_countdown: u64,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        if config.mem_size == 0 {
            return Err(MachineError::ZeroMemory);
        }
        if config.image.len() as u64 > config.mem_size {
            return Err(MachineError::ImageTooLarge {
                image: config.image.len(),
                mem_size: config.mem_size,
            });
        }
        if config.timer_interval == Some(0) {
            return Err(MachineError::ZeroTimerInterval);
        }

        let mem = DenseMemory::from_image(&config.image, config.mem_size);
        let mut cpu = Cpu::new();
        cpu.ip = config.start_ip;
        Ok(Self {
            cpu,
            mem,
            timer_countdown: config.timer_interval.unwrap_or(0),
            ticks: 0,
            config,
        })
    }

    /// Back to the architectural reset state with the image re-applied.
    pub fn reset(&mut self) {
        log::debug!("machine reset (ip={:#x})", self.config.start_ip);
        self.cpu = Cpu::new();
        self.cpu.ip = self.config.start_ip;
        self.mem = DenseMemory::from_image(&self.config.image, self.config.mem_size);
        self.ticks = 0;
        self.timer_countdown = self.config.timer_interval.unwrap_or(0);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn memory(&self) -> &DenseMemory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut DenseMemory {
        &mut self.mem
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Inject an external hardware interrupt for service at the next tick
    /// boundary where interrupts are accepted.
    pub fn inject_interrupt(&mut self, code: u8) -> Result<(), MachineError> {
        if !intcode::is_hw_interrupt(code) {
            return Err(MachineError::NotAHardwareInterrupt(code));
        }
        log::debug!("injecting hardware interrupt {code:#04x}");
        self.cpu.request_interrupt(code);
        Ok(())
    }

    /// One clock tick, including the timer device.
    pub fn step(&mut self) -> Result<(), CpuExit> {
        if let Some(interval) = self.config.timer_interval {
            self.timer_countdown -= 1;
            if self.timer_countdown == 0 {
                log::trace!("timer fired at tick {}", self.ticks);
                self.cpu.request_interrupt(intcode::TIMER_CLOCK);
                self.timer_countdown = interval;
            }
        }

        let res = self.cpu.step(&mut self.mem);
        if res.is_ok() {
            self.ticks += 1;
        }
        res
    }

    pub fn run_slice(&mut self, max_ticks: u64) -> RunExit {
        let mut executed = 0;
        while executed < max_ticks {
            match self.step() {
                Ok(()) => executed += 1,
                Err(CpuExit::DoubleFault) => {
                    log::warn!("double fault after {} ticks; halting", self.ticks);
                    return RunExit::DoubleFault { executed };
                }
                Err(CpuExit::MemoryFault) => {
                    log::warn!(
                        "bus error during interrupt delivery after {} ticks; halting",
                        self.ticks
                    );
                    return RunExit::MemoryFault { executed };
                }
            }
        }
        RunExit::Completed { executed }
    }
}
