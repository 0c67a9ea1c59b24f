//! CPU core for the Kestrel 64-bit register machine.
//!
//! One call to [`Cpu::step`] executes one instruction to completion,
//! including any interrupt dispatch it induces. All architectural state
//! lives in [`Cpu`]; memory is passed in per step so the embedder owns it.
//!
//! Execution units report trouble as a value rather than by
//! unwinding: a raised [`Interrupt`] is routed to the interrupt controller
//! at the dispatch site, and an out-of-range physical access is dropped
//! silently (the instruction's remaining effects are lost and IP advances).

#![forbid(unsafe_code)]

mod alu;
mod exec;
mod interrupts;

use kestrel_isa::{gpr, intcode, preg, EF_INTERRUPT_ENABLE};
use kestrel_mem::{MemError, PhysMemory};
use kestrel_mmu::{translate, AccessType, TranslateError};

pub use interrupts::CpuExit;

/// A reified interrupt: the vector code plus the detail word.
///
/// `info` is not part of the v1 stack frame; it is surfaced to embedders for
/// diagnostics (the machine layer logs it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub code: u8,
    pub info: u64,
}

impl Interrupt {
    pub fn new(code: u8, info: u64) -> Self {
        Self { code, info }
    }
}

/// Why an execution unit stopped mid-instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// An architectural interrupt to deliver.
    Raised(Interrupt),
    /// A physical access outside memory; dropped at the dispatch site.
    Mem(MemError),
}

impl From<MemError> for Fault {
    fn from(e: MemError) -> Self {
        Fault::Mem(e)
    }
}

impl From<TranslateError> for Fault {
    fn from(e: TranslateError) -> Self {
        match e {
            TranslateError::PageFault(pf) => {
                Fault::Raised(Interrupt::new(intcode::PAGE_FAULT, pf.info()))
            }
            TranslateError::Mem(e) => Fault::Mem(e),
        }
    }
}

/// Architectural CPU state plus the controller bookkeeping.
#[derive(Debug, Clone)]
pub struct Cpu {
    /// General-purpose registers. `regs[Z]` is pinned to 0 between steps.
    pub regs: [u64; kestrel_isa::NUM_REGS],
    /// Protected registers (EFLAGS, USP, PSP, IJT, RPT, scratch).
    pub preg: [u64; kestrel_isa::NUM_REGS],
    /// Address of the next instruction to fetch.
    pub ip: u64,

    /// Branch/interrupt target for this step, committed at the end of it.
    next_ip: Option<u64>,
    /// Externally injected hardware interrupt awaiting service.
    pending_irq: Option<u8>,
    /// True from interrupt entry until IRET.
    handling_interrupt: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// A CPU in the architectural reset state: every register zero, so the
    /// machine starts privileged with paging and interrupts disabled.
    pub fn new() -> Self {
        Self {
            regs: [0; kestrel_isa::NUM_REGS],
            preg: [0; kestrel_isa::NUM_REGS],
            ip: 0,
            next_ip: None,
            pending_irq: None,
            handling_interrupt: false,
        }
    }

    #[inline]
    pub fn eflags(&self) -> u64 {
        self.preg[preg::EFLAGS]
    }

    #[inline]
    pub fn handling_interrupt(&self) -> bool {
        self.handling_interrupt
    }

    /// Latch a hardware interrupt for service at the next step boundary.
    ///
    /// There is a single pending slot; a second request before service
    /// replaces the first. The code must be in the hardware range.
    pub fn request_interrupt(&mut self, code: u8) {
        debug_assert!(intcode::is_hw_interrupt(code));
        self.pending_irq = Some(code);
    }

    #[inline]
    pub fn pending_interrupt(&self) -> Option<u8> {
        self.pending_irq
    }

    /// Advance the machine by one clock tick.
    ///
    /// Returns `Err` only for terminal conditions (double fault, or a bus
    /// error inside interrupt delivery); the embedder should stop ticking.
    pub fn step(&mut self, mem: &mut impl PhysMemory) -> Result<(), CpuExit> {
        // Service an injected hardware interrupt at the instruction
        // boundary. The previous instruction has already retired, so the
        // current IP is the resume point.
        if self.pending_irq.is_some()
            && self.eflags() & EF_INTERRUPT_ENABLE != 0
            && !self.handling_interrupt
        {
            let code = self.pending_irq.take().expect("checked above");
            let resume_ip = self.ip;
            interrupts::deliver(self, mem, Interrupt::new(code, 0), resume_ip)?;
            self.commit_ip();
            self.regs[gpr::Z] = 0;
            return Ok(());
        }

        match self.execute_one(mem) {
            Ok(()) => {}
            Err(Fault::Raised(int)) => {
                // Faults resume at the triggering instruction; hardware and
                // software interrupts resume past it.
                let resume_ip = if intcode::is_fault(int.code) {
                    self.ip
                } else {
                    self.ip.wrapping_add(4)
                };
                interrupts::deliver(self, mem, int, resume_ip)?;
            }
            // Out-of-range physical access: the step is dropped silently.
            Err(Fault::Mem(_)) => {}
        }

        self.commit_ip();
        self.regs[gpr::Z] = 0;
        Ok(())
    }

    fn execute_one(&mut self, mem: &mut impl PhysMemory) -> Result<(), Fault> {
        let word = self.fetch(mem)?;
        let inst = kestrel_isa::Inst::decode(word);
        exec::execute(self, mem, inst)
    }

    fn fetch(&mut self, mem: &mut impl PhysMemory) -> Result<u32, Fault> {
        let pa = self.resolve(mem, self.ip as u32, AccessType::Execute)?;
        Ok(mem.read_u32_le(pa as u64)?)
    }

    /// Translate a logical address with the live EFLAGS/RPT state.
    pub(crate) fn resolve(
        &self,
        mem: &mut impl PhysMemory,
        vaddr: u32,
        access: AccessType,
    ) -> Result<u32, Fault> {
        Ok(translate(
            mem,
            vaddr,
            access,
            self.preg[preg::EFLAGS],
            self.preg[preg::RPT],
        )?)
    }

    fn commit_ip(&mut self) {
        match self.next_ip.take() {
            Some(nip) => self.ip = nip,
            None => self.ip = self.ip.wrapping_add(4),
        }
    }

    #[inline]
    pub(crate) fn set_next_ip(&mut self, target: u64) {
        self.next_ip = Some(target);
    }

    // Stack helpers. The SP-relative instructions go through the translator;
    // the interrupt controller's frame lives on the physically addressed
    // privileged stack and bypasses it.

    pub(crate) fn stack_push(&mut self, mem: &mut impl PhysMemory, value: u64) -> Result<(), Fault> {
        self.regs[gpr::SP] = self.regs[gpr::SP].wrapping_sub(8);
        let pa = self.resolve(mem, self.regs[gpr::SP] as u32, AccessType::Write)?;
        mem.write_u64_le(pa as u64, value)?;
        Ok(())
    }

    pub(crate) fn stack_pop(&mut self, mem: &mut impl PhysMemory) -> Result<u64, Fault> {
        let pa = self.resolve(mem, self.regs[gpr::SP] as u32, AccessType::Read)?;
        let value = mem.read_u64_le(pa as u64)?;
        self.regs[gpr::SP] = self.regs[gpr::SP].wrapping_add(8);
        Ok(value)
    }

    pub(crate) fn stack_push_phys(
        &mut self,
        mem: &mut impl PhysMemory,
        value: u64,
    ) -> Result<(), MemError> {
        self.regs[gpr::SP] = self.regs[gpr::SP].wrapping_sub(8);
        mem.write_u64_le(self.regs[gpr::SP] as u32 as u64, value)
    }

    pub(crate) fn stack_pop_phys(&mut self, mem: &mut impl PhysMemory) -> Result<u64, MemError> {
        let value = mem.read_u64_le(self.regs[gpr::SP] as u32 as u64)?;
        self.regs[gpr::SP] = self.regs[gpr::SP].wrapping_add(8);
        Ok(value)
    }
}
