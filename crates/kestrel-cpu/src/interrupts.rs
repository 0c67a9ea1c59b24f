//! Interrupt delivery and return.
//!
//! Entry masks protection and hardware interrupts, swaps to the privileged
//! stack, pushes the resume IP and the saved EFLAGS (8 bytes each, straight
//! to physical memory), and vectors through the in-memory jump table at
//! `IJT + code * 8`. `IRET` reverses the sequence and force-enables
//! protection and interrupts regardless of the popped flags.

use kestrel_isa::{gpr, preg, EF_INTERRUPT_ENABLE, EF_PROTECTED_ENABLE};
use kestrel_mem::PhysMemory;
use kestrel_mmu::AccessType;

use crate::{Cpu, Fault, Interrupt};

/// Terminal conditions: the embedder must stop ticking the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuExit {
    /// An interrupt was raised while another was already being handled.
    DoubleFault,
    /// A physical access outside memory during interrupt delivery, where
    /// the lenient drop has no instruction to skip.
    MemoryFault,
}

pub(crate) fn deliver(
    cpu: &mut Cpu,
    mem: &mut impl PhysMemory,
    int: Interrupt,
    resume_ip: u64,
) -> Result<(), CpuExit> {
    if cpu.handling_interrupt {
        return Err(CpuExit::DoubleFault);
    }
    cpu.handling_interrupt = true;

    let saved_eflags = cpu.preg[preg::EFLAGS];

    // Enter privileged mode and mask further hardware interrupts.
    cpu.preg[preg::EFLAGS] &= !(EF_PROTECTED_ENABLE | EF_INTERRUPT_ENABLE);

    // Park the user stack and switch to the privileged one.
    cpu.preg[preg::USP] = cpu.regs[gpr::SP];
    cpu.regs[gpr::SP] = cpu.preg[preg::PSP];

    cpu.stack_push_phys(mem, resume_ip)
        .map_err(|_| CpuExit::MemoryFault)?;
    cpu.stack_push_phys(mem, saved_eflags)
        .map_err(|_| CpuExit::MemoryFault)?;

    // Vector through the jump table. The read goes through the translator;
    // a page fault here is an interrupt during handling, i.e. a double
    // fault.
    let slot = cpu.preg[preg::IJT].wrapping_add(int.code as u64 * 8) as u32;
    let pa = match cpu.resolve(mem, slot, AccessType::Read) {
        Ok(pa) => pa,
        Err(Fault::Raised(_)) => return Err(CpuExit::DoubleFault),
        Err(Fault::Mem(_)) => return Err(CpuExit::MemoryFault),
    };
    let vector = mem.read_u32_le(pa as u64).map_err(|_| CpuExit::MemoryFault)?;

    cpu.set_next_ip(vector as u64);
    Ok(())
}

pub(crate) fn interrupt_return(cpu: &mut Cpu, mem: &mut impl PhysMemory) -> Result<(), Fault> {
    let eflags = cpu.stack_pop_phys(mem)?;
    let rip = cpu.stack_pop_phys(mem)?;

    cpu.set_next_ip(rip);

    // Park the privileged stack and restore the user one.
    cpu.preg[preg::PSP] = cpu.regs[gpr::SP];
    cpu.regs[gpr::SP] = cpu.preg[preg::USP];

    cpu.preg[preg::EFLAGS] = eflags | EF_PROTECTED_ENABLE | EF_INTERRUPT_ENABLE;
    cpu.handling_interrupt = false;
    Ok(())
}
