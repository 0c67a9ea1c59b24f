//! Opcode-family execution units.
//!
//! Dispatch is a range check over the closed opcode set; each unit mutates
//! the CPU/memory directly and reports interrupts as values.

use kestrel_isa::{
    intcode, preg, Inst, Opcode, Unit, EF_NEGATIVE, EF_PROTECTED_ENABLE, EF_ZERO,
};
use kestrel_mem::PhysMemory;
use kestrel_mmu::AccessType;

use crate::{alu, interrupts, Cpu, Fault, Interrupt};

pub(crate) fn execute(cpu: &mut Cpu, mem: &mut impl PhysMemory, inst: Inst) -> Result<(), Fault> {
    let Some(opcode) = Opcode::from_u8(inst.opcode) else {
        return Err(Fault::Raised(Interrupt::new(intcode::INSTRUCTION_FAULT, 0)));
    };

    match opcode.unit() {
        Unit::Misc => exec_misc(cpu, inst, opcode),
        Unit::Load => exec_load(cpu, mem, inst, opcode),
        Unit::Store => exec_store(cpu, mem, inst, opcode),
        Unit::Stack => exec_stack(cpu, mem, inst, opcode),
        Unit::Branch => exec_branch(cpu, inst, opcode),
        Unit::Alu => exec_alu(cpu, inst, opcode),
        Unit::Privileged => exec_privileged(cpu, mem, inst, opcode),
    }
}

/// The `r1 + offset` source operand shared by every instruction form.
#[inline]
fn operand(cpu: &Cpu, inst: Inst) -> u64 {
    cpu.regs[inst.r1 as usize].wrapping_add(inst.offset as i64 as u64)
}

fn exec_misc(cpu: &mut Cpu, inst: Inst, opcode: Opcode) -> Result<(), Fault> {
    match opcode {
        Opcode::Mov => {
            cpu.regs[inst.r0 as usize] = operand(cpu, inst);
        }
        Opcode::Gef => {
            cpu.regs[inst.r0 as usize] = cpu.preg[preg::EFLAGS];
        }
        Opcode::Int => {
            let code = operand(cpu, inst);
            let sw = intcode::SW_INTERRUPT_START as u64..=intcode::SW_INTERRUPT_END as u64;
            if !sw.contains(&code) {
                return Err(Fault::Raised(Interrupt::new(
                    intcode::INSTRUCTION_FAULT,
                    0x3,
                )));
            }
            return Err(Fault::Raised(Interrupt::new(code as u8, 0)));
        }
        _ => unreachable!("not a misc opcode: {opcode:?}"),
    }
    Ok(())
}

fn exec_load(
    cpu: &mut Cpu,
    mem: &mut impl PhysMemory,
    inst: Inst,
    opcode: Opcode,
) -> Result<(), Fault> {
    let (width, signed) = match opcode {
        Opcode::Lb => (1, true),
        Opcode::Lbu => (1, false),
        Opcode::Lh => (2, true),
        Opcode::Lhu => (2, false),
        Opcode::Lw => (4, true),
        Opcode::Lwu => (4, false),
        Opcode::Ld => (8, true),
        _ => unreachable!("not a load opcode: {opcode:?}"),
    };

    let vaddr = operand(cpu, inst) as u32;
    let pa = cpu.resolve(mem, vaddr, AccessType::Read)?;
    let raw = mem.load_le(pa as u64, width)?;
    let value = if signed { sign_extend(raw, width) } else { raw };
    cpu.regs[inst.r0 as usize] = value;
    Ok(())
}

fn exec_store(
    cpu: &mut Cpu,
    mem: &mut impl PhysMemory,
    inst: Inst,
    opcode: Opcode,
) -> Result<(), Fault> {
    let width = match opcode {
        Opcode::Sb => 1,
        Opcode::Sh => 2,
        Opcode::Sw => 4,
        Opcode::Sd => 8,
        _ => unreachable!("not a store opcode: {opcode:?}"),
    };

    let vaddr = operand(cpu, inst) as u32;
    let pa = cpu.resolve(mem, vaddr, AccessType::Write)?;
    mem.store_le(pa as u64, cpu.regs[inst.r0 as usize], width)?;
    Ok(())
}

fn exec_stack(
    cpu: &mut Cpu,
    mem: &mut impl PhysMemory,
    inst: Inst,
    opcode: Opcode,
) -> Result<(), Fault> {
    match opcode {
        Opcode::Push => {
            let value = operand(cpu, inst);
            cpu.stack_push(mem, value)?;
        }
        Opcode::Pop => {
            let value = cpu.stack_pop(mem)?;
            cpu.regs[inst.r0 as usize] = value;
        }
        _ => unreachable!("not a stack opcode: {opcode:?}"),
    }
    Ok(())
}

fn exec_branch(cpu: &mut Cpu, inst: Inst, opcode: Opcode) -> Result<(), Fault> {
    let target = operand(cpu, inst);
    let eflags = cpu.preg[preg::EFLAGS];
    let zero = eflags & EF_ZERO != 0;
    let negative = eflags & EF_NEGATIVE != 0;

    let taken = match opcode {
        Opcode::Jmp => true,
        Opcode::Jgt => !(zero || negative),
        Opcode::Jlt => negative,
        Opcode::Jzr => zero,
        // Condition register in r0, target base in r1.
        Opcode::Jif => cpu.regs[inst.r0 as usize] != 0,
        _ => unreachable!("not a branch opcode: {opcode:?}"),
    };

    if taken {
        cpu.set_next_ip(target);
    }
    Ok(())
}

fn exec_alu(cpu: &mut Cpu, inst: Inst, opcode: Opcode) -> Result<(), Fault> {
    let o1 = cpu.regs[inst.r0 as usize];
    let o2 = operand(cpu, inst);

    let mut eflags = cpu.preg[preg::EFLAGS];
    alu::begin_op(&mut eflags);

    let result = match opcode {
        Opcode::Add => alu::add(&mut eflags, o1, o2),
        Opcode::Sub => alu::sub(&mut eflags, o1, o2),
        Opcode::Mul => o1.wrapping_mul(o2),
        Opcode::Smul => (o1 as i64).wrapping_mul(o2 as i64) as u64,
        Opcode::Div => {
            if o2 == 0 {
                return Err(Fault::Raised(Interrupt::new(intcode::ALU_FAULT, 0)));
            }
            cpu.regs[inst.r1 as usize] = o1 % o2;
            o1 / o2
        }
        Opcode::Sdiv => {
            if o2 == 0 {
                return Err(Fault::Raised(Interrupt::new(intcode::ALU_FAULT, 0)));
            }
            cpu.regs[inst.r1 as usize] = (o1 as i64).wrapping_rem(o2 as i64) as u64;
            (o1 as i64).wrapping_div(o2 as i64) as u64
        }
        Opcode::And => o1 & o2,
        Opcode::Or => o1 | o2,
        Opcode::Xor => o1 ^ o2,
        // Shift amounts are taken mod 64.
        Opcode::Shl => o1.wrapping_shl(o2 as u32),
        Opcode::Shr => o1.wrapping_shr(o2 as u32),
        Opcode::Sshr => (o1 as i64).wrapping_shr(o2 as u32) as u64,
        _ => unreachable!("not an ALU opcode: {opcode:?}"),
    };

    alu::finish_op(&mut eflags, result);
    cpu.preg[preg::EFLAGS] = eflags;
    cpu.regs[inst.r0 as usize] = result;
    Ok(())
}

fn exec_privileged(
    cpu: &mut Cpu,
    mem: &mut impl PhysMemory,
    inst: Inst,
    opcode: Opcode,
) -> Result<(), Fault> {
    if cpu.preg[preg::EFLAGS] & EF_PROTECTED_ENABLE != 0 {
        return Err(Fault::Raised(Interrupt::new(
            intcode::INSTRUCTION_FAULT,
            0x3,
        )));
    }

    match opcode {
        Opcode::Pmov => {
            cpu.preg[inst.r0 as usize] = operand(cpu, inst);
        }
        Opcode::Iret => {
            interrupts::interrupt_return(cpu, mem)?;
        }
        _ => unreachable!("not a privileged opcode: {opcode:?}"),
    }
    Ok(())
}

#[inline]
fn sign_extend(value: u64, width: usize) -> u64 {
    let shift = 64 - 8 * width as u32;
    (((value << shift) as i64) >> shift) as u64
}
