#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kestrel_isa::GP_REGISTER_NAMES;
use kestrel_machine::{Machine, MachineConfig, RunExit, DEFAULT_MEM_SIZE};

const SLICE_TICK_BUDGET: u64 = 100_000;

#[derive(Debug, Parser)]
#[command(name = "krun", about = "Run a flat Kestrel program image")]
struct Args {
    /// Program image, loaded at physical address 0 with IP = 0.
    image: PathBuf,

    /// Guest memory size in bytes (default 1 MiB, grown to fit the image).
    #[arg(long)]
    mem: Option<u64>,

    /// Stop after at most N clock ticks.
    #[arg(long, default_value_t = 1_000_000)]
    max_ticks: u64,

    /// Raise the timer interrupt every N ticks.
    #[arg(long)]
    timer: Option<u64>,

    /// Print the register file when execution stops.
    #[arg(long)]
    dump_regs: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;

    let mem_size = args
        .mem
        .unwrap_or(DEFAULT_MEM_SIZE)
        .max(image.len() as u64);
    let config = MachineConfig {
        mem_size,
        image,
        start_ip: 0,
        timer_interval: args.timer,
    };
    let mut machine = Machine::new(config).context("invalid machine configuration")?;

    let mut remaining = args.max_ticks;
    let outcome = loop {
        if remaining == 0 {
            break Ok(());
        }
        let budget = remaining.min(SLICE_TICK_BUDGET);
        let exit = machine.run_slice(budget);
        remaining -= exit.executed();
        match exit {
            RunExit::Completed { .. } => continue,
            RunExit::DoubleFault { .. } => {
                break Err(format!("double fault after {} ticks", machine.ticks()));
            }
            RunExit::MemoryFault { .. } => {
                break Err(format!(
                    "bus error during interrupt delivery after {} ticks",
                    machine.ticks()
                ));
            }
        }
    };

    if args.dump_regs {
        dump_registers(&machine);
    }

    if let Err(reason) = outcome {
        bail!("execution stopped: {reason}");
    }
    Ok(())
}

fn dump_registers(machine: &Machine) {
    let cpu = machine.cpu();
    for (name, value) in GP_REGISTER_NAMES.iter().zip(cpu.regs.iter()) {
        println!("{name:<3} = {value:#018x}");
    }
    println!("IP  = {:#018x}", cpu.ip);
    println!("EF  = {:#018x}", cpu.eflags());
    println!("ticks = {}", machine.ticks());
}
