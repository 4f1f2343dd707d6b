//! HoneyOS HVM CLI
//!
//! Runs a kernel against an in-memory text display, driven by a fixed frame
//! clock, and writes the rendered page to an HTML file whenever it changes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use honeyos_hvm::display::{page_html, BufferSurface};
use honeyos_hvm::kernel::{self, probe_registers};
use honeyos_hvm::{FileFetcher, HvmConfig, KernelFetcher, SharedMemoryRegion, Vm, VmState};
use std::path::{Path, PathBuf};
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "hvm")]
#[command(about = "HoneyOS HVM - kernel host runtime and text-mode display", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a kernel (.wasm or .wat) until Ctrl+C or the frame budget is spent
    Run {
        /// Kernel binary
        kernel: PathBuf,

        /// Write the rendered page here on every change
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Stop after this many frames (0 = run until Ctrl+C)
        #[arg(long, default_value = "0")]
        frames: u64,

        /// Override the frame clock rate
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Print a kernel's register table without running it
    Registers {
        /// Kernel binary
        kernel: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HvmConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HvmConfig::default(),
    };

    match cli.command {
        Commands::Run {
            kernel,
            output,
            frames,
            fps,
        } => {
            if let Some(fps) = fps {
                config.display.fps = fps;
                config.validate()?;
            }
            run(config, &kernel, output.as_deref(), frames).await
        }
        Commands::Registers { kernel, json } => registers(&config, &kernel, json),
    }
}

async fn run(config: HvmConfig, kernel: &Path, output: Option<&Path>, frames: u64) -> Result<()> {
    let mut surface = BufferSurface::new(config.display.line_height, config.display.client_height);
    let mut interval = tokio::time::interval(config.display.frame_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut vm = Vm::new(config).context("failed to create VM")?;
    vm.init(&FileFetcher::new(kernel)).context("failed to start kernel")?;

    log::info!("Running {} (Ctrl+C to stop)", kernel.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut frame = 0u64;
    let mut state = vm.state();
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl+C")?;
                log::info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                if vm.frame(&mut surface) {
                    if let Some(path) = output {
                        tokio::fs::write(path, page_html(surface.markup()))
                            .await
                            .with_context(|| format!("failed to write {}", path.display()))?;
                    }
                }

                if vm.state() != state {
                    state = vm.state();
                    log::info!("VM state: {:?}", state);
                }

                frame += 1;
                if frames != 0 && frame >= frames {
                    log::info!("Frame budget of {} reached", frames);
                    break;
                }
            }
        }
    }

    vm.terminate();

    if output.is_none() {
        let text = vm.display().with_text(|text| text.visible().to_string());
        print!("{text}");
    }
    if state == VmState::Failed {
        log::warn!("Kernel did not run to completion");
    }
    Ok(())
}

fn registers(config: &HvmConfig, path: &Path, json: bool) -> Result<()> {
    let binary = FileFetcher::new(path).fetch()?;
    let engine = kernel::engine()?;
    let memory = SharedMemoryRegion::new(
        &engine,
        config.memory.initial_pages,
        config.memory.max_pages,
    )?;
    let table = probe_registers(&engine, &binary, &memory)
        .with_context(|| format!("failed to probe {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        println!("buffer  {:#010x} ({} bytes)", table.buffer_address, table.buffer_size);
        println!("push    {:#010x}", table.push_register);
        println!("swap    {:#010x}", table.swap_register);
        println!("clear   {:#010x}", table.clear_register);
    }
    Ok(())
}
