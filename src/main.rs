//! VideoCore framebuffer tool
//!
//! Validates display modes and walks the full negotiation against the
//! simulated VideoCore firmware.
//!
//! # Usage
//!
//! ```bash
//! # Show how a mode request would be normalized
//! vcfb check 600 480 --depth 8 --virtual-height 200
//!
//! # Negotiate a mode, map the buffer and fill it with palette entry 3
//! vcfb commit 1024 768 --depth 32 --fill 3
//!
//! # Print the effective configuration
//! vcfb --config fb.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use videocore_fb::{
    FbConfig, FillRect, FramebufferDevice, ModeRequest, ModeValidator, NegotiatedMode, Rop,
    ScanMode, VideoCoreSim,
};

/// VideoCore Framebuffer Tool
///
/// Mode validation and negotiation against a simulated VideoCore
#[derive(Parser)]
#[command(name = "vcfb")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Display-mode negotiation for the VideoCore framebuffer")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Mode geometry shared by `check` and `commit`
#[derive(clap::Args)]
struct ModeArgs {
    /// Visible width in pixels
    width: u32,

    /// Visible height in pixels
    height: u32,

    /// Bits per pixel (1, 2, 4, 8, 16 or 32; default from config)
    #[arg(short, long, default_value_t = 0)]
    depth: u32,

    /// Virtual width (defaults to the visible width)
    #[arg(long)]
    virtual_width: Option<u32>,

    /// Virtual height (defaults to the visible height)
    #[arg(long, conflicts_with = "max_virtual")]
    virtual_height: Option<u32>,

    /// Request the largest virtual height available
    #[arg(long)]
    max_virtual: bool,

    /// Horizontal pan offset
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    xoffset: i32,

    /// Vertical pan offset
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    yoffset: i32,

    /// Scan mode (normal, doubled, interlaced)
    #[arg(long, default_value = "normal")]
    scan: ScanMode,

    /// Green channel length for 16 bpp (5 selects RGB555)
    #[arg(long, default_value_t = 0)]
    green: u32,
}

impl ModeArgs {
    fn to_request(&self) -> ModeRequest {
        let mut request = ModeRequest::new(self.width, self.height)
            .with_depth(self.depth)
            .with_pan(self.xoffset, self.yoffset)
            .with_scan(self.scan)
            .with_green_length(self.green);

        let xres_virtual = self.virtual_width.unwrap_or(self.width);
        request = request.with_virtual(xres_virtual, self.virtual_height.unwrap_or(self.height));
        if self.max_virtual {
            request = request.with_max_virtual_height();
        }
        request
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and normalize a mode request without touching the firmware
    Check {
        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Negotiate a mode with the simulated firmware and map the buffer
    Commit {
        #[command(flatten)]
        mode: ModeArgs,

        /// Fill the screen with this palette entry after mapping
        #[arg(long)]
        fill: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match &cli.config {
        Some(path) => FbConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => FbConfig::default(),
    };

    match cli.command {
        Commands::Check { mode } => handle_check(&config, &mode),
        Commands::Commit { mode, fill } => handle_commit(config, &mode, fill),
        Commands::Config => {
            print!("{}", config.to_toml_string());
            Ok(())
        }
    }
}

fn handle_check(config: &FbConfig, args: &ModeArgs) -> Result<()> {
    let request = args.to_request();
    let validator = ModeValidator::new(config);

    match validator.validate(&request, 0) {
        Ok(mode) => {
            println!("{} {}", "[OK]".green().bold(), mode);
            print_mode(&mode);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "[REJECTED]".red().bold(), e);
            Err(e).context("Mode request rejected")
        }
    }
}

fn handle_commit(config: FbConfig, args: &ModeArgs, fill: Option<u32>) -> Result<()> {
    let sim = VideoCoreSim::new();
    let mut device = FramebufferDevice::attach(sim.memory(), sim.channel(), config)
        .context("Failed to attach framebuffer")?;

    let buffer = device
        .set_mode(&args.to_request())
        .context("Mode negotiation failed")?;

    if let Some(mode) = device.var() {
        println!("{} {}", "[OK]".green().bold(), mode);
        print_mode(mode);
    }

    let fix = device.fixed_info();
    println!("\n{}", "Fixed Info:".white().bold());
    println!("  ID: {}", fix.id);
    println!("  Visual: {:?}", fix.visual);
    println!("  Line length: {} bytes", fix.line_length);
    println!("  Buffer: 0x{:08x} ({} bytes)", fix.smem_start, fix.smem_len);
    println!("  Mapped: {} bytes", buffer.screen_size);

    if let Some(index) = fill {
        let (xres, yres) = device.var().map(|m| (m.xres, m.yres)).unwrap_or_default();
        device
            .session_mut()
            .fill_rect(&FillRect {
                dx: 0,
                dy: 0,
                width: xres,
                height: yres,
                color: index,
                rop: Rop::Copy,
            })
            .context("Fill failed")?;
        println!(
            "{} Filled {}x{} with entry {}",
            "[*]".cyan().bold(),
            xres,
            yres,
            index
        );
    }

    device.detach();
    Ok(())
}

fn print_mode(mode: &NegotiatedMode) {
    println!("\n{}", "Mode:".white().bold());
    println!("  Visible: {}x{}", mode.xres, mode.yres);
    println!("  Virtual: {}x{}", mode.xres_virtual, mode.yres_virtual);
    println!("  Offset: +{}+{}", mode.xoffset, mode.yoffset);
    println!("  Depth: {} bpp ({:?})", mode.bits_per_pixel, mode.visual());
    println!("  Scan: {}", mode.scan);
    println!(
        "  Channels: R {}/{} G {}/{} B {}/{}",
        mode.color.red.offset,
        mode.color.red.length,
        mode.color.green.offset,
        mode.color.green.length,
        mode.color.blue.offset,
        mode.color.blue.length
    );
}
