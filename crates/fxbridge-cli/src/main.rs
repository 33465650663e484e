use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fxbridge_engine::{render_offline, Bridge, BridgeConfig, Engine, EngineConfig, ErrorPolicy, SoundSource};
use fxbridge_script::{FloatList, FrameCount, Runtime, ScriptError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name="fxbridge", version, about="Run managed effect callbacks on a real-time audio stream")]
struct Cli {
    #[command(subcommand)]
    cmd: Command
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// Stream input to output through a bridged gain callback
    Run(RunArgs),
    /// Render a test tone through a bridged gain callback, without audio devices
    Render(RenderArgs),
}

#[derive(Args)]
struct CallbackArgs {
    /// Gain applied by the callback, in dB
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    gain_db: f32,
    /// Make every Nth callback invocation raise an error
    #[arg(long)]
    fail_every: Option<u64>,
    /// What the bridge outputs when the callback fails
    #[arg(long, value_enum, default_value_t = OnError::PassThrough)]
    on_error: OnError,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    callback: CallbackArgs,
    /// Input device, by case-insensitive name substring
    #[arg(long)]
    input: Option<String>,
    /// Output device, by case-insensitive name substring
    #[arg(long)]
    output: Option<String>,
    #[arg(long)]
    input_index: Option<usize>,
    #[arg(long)]
    output_index: Option<usize>,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Frames per buffer, if the backend allows it
    #[arg(long)]
    block_size: Option<u32>,
    /// Stop after this many seconds instead of waiting for Enter
    #[arg(long)]
    seconds: Option<u64>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    callback: CallbackArgs,
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
    #[arg(long, default_value_t = 2)]
    channels: u16,
    #[arg(long, default_value_t = 1.0)]
    seconds: f32,
    #[arg(long, default_value_t = 512)]
    block_frames: usize,
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnError {
    PassThrough,
    Silence,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::PassThrough => ErrorPolicy::PassThrough,
            OnError::Silence => ErrorPolicy::Silence,
        }
    }
}

/// Linear gain with hard clipping, standing in for a user script.
fn gain_callback(
    db: f32,
    fail_every: Option<u64>,
) -> impl FnMut(&FloatList, &mut FrameCount, &mut FloatList, &mut FrameCount, u32) -> Result<(), ScriptError> + Send + 'static {
    let lin = 10f32.powf(db / 20.0);
    let mut calls = 0u64;
    move |input, _, output, _, _| {
        calls += 1;
        if fail_every.is_some_and(|n| n > 0 && calls % n == 0) {
            return Err(ScriptError::raised("RuntimeError", format!("scheduled failure on call {calls}")));
        }
        for (o, &i) in output.iter_mut().zip(input) {
            *o = (i * lin).clamp(-1.0, 1.0);
        }
        Ok(())
    }
}

fn bridge_for(args: &CallbackArgs) -> Bridge {
    Bridge::new(Runtime::global()).with_config(BridgeConfig { on_error: args.on_error.into() })
}

fn run(args: RunArgs) -> Result<()> {
    let bridge = bridge_for(&args.callback);
    let mut engine = Engine::new(EngineConfig {
        input_name: args.input,
        output_name: args.output,
        input_index: args.input_index,
        output_index: args.output_index,
        sample_rate: args.sample_rate,
        block_size: args.block_size,
    });

    let source = engine.start()?;
    let runtime = Runtime::global();
    let mut lock = runtime.acquire().context("acquiring the execution lock")?;
    source.attach_effect(&mut lock, bridge.wrap(gain_callback(args.callback.gain_db, args.callback.fail_every)));
    // The audio thread needs the lock for every quantum.
    drop(lock);

    match args.seconds {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => {
            println!("streaming, press Enter to stop");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).context("reading stdin")?;
        }
    }

    let mut lock = runtime.acquire().context("acquiring the execution lock")?;
    drop(source.detach_effect(&mut lock));
    drop(lock);
    engine.stop();
    print_stats(&bridge);
    Ok(())
}

fn render(args: RenderArgs) -> Result<()> {
    let bridge = bridge_for(&args.callback);
    let source = SoundSource::new(args.channels)?;
    let runtime = Runtime::global();
    let mut lock = runtime.acquire().context("acquiring the execution lock")?;
    source.attach_effect(&mut lock, bridge.wrap(gain_callback(args.callback.gain_db, args.callback.fail_every)));
    drop(lock);

    let frames = (args.seconds.max(0.0) * args.sample_rate as f32) as usize;
    let ch = usize::from(args.channels);
    let step = std::f32::consts::TAU * args.frequency / args.sample_rate as f32;
    let mut tone = Vec::with_capacity(frames * ch);
    for n in 0..frames {
        let s = 0.5 * (step * n as f32).sin();
        tone.extend(std::iter::repeat(s).take(ch));
    }

    let rendered = render_offline(&source, &tone, args.block_frames)?;
    let peak = rendered.iter().fold(0.0f32, |p, s| p.max(s.abs()));
    let rms = if rendered.is_empty() {
        0.0
    } else {
        (rendered.iter().map(|s| s * s).sum::<f32>() / rendered.len() as f32).sqrt()
    };
    println!(
        "rendered {} frames x {} ch: peak {:.4}, rms {:.4}",
        rendered.len() / ch,
        ch,
        peak,
        rms
    );
    print_stats(&bridge);
    Ok(())
}

fn print_stats(bridge: &Bridge) {
    let s = bridge.stats().snapshot();
    println!(
        "callback: {} invocations, {} failed ({} errors, {} lock failures), {} clamped, on error: {:?}",
        s.invocations,
        s.failures(),
        s.callback_errors,
        s.lock_failures,
        s.clamped,
        bridge.config().on_error
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Devices => fxbridge_engine::devices::print_devices(),
        Command::Run(args) => run(args),
        Command::Render(args) => render(args),
    }
}
