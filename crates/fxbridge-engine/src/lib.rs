pub mod bridge;
pub mod devices;
pub mod error;
pub mod processor;
pub mod render;
pub mod source;

pub use bridge::{wrap, Bridge, BridgeConfig, BridgeStats, ErrorPolicy, StatsSnapshot};
pub use error::EngineError;
pub use processor::{EffectProcessor, ProcessFn, ReleaseFn};
pub use render::render_offline;
pub use source::SoundSource;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub input_name: Option<String>,       // match by substring (case-insensitive)
    pub output_name: Option<String>,
    pub input_index: Option<usize>,       // explicit index from device list
    pub output_index: Option<usize>,
    pub sample_rate: Option<u32>,         // e.g., 48000
    pub block_size: Option<u32>,          // frames per buffer (if backend supports)
}

/// A live duplex stream: input device → [`SoundSource`] → output device.
pub struct Engine {
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
    source: Option<Arc<SoundSource>>,
    cfg: EngineConfig,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self { input_stream: None, output_stream: None, source: None, cfg }
    }

    /// The running source, for attaching and detaching effects.
    pub fn source(&self) -> Option<Arc<SoundSource>> {
        self.source.clone()
    }

    /// Open both devices and start streaming. Returns the source the input
    /// is fed through; it starts with no effect attached.
    pub fn start(&mut self) -> Result<Arc<SoundSource>> {
        let host = cpal::default_host();

        let in_dev  = pick_device(&host, true,  self.cfg.input_name.as_deref(), self.cfg.input_index)?
            .context("No input device matched (and no default available)")?;
        let out_dev = pick_device(&host, false, self.cfg.output_name.as_deref(), self.cfg.output_index)?
            .context("No output device matched (and no default available)")?;

        let in_cfg_any  = in_dev.default_input_config().context("No default input config")?;
        let out_cfg_any = out_dev.default_output_config().context("No default output config")?;

        let mut in_cfg  = in_cfg_any.config();
        let mut out_cfg = out_cfg_any.config();

        // Honor sample_rate/block_size if provided (best-effort)
        if let Some(sr) = self.cfg.sample_rate {
            out_cfg.sample_rate = cpal::SampleRate(sr);
        }
        if let Some(bs) = self.cfg.block_size {
            out_cfg.buffer_size = cpal::BufferSize::Fixed(bs);
            in_cfg.buffer_size  = cpal::BufferSize::Fixed(bs);
        }

        // The source sees one interleaved layout for both sides.
        in_cfg.channels    = out_cfg.channels;
        in_cfg.sample_rate = out_cfg.sample_rate;

        let source = Arc::new(SoundSource::new(out_cfg.channels)?);

        let cap_frames = match out_cfg.buffer_size {
            cpal::BufferSize::Fixed(n) => (n as usize) * 8,
            _ => 4096,
        };
        let cap = (cap_frames * out_cfg.channels as usize).max(1024);
        let (tx, rx) = RingBuffer::<f32>::new(cap);

        tracing::info!(
            input = %in_dev.name().unwrap_or_default(),
            output = %out_dev.name().unwrap_or_default(),
            channels = out_cfg.channels,
            sample_rate = out_cfg.sample_rate.0,
            "starting duplex stream"
        );

        let input_stream = match in_cfg_any.sample_format() {
            cpal::SampleFormat::F32 => build_input::<f32>(&in_dev, &in_cfg, source.clone(), tx, cap)?,
            cpal::SampleFormat::I16 => build_input::<i16>(&in_dev, &in_cfg, source.clone(), tx, cap)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&in_dev, &in_cfg, source.clone(), tx, cap)?,
            other => return Err(anyhow!("Unsupported input format: {other:?}")),
        };
        let output_stream = match out_cfg_any.sample_format() {
            cpal::SampleFormat::F32 => build_output::<f32>(&out_dev, &out_cfg, rx)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&out_dev, &out_cfg, rx)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&out_dev, &out_cfg, rx)?,
            other => return Err(anyhow!("Unsupported output format: {other:?}")),
        };

        input_stream.play().context("Failed to play input stream")?;
        output_stream.play().context("Failed to play output stream")?;

        self.input_stream  = Some(input_stream);
        self.output_stream = Some(output_stream);
        self.source = Some(source.clone());
        Ok(source)
    }

    /// Stop both streams. The source and any attached effect survive until
    /// the last `Arc` to the source is dropped.
    pub fn stop(&mut self) {
        self.input_stream  = None;
        self.output_stream = None;
        self.source = None;
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    source: Arc<SoundSource>,
    mut tx: Producer<f32>,
    capacity: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    // Reused across callbacks; they only grow if the backend hands us a
    // block larger than the ring.
    let mut scratch_in = Vec::<f32>::with_capacity(capacity);
    let mut scratch_out = vec![0.0f32; capacity];

    let stream = device.build_input_stream::<T, _, _>(
        config,
        move |data: &[T], _| {
            scratch_in.clear();
            scratch_in.extend(data.iter().map(|&s| f32::from_sample(s)));
            if scratch_out.len() < scratch_in.len() {
                scratch_out.resize(scratch_in.len(), 0.0);
            }
            let out = &mut scratch_out[..scratch_in.len()];

            let produced = match source.process(&scratch_in, out) {
                Ok(frames) => frames * source.channel_count() as usize,
                Err(err) => {
                    tracing::error!(%err, "dropping input block");
                    return;
                }
            };
            if tx.slots() < produced {
                tracing::debug!(produced, free = tx.slots(), "output ring full, dropping block");
                return;
            }
            for &s in &out[..produced] {
                let _ = tx.push(s);
            }
        },
        move |err| tracing::error!(?err, "input stream error"),
        None,
    )?;
    Ok(stream)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut rx: Consumer<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let silence = T::from_sample(0.0f32);
    let stream = device.build_output_stream::<T, _, _>(
        config,
        move |out: &mut [T], _| {
            // Underruns emit silence rather than stale data.
            if rx.slots() < out.len() {
                out.fill(silence);
                return;
            }
            for o in out.iter_mut() {
                *o = rx.pop().map_or(silence, T::from_sample);
            }
        },
        move |err| tracing::error!(?err, "output stream error"),
        None,
    )?;
    Ok(stream)
}

/* ---------- device picking (by name or index) ---------- */

fn can_stream(dev: &cpal::Device, want_input: bool) -> bool {
    if want_input {
        dev.default_input_config().is_ok()
    } else {
        dev.default_output_config().is_ok()
    }
}

fn pick_device(
    host: &cpal::Host,
    want_input: bool,
    name_substr: Option<&str>,
    index: Option<usize>,
) -> Result<Option<cpal::Device>> {
    // Indices count only devices usable in the wanted direction.
    if let Some(idx) = index {
        if let Some(dev) = host.devices()?.filter(|d| can_stream(d, want_input)).nth(idx) {
            return Ok(Some(dev));
        }
        tracing::warn!(idx, want_input, "no device at index, falling back");
    }

    if let Some(q) = name_substr {
        let q = q.to_lowercase();
        let found = host.devices()?.find(|dev| {
            dev.name().map(|n| n.to_lowercase().contains(&q)).unwrap_or(false)
                && can_stream(dev, want_input)
        });
        if found.is_some() {
            return Ok(found);
        }
    }

    Ok(if want_input { host.default_input_device() } else { host.default_output_device() })
}
