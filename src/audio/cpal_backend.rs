use crate::audio::AudioBackend;
use crate::error::{Error, Fault, Result};
use crate::runtime::{EngineStats, NativeSynth};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use parking_lot::Mutex;
use std::sync::Arc;

/// Output through cpal. The engine is injected at construction; the stream
/// callback only ever `try_lock`s it, so a busy engine costs one silent buffer
/// instead of a blocked audio thread.
pub struct CpalBackend {
    stream: Option<Stream>,
    engine: Arc<Mutex<NativeSynth>>,
    stats: Arc<EngineStats>,
    sample_rate: u32,
}

impl CpalBackend {
    pub fn new(engine: Arc<Mutex<NativeSynth>>, sample_rate: u32) -> Self {
        let stats = Arc::clone(engine.lock().stats());
        Self {
            stream: None,
            engine,
            stats,
            sample_rate,
        }
    }

    fn select_output_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
        let Some(wanted) = name else {
            return host.default_output_device().ok_or(Error::NoOutputDevice);
        };
        for device in host.output_devices()? {
            if device.name()? == wanted {
                return Ok(device);
            }
        }
        Err(Error::DeviceNotFound(wanted.to_string()))
    }

    /// Names of every output device on the default host.
    pub fn device_names() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.output_devices()? {
            names.push(device.name()?);
        }
        Ok(names)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, device: Option<&str>, channels: u16, frames: u32) -> Result<()> {
        self.close();

        let host = cpal::default_host();
        let device = Self::select_output_device(&host, device)?;
        let device_name = device.name().unwrap_or_default();

        let supported_config = device.default_output_config()?;
        if supported_config.sample_format() != SampleFormat::F32 {
            return Err(Error::InvalidConfig(format!(
                "unsupported sample format {:?}",
                supported_config.sample_format()
            )));
        }
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames),
        };

        let engine = Arc::clone(&self.engine);
        let stats = Arc::clone(&self.stats);
        let channels = channels as usize;
        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match engine.try_lock() {
                Some(mut engine) => engine.process(data, channels),
                None => {
                    data.fill(0.0);
                    stats.record_fault(Fault::EngineBusy);
                }
            },
            |err| tracing::error!(error = %err, "Audio stream error"),
            None,
        )?;

        tracing::info!(
            device = %device_name,
            sample_rate = self.sample_rate,
            channels,
            frames,
            "Opened audio output"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        // dropping the stream waits for the callback in flight
        if self.stream.take().is_some() {
            tracing::info!("Closed audio output");
        }
    }

    fn start(&mut self) -> Result<()> {
        self.stream.as_ref().ok_or(Error::StreamNotOpen)?.play()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stream.as_ref().ok_or(Error::StreamNotOpen)?.pause()?;
        Ok(())
    }
}
