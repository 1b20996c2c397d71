//! Local-file backend: decodes the whole file up front and plays it through
//! the default CPAL output device.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat,
};
use log::{debug, error, info};

use super::{
    decoder::{convert_for_output, decode_file},
    PlaybackBackend,
};
use crate::error::BackendError;

struct LoadedSource {
    path: PathBuf,
    samples: Arc<Vec<f32>>,
}

pub struct CpalBackend {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    source: Option<LoadedSource>,
    // Index into the interleaved sample buffer, advanced by the output callback
    sample_position: Arc<AtomicUsize>,
    is_playing: Arc<AtomicBool>,
}

impl CpalBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackendError::Device("No output device available".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| BackendError::Device(format!("Error getting device config: {}", err)))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(BackendError::Device(format!(
                "Unsupported output sample format {:?}",
                supported.sample_format()
            )));
        }

        let config: cpal::StreamConfig = supported.into();
        info!(
            "CpalBackend: output device initialized at {} Hz, {} channels",
            config.sample_rate.0, config.channels
        );
        Ok(Self {
            device,
            config,
            stream: None,
            source: None,
            sample_position: Arc::new(AtomicUsize::new(0)),
            is_playing: Arc::new(AtomicBool::new(false)),
        })
    }

    fn samples_per_second(&self) -> u64 {
        self.config.sample_rate.0 as u64 * self.config.channels as u64
    }

    fn ms_to_sample_index(&self, position_ms: u64) -> usize {
        let frame = position_ms * self.config.sample_rate.0 as u64 / 1000;
        (frame * self.config.channels as u64) as usize
    }

    fn load(&mut self, path: &Path) -> Result<Arc<Vec<f32>>, BackendError> {
        if let Some(source) = &self.source {
            if source.path == path {
                return Ok(source.samples.clone());
            }
        }

        let decoded = decode_file(path)?;
        let converted = convert_for_output(decoded, self.config.sample_rate.0, self.config.channels)?;
        let samples = Arc::new(converted.samples);
        self.source = Some(LoadedSource {
            path: path.to_path_buf(),
            samples: samples.clone(),
        });
        Ok(samples)
    }

    fn create_stream(&self, samples: Arc<Vec<f32>>) -> Result<cpal::Stream, BackendError> {
        let sample_position = self.sample_position.clone();
        let is_playing = self.is_playing.clone();

        self.device
            .build_output_stream(
                &self.config,
                move |output_buffer: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !is_playing.load(Ordering::Relaxed) {
                        output_buffer.fill(0.0);
                        return;
                    }

                    let start = sample_position.load(Ordering::Relaxed).min(samples.len());
                    let available = (samples.len() - start).min(output_buffer.len());
                    output_buffer[..available].copy_from_slice(&samples[start..start + available]);
                    output_buffer[available..].fill(0.0);
                    sample_position.store(start + available, Ordering::Relaxed);
                },
                |err| error!("CpalBackend: audio stream error: {}", err),
                None,
            )
            .map_err(|err| BackendError::Stream(format!("Failed to build audio stream: {}", err)))
    }

    fn loaded_len(&self) -> Result<usize, BackendError> {
        self.source
            .as_ref()
            .map(|source| source.samples.len())
            .ok_or(BackendError::NotLoaded)
    }
}

impl PlaybackBackend for CpalBackend {
    fn play(&mut self, source: &Path, start_offset_ms: u64) -> Result<(), BackendError> {
        self.is_playing.store(false, Ordering::Relaxed);
        self.stream = None;

        let samples = self.load(source)?;
        let start = self.ms_to_sample_index(start_offset_ms).min(samples.len());
        self.sample_position.store(start, Ordering::Relaxed);

        let stream = self.create_stream(samples)?;
        self.is_playing.store(true, Ordering::Relaxed);
        stream
            .play()
            .map_err(|err| BackendError::Stream(format!("Failed to start playback: {}", err)))?;
        self.stream = Some(stream);
        debug!(
            "CpalBackend: playing {} from {} ms",
            source.display(),
            start_offset_ms
        );
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BackendError> {
        let stream = self.stream.as_ref().ok_or(BackendError::NotLoaded)?;
        self.is_playing.store(false, Ordering::Relaxed);
        stream
            .pause()
            .map_err(|err| BackendError::Stream(format!("Failed to pause: {}", err)))
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        let stream = self.stream.as_ref().ok_or(BackendError::NotLoaded)?;
        self.is_playing.store(true, Ordering::Relaxed);
        stream
            .play()
            .map_err(|err| BackendError::Stream(format!("Failed to resume: {}", err)))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.is_playing.store(false, Ordering::Relaxed);
        self.stream = None;
        self.sample_position.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<(), BackendError> {
        let len = self.loaded_len()?;
        let channels = self.config.channels.max(1) as usize;
        // Keep the index frame aligned so channels never swap
        let index = self.ms_to_sample_index(position_ms).min(len) / channels * channels;
        self.sample_position.store(index, Ordering::Relaxed);
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        let per_second = self.samples_per_second();
        if per_second == 0 || self.stream.is_none() {
            return 0;
        }
        self.sample_position.load(Ordering::Relaxed) as u64 * 1000 / per_second
    }

    fn duration_ms(&self) -> u64 {
        let per_second = self.samples_per_second();
        match (&self.source, per_second) {
            (Some(source), per_second) if per_second > 0 => {
                source.samples.len() as u64 * 1000 / per_second
            }
            _ => 0,
        }
    }

    fn has_ended_naturally(&self) -> bool {
        match (&self.stream, self.loaded_len()) {
            (Some(_), Ok(len)) => self.sample_position.load(Ordering::Relaxed) >= len,
            _ => false,
        }
    }
}
