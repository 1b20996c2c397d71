//! Whole-file decoding into interleaved `f32` samples at the device format.

use std::{fs::File, path::Path};

use log::{debug, warn};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::{Hint, ProbeResult},
};

use crate::error::BackendError;

const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Interleaved PCM ready to hand to an output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}

fn probe_file(path: &Path) -> Result<ProbeResult, BackendError> {
    let file = File::open(path)?;
    let media_source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| BackendError::Decode(format!("Failed to probe {}: {}", path.display(), err)))
}

/// Reads the container header only. Returns 0 when the duration is not
/// recorded in the file.
pub fn probe_duration_ms(path: &Path) -> Result<u64, BackendError> {
    let probed = probe_file(path)?;
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| BackendError::Decode("No default track found".to_string()))?;

    let params = &track.codec_params;
    let duration_ms = match (params.n_frames, params.time_base, params.sample_rate) {
        (Some(frames), Some(time_base), _) => {
            let time = time_base.calc_time(frames);
            time.seconds * 1000 + (time.frac * 1000.0) as u64
        }
        (Some(frames), None, Some(rate)) if rate > 0 => frames * 1000 / rate as u64,
        _ => 0,
    };
    Ok(duration_ms)
}

/// Decodes the whole default track of `path`.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, BackendError> {
    let mut probed = probe_file(path)?;
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| BackendError::Decode("No default track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| BackendError::Decode(format!("Failed to create decoder: {}", err)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match probed.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => {
                warn!("Decoder: stopping at read error in {}: {}", path.display(), err);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buffer.samples());
            }
            Err(SymphoniaError::DecodeError(err)) => {
                warn!("Decoder: skipping corrupt packet in {}: {}", path.display(), err);
            }
            Err(err) => {
                return Err(BackendError::Decode(format!(
                    "Failed to decode {}: {}",
                    path.display(),
                    err
                )));
            }
        }
    }

    if channels == 0 {
        return Err(BackendError::Decode(format!(
            "Unknown channel layout in {}",
            path.display()
        )));
    }

    debug!(
        "Decoder: {} decoded ({} samples, {} Hz, {} channels)",
        path.display(),
        samples.len(),
        sample_rate,
        channels
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Splits interleaved samples into `target_channels` planes. Missing
/// channels repeat the source channels, extra source channels are dropped.
pub fn remap_channels(samples: &[f32], source_channels: u16, target_channels: u16) -> Vec<Vec<f32>> {
    let source_channels = source_channels.max(1) as usize;
    let target_channels = target_channels.max(1) as usize;
    let frames = samples.len() / source_channels;

    (0..target_channels)
        .map(|channel| {
            let source_channel = channel % source_channels;
            (0..frames)
                .map(|frame| samples[frame * source_channels + source_channel])
                .collect()
        })
        .collect()
}

pub fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            samples.push(plane[frame]);
        }
    }
    samples
}

/// Converts decoded audio to the output device's rate and channel count.
pub fn convert_for_output(
    audio: DecodedAudio,
    target_sample_rate: u32,
    target_channels: u16,
) -> Result<DecodedAudio, BackendError> {
    if audio.sample_rate == target_sample_rate && audio.channels == target_channels {
        return Ok(audio);
    }

    let planes = remap_channels(&audio.samples, audio.channels, target_channels);
    let planes = if audio.sample_rate == target_sample_rate {
        planes
    } else {
        resample(planes, audio.sample_rate, target_sample_rate)?
    };

    Ok(DecodedAudio {
        samples: interleave(&planes),
        sample_rate: target_sample_rate,
        channels: target_channels,
    })
}

fn resample(
    planes: Vec<Vec<f32>>,
    source_sample_rate: u32,
    target_sample_rate: u32,
) -> Result<Vec<Vec<f32>>, BackendError> {
    let channels = planes.len();
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    let mut resampler = FftFixedIn::<f32>::new(
        source_sample_rate as usize,
        target_sample_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        4,
        channels,
    )
    .map_err(|err| BackendError::Decode(format!("Failed to create resampler: {}", err)))?;

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut offset = 0;
    while offset < frames {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = if offset + needed <= frames {
            planes.iter().map(|plane| &plane[offset..offset + needed]).collect()
        } else {
            planes.iter().map(|plane| &plane[offset..]).collect()
        };
        let processed = if offset + needed <= frames {
            resampler.process(&chunk, None)
        } else {
            resampler.process_partial(Some(chunk.as_slice()), None)
        }
        .map_err(|err| BackendError::Decode(format!("Resampling failed: {}", err)))?;

        for (out, plane) in output.iter_mut().zip(processed) {
            out.extend_from_slice(&plane);
        }
        offset += needed;
    }

    debug!(
        "Decoder: resampled {} frames from {} Hz to {} Hz",
        frames, source_sample_rate, target_sample_rate
    );
    Ok(output)
}
