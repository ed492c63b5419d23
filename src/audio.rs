//! Audio codec collaborator (§6.1): probe bit depth/channels/duration/
//! sampling rate from a file header, read to a 2-D float signal, write
//! with a chosen bit depth, remix channels, and resample.
//!
//! Grounded in the teacher's existing `symphonia` (FLAC decode, `flac`
//! feature already enabled) and `flacenc` (FLAC encode) dependencies; WAV
//! and resampling have no teacher equivalent and are adopted from the
//! wider pack's `hound`/`rubato` pairing (`dividebysandwich-rusty-pipes`,
//! `Bojan20-reelforge-standalone`).

use std::fs::File;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("flac decode error: {0}")]
    FlacDecode(String),
    #[error("flac encode error: {0}")]
    FlacEncode(String),
    #[error("resample error: {0}")]
    Resample(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub bit_depth: u16,
    pub channels: u16,
    pub duration: f64,
    pub sampling_rate: u32,
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Probe bit depth, channel count, duration, and sampling rate from the
/// file header only (no full decode).
pub fn probe(path: &Path) -> Result<AudioInfo, AudioError> {
    match extension(path).as_str() {
        "wav" => probe_wav(path),
        "flac" => probe_flac(path),
        other => Err(AudioError::UnsupportedFormat(other.to_string())),
    }
}

fn probe_wav(path: &Path) -> Result<AudioInfo, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let duration = reader.duration() as f64 / spec.sample_rate as f64;
    Ok(AudioInfo {
        bit_depth: spec.bits_per_sample,
        channels: spec.channels,
        duration,
        sampling_rate: spec.sample_rate,
    })
}

fn probe_flac(path: &Path) -> Result<AudioInfo, AudioError> {
    use symphonia::core::codecs::CODEC_TYPE_NULL;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("flac");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::FlacDecode(e.to_string()))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::FlacDecode("no audio track".to_string()))?;

    let params = &track.codec_params;
    let sampling_rate = params.sample_rate.unwrap_or(0);
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let bit_depth = params.bits_per_sample.unwrap_or(16) as u16;
    let n_frames = params.n_frames.unwrap_or(0);
    let duration = if sampling_rate > 0 {
        n_frames as f64 / sampling_rate as f64
    } else {
        0.0
    };

    Ok(AudioInfo {
        bit_depth,
        channels,
        duration,
        sampling_rate,
    })
}

/// Read a file to a 2-D signal (outer = channel, inner = sample, `f32` in
/// `[-1, 1]`) plus its sampling rate.
pub fn read_signal(path: &Path) -> Result<(Vec<Vec<f32>>, u32), AudioError> {
    match extension(path).as_str() {
        "wav" => read_wav(path),
        "flac" => read_flac(path),
        other => Err(AudioError::UnsupportedFormat(other.to_string())),
    }
}

fn read_wav(path: &Path) -> Result<(Vec<Vec<f32>>, u32), AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let mut planes = vec![Vec::new(); channels];

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for (i, sample) in reader.samples::<i32>().enumerate() {
                planes[i % channels].push(sample? as f32 / max);
            }
        }
        hound::SampleFormat::Float => {
            for (i, sample) in reader.samples::<f32>().enumerate() {
                planes[i % channels].push(sample?);
            }
        }
    }

    Ok((planes, spec.sample_rate))
}

fn read_flac(path: &Path) -> Result<(Vec<Vec<f32>>, u32), AudioError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("flac");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::FlacDecode(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::FlacDecode("no audio track".to_string()))?
        .clone();

    let track_id = track.id;
    let sampling_rate = track.codec_params.sample_rate.unwrap_or(0);
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::FlacDecode(e.to_string()))?;

    let mut planes: Vec<Vec<f32>> = vec![Vec::new(); channels];

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(e) => return Err(AudioError::FlacDecode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| AudioError::FlacDecode(e.to_string()))?;
        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        for (i, sample) in sample_buf.samples().iter().enumerate() {
            planes[i % channels].push(*sample);
        }
    }

    Ok((planes, sampling_rate))
}

/// Write a 2-D signal to `path`, choosing the encoder from its extension.
pub fn write_signal(
    path: &Path,
    signal: &[Vec<f32>],
    sampling_rate: u32,
    bit_depth: u16,
) -> Result<(), AudioError> {
    match extension(path).as_str() {
        "wav" => write_wav(path, signal, sampling_rate, bit_depth),
        "flac" => write_flac(path, signal, sampling_rate, bit_depth),
        other => Err(AudioError::UnsupportedFormat(other.to_string())),
    }
}

fn write_wav(
    path: &Path,
    signal: &[Vec<f32>],
    sampling_rate: u32,
    bit_depth: u16,
) -> Result<(), AudioError> {
    let channels = signal.len().max(1) as u16;
    let spec = hound::WavSpec {
        channels,
        sample_rate: sampling_rate,
        bits_per_sample: bit_depth,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let max = (1i64 << (bit_depth - 1)) as f32 - 1.0;
    let frames = signal.first().map(|c| c.len()).unwrap_or(0);
    for frame in 0..frames {
        for channel in signal {
            let clamped = channel[frame].clamp(-1.0, 1.0);
            writer.write_sample((clamped * max) as i32)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn write_flac(
    path: &Path,
    signal: &[Vec<f32>],
    sampling_rate: u32,
    bit_depth: u16,
) -> Result<(), AudioError> {
    use flacenc::component::BitRepr;
    use flacenc::config::Encoder as EncoderConfig;
    use flacenc::error::Verify;
    use flacenc::source::MemSource;

    let channels = signal.len().max(1);
    let frames = signal.first().map(|c| c.len()).unwrap_or(0);
    let max = (1i64 << (bit_depth - 1)) as f32 - 1.0;

    let mut interleaved = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for channel in signal {
            interleaved.push((channel[frame].clamp(-1.0, 1.0) * max) as i32);
        }
    }

    let config = EncoderConfig::default()
        .into_verified()
        .map_err(|e| AudioError::FlacEncode(format!("{e:?}")))?;
    let source = MemSource::from_samples(&interleaved, channels, bit_depth as usize, sampling_rate as usize);
    let flac_stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| AudioError::FlacEncode(format!("{e:?}")))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    flac_stream
        .write(&mut sink)
        .map_err(|e| AudioError::FlacEncode(format!("{e:?}")))?;
    std::fs::write(path, sink.as_slice())?;
    Ok(())
}

/// Channel selection + mixdown, matching `audresample.remix`'s contract:
/// select the given 0-based channel indices (repeating existing channels
/// to satisfy an index beyond the source's channel count), then mix down
/// to mono if requested.
pub fn remix(signal: &[Vec<f32>], channels: Option<&[usize]>, mixdown: bool) -> Vec<Vec<f32>> {
    let source_channels = signal.len().max(1);
    let selected: Vec<Vec<f32>> = match channels {
        Some(indices) => indices
            .iter()
            .map(|&idx| signal[idx % source_channels].clone())
            .collect(),
        None => signal.to_vec(),
    };

    if !mixdown || selected.len() < 2 {
        return selected;
    }

    let frames = selected[0].len();
    let mut mono = vec![0.0f32; frames];
    for channel in &selected {
        for (i, sample) in channel.iter().enumerate() {
            mono[i] += sample;
        }
    }
    let n = selected.len() as f32;
    for sample in &mut mono {
        *sample /= n;
    }
    vec![mono]
}

/// Resample every channel from `from_rate` to `to_rate` with `rubato`.
pub fn resample(signal: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>, AudioError> {
    if from_rate == to_rate || signal.is_empty() {
        return Ok(signal.to_vec());
    }

    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = signal[0].len().max(1);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, signal.len())
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let waves_in: Vec<Vec<f32>> = signal.to_vec();
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    Ok(waves_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trips_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let signal = vec![vec![0.0f32, 0.5, -0.5, 0.25]; 2];
        write_signal(&path, &signal, 16_000, 16).unwrap();

        let info = probe(&path).unwrap();
        assert_eq!(info.sampling_rate, 16_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bit_depth, 16);

        let (read_back, rate) = read_signal(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].len(), 4);
    }

    #[test]
    fn remix_selects_and_mixes_down() {
        let signal = vec![vec![1.0, 1.0], vec![-1.0, -1.0]];
        let stereo_to_left = remix(&signal, Some(&[0]), false);
        assert_eq!(stereo_to_left, vec![vec![1.0, 1.0]]);

        let mono = remix(&signal, None, true);
        assert_eq!(mono, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn remix_upmixes_by_repeating_channels() {
        let mono = vec![vec![0.3, 0.4]];
        let stereo = remix(&mono, Some(&[0, 1]), false);
        assert_eq!(stereo, vec![vec![0.3, 0.4], vec![0.3, 0.4]]);
    }
}
