//! Flavor engine (C3): canonical audio re-encoding and its deterministic
//! identity.
//!
//! Grounded on `original_source/audb/core/flavor.py`'s `Flavor` class:
//! the same validation rules, `_check_convert`/`_remix`/`_resample`
//! pipeline and `path`/`destination`/`short_id` helpers, reimplemented
//! over the [`crate::audio`] module instead of `audiofile`/`audresample`.

use std::path::Path;

use md5::{Digest, Md5};
use thiserror::Error;

use crate::audio::{self, AudioError};
use crate::define;

#[derive(Error, Debug)]
pub enum FlavorError {
    #[error(
        "bit depth has to be one of {:?}, not {0}", define::BIT_DEPTHS
    )]
    InvalidBitDepth(u16),
    #[error(
        "sampling rate has to be one of {:?}, not {0}", define::SAMPLING_RATES
    )]
    InvalidSamplingRate(u32),
    #[error("format has to be one of {:?}, not '{0}'", define::FORMATS)]
    InvalidFormat(String),
    #[error(
        "extension of output file is '{0}', but should be '{1}' to match the format of the flavor"
    )]
    ExtensionMismatch(String, String),
    #[error(
        "you have to specify the 'format' argument to convert '{0}' to the specified flavor as we cannot write {1} files"
    )]
    MissingFormat(String, String),
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
}

/// Database flavor: the audio re-encoding a loaded database's media files
/// should satisfy. `None` fields mean "leave as published".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Flavor {
    pub bit_depth: Option<u16>,
    pub channels: Option<Vec<usize>>,
    pub format: Option<String>,
    pub mixdown: bool,
    pub sampling_rate: Option<u32>,
}

impl Flavor {
    pub fn new(
        bit_depth: Option<u16>,
        channels: Option<Vec<usize>>,
        format: Option<String>,
        mixdown: bool,
        sampling_rate: Option<u32>,
    ) -> Result<Self, FlavorError> {
        if let Some(bd) = bit_depth {
            if !define::BIT_DEPTHS.contains(&bd) {
                return Err(FlavorError::InvalidBitDepth(bd));
            }
        }
        if let Some(sr) = sampling_rate {
            if !define::SAMPLING_RATES.contains(&sr) {
                return Err(FlavorError::InvalidSamplingRate(sr));
            }
        }
        if let Some(fmt) = &format {
            if !define::FORMATS.contains(&fmt.as_str()) {
                return Err(FlavorError::InvalidFormat(fmt.clone()));
            }
        }
        // a mixdown only makes sense with at least two channels selected
        let mixdown = match &channels {
            Some(c) if c.len() < 2 => false,
            _ => mixdown,
        };

        Ok(Flavor {
            bit_depth,
            channels,
            format,
            mixdown,
            sampling_rate,
        })
    }

    /// Is this the identity flavor (no conversion requested at all)?
    pub fn is_trivial(&self) -> bool {
        self.bit_depth.is_none()
            && self.channels.is_none()
            && self.format.is_none()
            && !self.mixdown
            && self.sampling_rate.is_none()
    }

    /// Path an output file would have once converted to this flavor's
    /// format (extension swap only, no re-encode).
    pub fn destination(&self, file: &str) -> String {
        match &self.format {
            Some(format) => {
                let ext = extension(file);
                if ext != *format {
                    let stem = &file[..file.len() - ext.len()];
                    format!("{stem}{format}")
                } else {
                    file.to_string()
                }
            }
            None => file.to_string(),
        }
    }

    /// Relative cache path segment: `<name>/<version>/<short_id>`.
    pub fn path(&self, name: &str, version: &str) -> String {
        format!("{name}/{version}/{}", self.short_id())
    }

    /// Deterministic identifier derived from the normalized flavor
    /// arguments (the same canonicalization the constructor already
    /// applied to `mixdown`).
    pub fn id(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("bit_depth={:?}", self.bit_depth));
        hasher.update(format!("channels={:?}", self.channels));
        hasher.update(format!("format={:?}", self.format));
        hasher.update(format!("mixdown={}", self.mixdown));
        hasher.update(format!("sampling_rate={:?}", self.sampling_rate));
        hex::encode(hasher.finalize())
    }

    /// Last eight characters of [`Self::id`], used for cache paths.
    pub fn short_id(&self) -> String {
        let id = self.id();
        id[id.len() - 8..].to_string()
    }

    fn check_convert(&self, file: &Path) -> Result<(bool, audio::AudioInfo), FlavorError> {
        let format = extension(&file.to_string_lossy());
        let info = audio::probe(file)?;

        if let Some(want) = &self.format {
            if want != &format {
                return Ok((true, info));
            }
        }

        let mut convert = false;

        if let Some(bd) = self.bit_depth {
            if bd != info.bit_depth {
                convert = true;
            }
        }

        if !convert && (self.mixdown || self.channels.is_some()) {
            if self.mixdown && info.channels != 1 {
                convert = true;
            } else if let Some(channels) = &self.channels {
                let identity: Vec<usize> = (0..info.channels as usize).collect();
                if *channels != identity {
                    convert = true;
                }
            }
        }

        if !convert {
            if let Some(sr) = self.sampling_rate {
                if sr != info.sampling_rate {
                    convert = true;
                }
            }
        }

        if convert && !define::FORMATS.contains(&format.as_str()) {
            return Err(FlavorError::MissingFormat(
                file.display().to_string(),
                format.to_uppercase(),
            ));
        }

        Ok((convert, info))
    }

    /// Convert `src_path` to this flavor, writing the result to `dst_path`.
    /// Copies the file unchanged when it already satisfies the flavor.
    pub fn apply(&self, src_path: &Path, dst_path: &Path) -> Result<(), FlavorError> {
        let src_ext = extension(&src_path.to_string_lossy());
        let dst_ext = extension(&dst_path.to_string_lossy());
        let expected_ext = self.format.clone().unwrap_or_else(|| src_ext.clone());
        if expected_ext != dst_ext {
            return Err(FlavorError::ExtensionMismatch(dst_ext, expected_ext));
        }

        let (convert, src_info) = self.check_convert(src_path)?;
        if !convert {
            if src_path != dst_path {
                std::fs::copy(src_path, dst_path).map_err(AudioError::Io)?;
            }
            return Ok(());
        }

        let (mut signal, mut sampling_rate) = audio::read_signal(src_path)?;
        if self.channels.is_some() || self.mixdown {
            signal = audio::remix(&signal, self.channels.as_deref(), self.mixdown);
        }
        if let Some(target_rate) = self.sampling_rate {
            if target_rate != sampling_rate {
                signal = audio::resample(&signal, sampling_rate, target_rate)?;
                sampling_rate = target_rate;
            }
        }
        let bit_depth = self.bit_depth.unwrap_or(src_info.bit_depth);
        audio::write_signal(dst_path, &signal, sampling_rate, bit_depth)?;
        Ok(())
    }
}

fn extension(file: &str) -> String {
    Path::new(file)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
