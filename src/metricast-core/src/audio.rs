//! WAV duration and concatenation utilities for the finalizer.

use chrono::Local;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::PodcastError;
use crate::state::AudioSegment;

/// Duration of one WAV file in seconds. A corrupt or unreadable segment
/// contributes zero and is logged rather than failing the run.
pub fn wav_duration(path: &Path) -> f64 {
    match WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.sample_rate == 0 {
                return 0.0;
            }
            let frames = reader.duration();
            frames as f64 / spec.sample_rate as f64
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read segment duration");
            0.0
        }
    }
}

/// Total duration of all segments, in speaking order.
pub fn total_duration(segments: &[AudioSegment]) -> f64 {
    segments.iter().map(|s| wav_duration(&s.path)).sum()
}

fn describe_spec(spec: &WavSpec) -> String {
    format!(
        "{} Hz, {} ch, {} bit",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    )
}

/// Alternate destination used when the configured output path is locked or
/// otherwise unwritable.
fn alternate_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "wav".to_string());
    let stamped = format!("{}{}.{}", stem, Local::now().format("%Y%m%d%H%M%S"), ext);
    path.with_file_name(stamped)
}

/// Concatenate audio segments into one file at `output_path`.
///
/// Precondition: every segment shares the first segment's sample rate,
/// channel count, and sample width; the first mismatching segment fails the
/// run by name. If the destination cannot be created, the output falls back
/// to a timestamp-suffixed sibling path instead of failing.
pub fn concatenate(segments: &[AudioSegment], output_path: &Path) -> Result<PathBuf, PodcastError> {
    let Some(first) = segments.first() else {
        return Err(PodcastError::NoSegments);
    };

    let spec = WavReader::open(&first.path)?.spec();

    // Verify every segment before writing anything.
    for segment in segments {
        let segment_spec = WavReader::open(&segment.path)?.spec();
        if segment_spec.sample_rate != spec.sample_rate
            || segment_spec.channels != spec.channels
            || segment_spec.bits_per_sample != spec.bits_per_sample
            || segment_spec.sample_format != spec.sample_format
        {
            return Err(PodcastError::FormatMismatch {
                segment: segment.path.display().to_string(),
                expected: describe_spec(&spec),
                actual: describe_spec(&segment_spec),
            });
        }
    }

    let (final_path, mut writer) = match WavWriter::create(output_path, spec) {
        Ok(writer) => (output_path.to_path_buf(), writer),
        Err(hound::Error::IoError(e)) => {
            let alt = alternate_path(output_path);
            warn!(
                original = %output_path.display(),
                fallback = %alt.display(),
                error = %e,
                "output path unwritable; using fallback"
            );
            (alt.clone(), WavWriter::create(&alt, spec)?)
        }
        Err(e) => return Err(e.into()),
    };

    for segment in segments {
        let mut reader = WavReader::open(&segment.path)?;
        match spec.sample_format {
            SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
            }
            SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
            }
        }
    }
    writer.finalize()?;

    Ok(final_path)
}
