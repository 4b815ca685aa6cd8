use std::io::Cursor;

use anyhow::{ensure, Context, Result};

/// Peak level after normalization, -1 dBFS
const TARGET_PEAK: f32 = 0.891;

struct Clip {
    spec: hound::WavSpec,
    samples: Vec<f32>,
}

/// Decode a WAV clip to interleaved f32 samples in -1.0..=1.0
fn decode(wav: &[u8]) -> Result<Clip> {
    let reader = hound::WavReader::new(Cursor::new(wav)).context("Reading WAV header")?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(Clip { spec, samples })
}

/// Join speech clips into one WAV with `gap_ms` of silence between them,
/// then normalize the peak to -1 dBFS.
///
/// All clips must share a sample rate and channel count.
pub fn master(clips: &[Vec<u8>], gap_ms: u32) -> Result<Vec<u8>> {
    ensure!(!clips.is_empty(), "No audio to master");
    let decoded = clips
        .iter()
        .map(|c| decode(c))
        .collect::<Result<Vec<_>>>()?;
    let first = decoded[0].spec;
    ensure!(
        decoded.iter().all(|c| c.spec.sample_rate == first.sample_rate
            && c.spec.channels == first.channels),
        "Speech clips have mismatched formats"
    );

    let gap = (u64::from(gap_ms) * u64::from(first.sample_rate) / 1000) as usize
        * usize::from(first.channels);
    let mut samples = Vec::with_capacity(
        decoded.iter().map(|c| c.samples.len()).sum::<usize>() + gap * decoded.len(),
    );
    for (i, clip) in decoded.iter().enumerate() {
        if i > 0 {
            samples.extend(std::iter::repeat(0.0).take(gap));
        }
        samples.extend_from_slice(&clip.samples);
    }

    let peak = samples.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
    let gain = if peak > 0.0 { TARGET_PEAK / peak } else { 1.0 };

    let spec = hound::WavSpec {
        channels: first.channels,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for s in samples {
            let scaled = (s * gain).clamp(-1.0, 1.0) * f32::from(i16::MAX);
            writer.write_sample(scaled as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
