use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use jpeg_encoder::{ColorType, Encoder as JpegEncoder, EncodingError, SamplingFactor};

use crate::error::CompressionError;
use crate::paths::scratch_path;

pub const QUALITY_CEILING: u8 = 95;
pub const QUALITY_FLOOR: u8 = 10;
const FULL_CHROMA_MIN_QUALITY: u8 = 90;
const STEP_SCALE: f64 = 20.0;

/// Result of [`compress_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Source already fit the budget and was copied byte for byte.
    FastCopy { bytes: u64 },
    /// Source was decoded and re-encoded as JPEG. `qualities` lists every
    /// quality tried, in order; the last one produced the output.
    Reencoded {
        bytes: u64,
        final_quality: u8,
        qualities: Vec<u8>,
        within_budget: bool,
    },
}

impl CompressionOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            CompressionOutcome::FastCopy { bytes } => *bytes,
            CompressionOutcome::Reencoded { bytes, .. } => *bytes,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompressionOutcome::FastCopy { .. } => "fast_copy",
            CompressionOutcome::Reencoded { .. } => "reencoded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaSubsampling {
    /// 4:4:4, no colour resolution lost.
    Full,
    /// 4:2:0.
    Half,
}

impl ChromaSubsampling {
    pub fn for_quality(quality: u8) -> Self {
        if quality >= FULL_CHROMA_MIN_QUALITY {
            ChromaSubsampling::Full
        } else {
            ChromaSubsampling::Half
        }
    }

    fn sampling_factor(self) -> SamplingFactor {
        match self {
            ChromaSubsampling::Full => SamplingFactor::R_4_4_4,
            ChromaSubsampling::Half => SamplingFactor::R_4_2_0,
        }
    }
}

/// Encoder settings tried for one quality step, in order. A failure with
/// optimized Huffman tables is retried once with the standard tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeProfile {
    OptimizedHuffman,
    Baseline,
}

/// Quality for the next attempt after an encode of `actual` bytes missed
/// `target`. The step grows with the relative overshoot and is at least 1;
/// the result never drops below [`QUALITY_FLOOR`].
pub fn next_quality(current: u8, actual: u64, target: u64) -> u8 {
    let overshoot = actual.saturating_sub(target) as f64 / target.max(1) as f64;
    let step = ((overshoot * STEP_SCALE).round() as i64).max(1);
    let next = (i64::from(current) - step).max(i64::from(QUALITY_FLOOR));
    next as u8
}

/// Writes `output_path` at or below `target_bytes` when reachable.
///
/// Sources already within budget are copied verbatim, whatever their format.
/// Everything else is flattened to opaque RGB and re-encoded as JPEG,
/// starting at [`QUALITY_CEILING`] and stepping down until the file fits or
/// [`QUALITY_FLOOR`] has been tried.
pub fn compress_image(
    input_path: &Path,
    output_path: &Path,
    target_bytes: u64,
) -> Result<CompressionOutcome, CompressionError> {
    let source_bytes = fs::metadata(input_path)
        .map_err(|err| CompressionError::io(input_path, err))?
        .len();
    if source_bytes <= target_bytes {
        fs::copy(input_path, output_path).map_err(|err| CompressionError::io(output_path, err))?;
        return Ok(CompressionOutcome::FastCopy {
            bytes: source_bytes,
        });
    }

    let rgb = load_opaque_rgb(input_path)?;
    let (width, height) = jpeg_dimensions(&rgb)?;
    let scratch = ScratchFile::new(scratch_path(output_path));

    let mut quality = QUALITY_CEILING;
    let mut qualities = Vec::new();
    let bytes = loop {
        encode_jpeg(&rgb, width, height, quality, scratch.path())?;
        qualities.push(quality);
        let size = fs::metadata(scratch.path())
            .map_err(|err| CompressionError::io(scratch.path(), err))?
            .len();
        if size <= target_bytes || quality <= QUALITY_FLOOR {
            break size;
        }
        quality = next_quality(quality, size, target_bytes);
    };

    replace_file(scratch.path(), output_path)?;
    Ok(CompressionOutcome::Reencoded {
        bytes,
        final_quality: quality,
        qualities,
        within_budget: bytes <= target_bytes,
    })
}

fn load_opaque_rgb(path: &Path) -> Result<RgbImage, CompressionError> {
    let image = image::open(path).map_err(|source| CompressionError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if !image.color().has_alpha() {
        return Ok(image.to_rgb8());
    }

    // JPEG has no alpha; composite onto white.
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    Ok(flattened)
}

fn jpeg_dimensions(image: &RgbImage) -> Result<(u16, u16), CompressionError> {
    let (width, height) = image.dimensions();
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(CompressionError::Dimensions { width, height }),
    }
}

fn encode_jpeg(
    image: &RgbImage,
    width: u16,
    height: u16,
    quality: u8,
    path: &Path,
) -> Result<(), CompressionError> {
    let optimized =
        encode_with_profile(image, width, height, quality, EncodeProfile::OptimizedHuffman);
    let bytes = match optimized {
        Ok(bytes) => bytes,
        Err(err) => {
            log::debug!(
                "jpeg encode with optimized tables failed at quality {quality}, retrying baseline: {err}"
            );
            encode_with_profile(image, width, height, quality, EncodeProfile::Baseline)
                .map_err(|source| CompressionError::Encode { quality, source })?
        }
    };
    fs::write(path, bytes).map_err(|err| CompressionError::io(path, err))
}

fn encode_with_profile(
    image: &RgbImage,
    width: u16,
    height: u16,
    quality: u8,
    profile: EncodeProfile,
) -> Result<Vec<u8>, EncodingError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new(&mut bytes, quality);
    encoder.set_sampling_factor(ChromaSubsampling::for_quality(quality).sampling_factor());
    encoder.set_optimized_huffman_tables(profile == EncodeProfile::OptimizedHuffman);
    encoder.encode(image.as_raw(), width, height, ColorType::Rgb)?;
    Ok(bytes)
}

fn replace_file(from: &Path, to: &Path) -> Result<(), CompressionError> {
    match fs::remove_file(to) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(CompressionError::io(to, err)),
    }
    fs::rename(from, to).map_err(|err| CompressionError::io(to, err))
}

/// Removes the scratch file when dropped, on every exit path. Cleanup
/// failures are logged and swallowed.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log::debug!(
                "failed removing scratch file {}: {err}",
                self.path.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::{ColorType, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::{
        compress_image, next_quality, ChromaSubsampling, CompressionOutcome, QUALITY_CEILING,
        QUALITY_FLOOR,
    };
    use crate::config::DEFAULT_TARGET_BYTES;
    use crate::error::CompressionError;
    use crate::paths::scratch_path;

    const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

    struct Noise(u64);

    impl Noise {
        fn next_byte(&mut self) -> u8 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 24) as u8
        }
    }

    fn noise_rgb(width: u32, height: u32, seed: u64) -> RgbImage {
        let mut noise = Noise(seed);
        RgbImage::from_fn(width, height, |_, _| {
            Rgb([noise.next_byte(), noise.next_byte(), noise.next_byte()])
        })
    }

    fn write_noise_png(path: &Path, width: u32, height: u32) -> anyhow::Result<u64> {
        noise_rgb(width, height, 0x9E37_79B9_7F4A_7C15).save_with_format(path, ImageFormat::Png)?;
        Ok(fs::metadata(path)?.len())
    }

    fn assert_strictly_decreasing(qualities: &[u8]) {
        for pair in qualities.windows(2) {
            assert!(pair[1] < pair[0], "quality went up: {qualities:?}");
        }
    }

    #[test]
    fn next_quality_scales_step_with_overshoot() {
        // 1% over: minimum step.
        assert_eq!(next_quality(95, 101_000, 100_000), 94);
        // 150% over: 30 points.
        assert_eq!(next_quality(95, 250_000, 100_000), 65);
        // 2.5% over rounds half away from zero to a step of 1.
        assert_eq!(next_quality(80, 102_500, 100_000), 79);
        // 7.4% over rounds down to a step of 1; 7.6% rounds up to 2.
        assert_eq!(next_quality(80, 107_400, 100_000), 79);
        assert_eq!(next_quality(80, 107_600, 100_000), 78);
    }

    #[test]
    fn next_quality_clamps_at_floor() {
        assert_eq!(next_quality(20, 10_000_000, 100_000), QUALITY_FLOOR);
        assert_eq!(next_quality(QUALITY_FLOOR, 200_000, 100_000), QUALITY_FLOOR);
        assert_eq!(next_quality(50, 1_000, 0), QUALITY_FLOOR);
    }

    #[test]
    fn subsampling_coarsens_below_ninety() {
        assert_eq!(ChromaSubsampling::for_quality(95), ChromaSubsampling::Full);
        assert_eq!(ChromaSubsampling::for_quality(90), ChromaSubsampling::Full);
        assert_eq!(ChromaSubsampling::for_quality(89), ChromaSubsampling::Half);
        assert_eq!(ChromaSubsampling::for_quality(10), ChromaSubsampling::Half);
    }

    #[test]
    fn small_source_is_copied_byte_for_byte() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("small.png");
        let output = temp.path().join("temp_1.jpeg");
        let size = write_noise_png(&input, 16, 16)?;

        let outcome = compress_image(&input, &output, size)?;
        assert_eq!(outcome, CompressionOutcome::FastCopy { bytes: size });
        assert_eq!(fs::read(&input)?, fs::read(&output)?);
        assert!(!scratch_path(&output).exists());
        Ok(())
    }

    #[test]
    fn oversized_source_fits_budget_or_reaches_floor() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("big.png");
        let output = temp.path().join("temp_2.jpeg");
        let source = write_noise_png(&input, 256, 256)?;
        let target = 60 * 1024;
        assert!(source > target);

        let outcome = compress_image(&input, &output, target)?;
        let CompressionOutcome::Reencoded {
            bytes,
            final_quality,
            qualities,
            within_budget,
        } = outcome
        else {
            panic!("expected re-encode for oversized source");
        };

        assert!(bytes <= target || final_quality == QUALITY_FLOOR);
        assert_eq!(within_budget, bytes <= target);
        assert_eq!(qualities.first().copied(), Some(QUALITY_CEILING));
        assert_eq!(qualities.last().copied(), Some(final_quality));
        assert_strictly_decreasing(&qualities);

        let written = fs::read(&output)?;
        assert_eq!(written.len() as u64, bytes);
        assert_eq!(written[..2], JPEG_SOI);
        assert!(!scratch_path(&output).exists());
        Ok(())
    }

    #[test]
    fn unreachable_budget_stops_at_floor() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("noise.png");
        let output = temp.path().join("temp_3.jpeg");
        write_noise_png(&input, 128, 128)?;

        let outcome = compress_image(&input, &output, 512)?;
        match outcome {
            CompressionOutcome::Reencoded {
                bytes,
                final_quality,
                qualities,
                within_budget,
            } => {
                assert_eq!(final_quality, QUALITY_FLOOR);
                assert!(!within_budget);
                assert!(bytes > 512);
                assert_strictly_decreasing(&qualities);
                assert_eq!(
                    qualities.iter().filter(|q| **q == QUALITY_FLOOR).count(),
                    1
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(output.exists());
        assert!(!scratch_path(&output).exists());
        Ok(())
    }

    #[test]
    fn transparent_source_is_flattened_to_rgb_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("alpha.png");
        let output = temp.path().join("temp_4.jpeg");
        let rgb = noise_rgb(96, 96, 7);
        let rgba = RgbaImage::from_fn(96, 96, |x, y| {
            let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
            Rgba([r, g, b, ((x + y) % 256) as u8])
        });
        rgba.save_with_format(&input, ImageFormat::Png)?;

        compress_image(&input, &output, 4 * 1024)?;
        let decoded = image::open(&output)?;
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (96, 96));
        Ok(())
    }

    #[test]
    fn stale_output_is_replaced() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("big.png");
        let output = temp.path().join("temp_5.jpeg");
        write_noise_png(&input, 128, 128)?;
        fs::write(&output, b"stale artifact from an earlier run")?;

        compress_image(&input, &output, 8 * 1024)?;
        let written = fs::read(&output)?;
        assert_eq!(written[..2], JPEG_SOI);
        Ok(())
    }

    #[test]
    fn undecodable_source_fails_without_leaving_scratch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("broken.png");
        let output = temp.path().join("temp_6.jpeg");
        fs::write(&input, vec![0x42; 4096])?;

        let err = compress_image(&input, &output, 1024);
        assert!(matches!(err, Err(CompressionError::Decode { .. })));
        assert!(!output.exists());
        assert!(!scratch_path(&output).exists());
        Ok(())
    }

    #[test]
    fn failed_swap_still_removes_scratch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("big.png");
        let output = temp.path().join("temp_8.jpeg");
        write_noise_png(&input, 64, 64)?;
        // A non-empty directory where the artifact belongs makes the final
        // swap fail after the scratch file has been written.
        fs::create_dir_all(&output)?;
        fs::write(output.join("occupant.txt"), b"keep")?;

        let err = compress_image(&input, &output, 1024);
        assert!(matches!(err, Err(CompressionError::Io { .. })), "{err:?}");
        assert!(!scratch_path(&output).exists());
        assert!(output.join("occupant.txt").exists());
        Ok(())
    }

    #[test]
    fn eight_hundred_kb_source_fits_default_budget() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("photo.png");
        let output = temp.path().join("temp_9.jpeg");
        let source = write_noise_png(&input, 520, 520)?;
        assert!(source > 780_000 && source < 850_000, "source is {source} bytes");
        assert_eq!(DEFAULT_TARGET_BYTES, 307_200);

        let outcome = compress_image(&input, &output, DEFAULT_TARGET_BYTES)?;
        let CompressionOutcome::Reencoded {
            bytes,
            qualities,
            within_budget,
            ..
        } = outcome
        else {
            panic!("expected re-encode for an 800 KB source");
        };
        assert!(within_budget);
        assert!(bytes <= 307_200, "output is {bytes} bytes");
        assert_eq!(fs::metadata(&output)?.len(), bytes);
        assert!(qualities.len() <= 30, "too many attempts: {qualities:?}");
        assert_strictly_decreasing(&qualities);
        assert!(!scratch_path(&output).exists());
        Ok(())
    }

    #[test]
    fn missing_source_is_an_io_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = compress_image(
            &temp.path().join("absent.png"),
            &temp.path().join("temp_7.jpeg"),
            1024,
        );
        assert!(matches!(err, Err(CompressionError::Io { .. })));
        Ok(())
    }
}
