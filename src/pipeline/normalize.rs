//! Stage 3: turn extracted bitmaps into normalised master TIFFs.
//!
//! Bitmaps are processed in file-name order and numbered `00000001.tif`,
//! `00000002.tif`, … under `<tiffs_local_root>/<object id>/`. Each one is
//! classified by extension (`.pbm` → 1 bit, `.pgm` → 8 bit, else 24 bit);
//! bitonal and greyscale pages are re-oriented first, then resized so the
//! long side is a whole multiple of 100 px and tagged with the colour
//! profile of their class.
//!
//! An existing TIFF is never regenerated, so running the stage twice over
//! the same bitmaps adds nothing.

use super::measure_long_side;
use crate::config::HarvestConfig;
use crate::error::ItemError;
use crate::item::{require_populated, sorted_files, BitDepth, WorkItem};
use crate::process::{run_logged, Invocation, ProcessRunner};
use std::path::Path;
use tracing::{debug, error, warn};

/// Round the long side to the nearest hundred, never rounding up past it.
///
/// Images shorter than 100 px keep their size.
pub fn target_long_side(long_side: u32) -> u32 {
    let mut rounded = (long_side + 50) / 100 * 100;
    if rounded > long_side {
        rounded -= 100;
    }
    if rounded == 0 {
        long_side
    } else {
        rounded
    }
}

/// `<orient> <bitmap>`, rewrites the bitmap in place.
pub fn orientation_invocation(config: &HarvestConfig, bitmap: &Path) -> Invocation {
    Invocation::new(&config.utilities.orient).arg(bitmap)
}

/// `convert <src> -resize RxR> -quality 100 [-depth 8] -profile <icc> <dst>`
pub fn conversion_invocation(
    config: &HarvestConfig,
    bitmap: &Path,
    tiff: &Path,
    depth: BitDepth,
    target: u32,
) -> Invocation {
    let inv = Invocation::new(&config.utilities.convert)
        .arg(bitmap)
        .args(["-resize".to_string(), format!("{target}x{target}>")])
        .args(["-quality", "100"]);
    let inv = match depth {
        BitDepth::Color => inv
            .arg("-profile")
            .arg(&config.resources.srgb_profile),
        BitDepth::Gray | BitDepth::Bitonal => inv
            .args(["-depth", "8", "-profile"])
            .arg(&config.resources.gray_profile),
    };
    inv.arg(tiff)
}

pub(crate) async fn normalize(
    config: &HarvestConfig,
    runner: &dyn ProcessRunner,
    item: &mut WorkItem,
) -> Result<(), ItemError> {
    item.require_fetched()?;
    let bitmaps_dir = require_populated("bitmaps_dir", &item.bitmaps_dir)?;

    let tiffs_dir = item.path_under(&config.directories.tiffs_local_root, None);
    tokio::fs::create_dir_all(&tiffs_dir)
        .await
        .map_err(|e| ItemError::io(&tiffs_dir, e))?;
    item.tiffs_dir = Some(tiffs_dir.clone());

    let bitmaps = sorted_files(&bitmaps_dir)?;
    let remove = config.normalize.remove_bitmaps;
    let mut failed = 0usize;

    for (n, bitmap) in bitmaps.iter().enumerate() {
        let depth = BitDepth::from_extension(bitmap);
        item.bit_depth = Some(depth);

        let tiff = tiffs_dir.join(format!("{:08}.tif", n + 1));
        if tiff.exists() {
            error!("{} already exists, will not regenerate", tiff.display());
            continue;
        }

        if depth.is_text_like() {
            if let Err(e) = run_logged(runner, &orientation_invocation(config, bitmap)).await {
                warn!("Could not re-orient {}: {e}", bitmap.display());
            }
        }

        let target = match measure_long_side(bitmap).await {
            Ok(long) => target_long_side(long),
            Err(e) => {
                error!("{e}");
                failed += 1;
                continue;
            }
        };
        debug!(bits = depth.bits(), target, "Normalising {}", bitmap.display());

        let convert = conversion_invocation(config, bitmap, &tiff, depth, target);
        if let Err(e) = run_logged(runner, &convert).await {
            error!("Could not convert {}: {e}", bitmap.display());
            failed += 1;
            continue;
        }
        if remove {
            if let Err(e) = tokio::fs::remove_file(bitmap).await {
                warn!("Could not remove {}: {e}", bitmap.display());
            }
        }
    }

    if remove {
        // Fails, and keeps the directory, while unconverted bitmaps remain.
        match tokio::fs::remove_dir(&bitmaps_dir).await {
            Ok(()) => debug!("Removed {}", bitmaps_dir.display()),
            Err(_) => warn!("Kept {}: it still holds bitmaps", bitmaps_dir.display()),
        }
    } else {
        warn!("Bitmap removal is off; this is meant for debugging and fills the disk quickly");
    }

    if failed > 0 {
        Err(ItemError::ConversionsFailed {
            failed,
            total: bitmaps.len(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Directories, Resources};
    use std::ffi::OsStr;

    fn config() -> HarvestConfig {
        HarvestConfig::builder(Directories::under("/work"))
            .resources(Resources {
                srgb_profile: "/icc/sRGB.icc".into(),
                gray_profile: "/icc/gray.icc".into(),
                ..Resources::default()
            })
            .build()
            .unwrap()
    }

    fn args(inv: &Invocation) -> Vec<String> {
        inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn rounds_to_hundreds_without_exceeding() {
        assert_eq!(target_long_side(734), 700);
        assert_eq!(target_long_side(750), 700);
        assert_eq!(target_long_side(800), 800);
        assert_eq!(target_long_side(3299), 3200);
        assert_eq!(target_long_side(60), 60);
    }

    #[test]
    fn colour_conversion_uses_srgb() {
        let inv = conversion_invocation(
            &config(),
            Path::new("/b/x-000.ppm"),
            Path::new("/t/00000001.tif"),
            BitDepth::Color,
            2200,
        );
        assert_eq!(
            args(&inv),
            [
                "/b/x-000.ppm",
                "-resize",
                "2200x2200>",
                "-quality",
                "100",
                "-profile",
                "/icc/sRGB.icc",
                "/t/00000001.tif"
            ]
        );
    }

    #[test]
    fn grey_conversion_forces_eight_bits() {
        let inv = conversion_invocation(
            &config(),
            Path::new("/b/x-001.pbm"),
            Path::new("/t/00000002.tif"),
            BitDepth::Bitonal,
            1700,
        );
        assert_eq!(inv.value_after("-depth"), Some(OsStr::new("8")));
        assert_eq!(inv.value_after("-profile"), Some(OsStr::new("/icc/gray.icc")));
    }
}
