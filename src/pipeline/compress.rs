//! Stage 4: compress each master TIFF to a JPEG 2000 deliverable.
//!
//! Output is `<jp2s_root>/<object id>/<tiff stem>.jp2`. Encoder parameters
//! are fixed (8 quality layers, 256×256 tiles and precincts, RPCL order)
//! except the number of resolution levels, which follows the image size,
//! and the sRGB colour-space flag, which is set for 24-bit sources only.
//!
//! Existing outputs are never regenerated.

use super::measure_long_side;
use crate::config::HarvestConfig;
use crate::error::ItemError;
use crate::item::{require_populated, sorted_files, BitDepth, WorkItem};
use crate::process::{run_logged, Invocation, ProcessRunner};
use std::path::Path;
use tracing::{debug, error, warn};

/// Bit rates of the eight quality layers, highest first.
pub const RATE_LADDER: &str =
    "1.2,0.7416334477,0.4583546103,0.2832827752,0.1750776907,0.1082041271,0.0668737897,0.0413302129";

/// Smallest dimension a resolution level may have.
pub const MIN_LEVEL_DIMENSION: u32 = 96;

/// How many times `long_side` can be halved while staying ≥ 96 px.
pub fn resolution_levels(long_side: u32) -> u32 {
    let mut dim = long_side;
    let mut levels = 0;
    while dim >= MIN_LEVEL_DIMENSION {
        levels += 1;
        dim /= 2;
    }
    levels
}

pub fn compression_invocation(
    config: &HarvestConfig,
    tiff: &Path,
    jp2: &Path,
    levels: u32,
    depth: Option<BitDepth>,
) -> Invocation {
    let mut inv = Invocation::new(&config.utilities.kdu_compress)
        .arg("-i")
        .arg(tiff)
        .arg("-o")
        .arg(jp2)
        .args(["-rate", RATE_LADDER, "Clayers=8"])
        .arg(format!("Clevels={levels}"))
        .args([
            "Cuse_precincts=yes",
            "Cprecincts={256,256}",
            "Cblk={64,64}",
            "Cuse_sop=yes",
            "Cuse_eph=yes",
            "Corder=RPCL",
            "ORGgen_plt=yes",
            "ORGtparts=R",
            "Stiles={256,256}",
        ]);
    if depth == Some(BitDepth::Color) {
        inv = inv.args(["-jp2_space", "sRGB"]);
    }
    inv = inv
        .args(["-double_buffering", "10", "-num_threads"])
        .arg(config.compress.threads.to_string())
        .arg("-no_weights");
    if let Some(lib) = &config.resources.compressor_library_path {
        inv = inv.env("LD_LIBRARY_PATH", lib);
    }
    inv
}

pub(crate) async fn compress(
    config: &HarvestConfig,
    runner: &dyn ProcessRunner,
    item: &mut WorkItem,
) -> Result<(), ItemError> {
    item.require_fetched()?;
    let tiffs_dir = require_populated("tiffs_dir", &item.tiffs_dir)?;

    let jp2s_dir = item.path_under(&config.directories.jp2s_root, None);
    tokio::fs::create_dir_all(&jp2s_dir)
        .await
        .map_err(|e| ItemError::io(&jp2s_dir, e))?;
    item.jp2s_dir = Some(jp2s_dir.clone());

    if item.bit_depth.is_none() {
        warn!("Bit depth unknown; compressing without a colour-space flag");
    }

    let tiffs = sorted_files(&tiffs_dir)?;
    let mut failed = 0usize;
    for tiff in &tiffs {
        let Some(stem) = tiff.file_stem() else {
            continue;
        };
        let jp2 = jp2s_dir.join(stem).with_extension("jp2");
        if jp2.exists() {
            error!("{} exists; will not regenerate", jp2.display());
            continue;
        }

        let levels = match measure_long_side(tiff).await {
            Ok(long) => {
                let levels = resolution_levels(long);
                debug!(long_side = long, levels, "Compressing {}", tiff.display());
                levels
            }
            Err(e) => {
                error!("{e}");
                failed += 1;
                continue;
            }
        };

        let inv = compression_invocation(config, tiff, &jp2, levels, item.bit_depth);
        if let Err(e) = run_logged(runner, &inv).await {
            error!("Could not compress {}: {e}", tiff.display());
            failed += 1;
        }
    }

    if failed > 0 {
        Err(ItemError::ConversionsFailed {
            failed,
            total: tiffs.len(),
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
                compressor_library_path: Some("/opt/kakadu/lib".into()),
                ..Resources::default()
            })
            .compress_threads(2)
            .build()
            .unwrap()
    }

    #[test]
    fn levels_follow_halvings() {
        assert_eq!(resolution_levels(1024), 4);
        assert_eq!(resolution_levels(90), 0);
        assert_eq!(resolution_levels(96), 1);
        assert_eq!(resolution_levels(191), 1);
        assert_eq!(resolution_levels(192), 2);
        assert_eq!(resolution_levels(3300), 6);
    }

    #[test]
    fn colour_sources_get_srgb_space() {
        let inv = compression_invocation(
            &config(),
            Path::new("/t/00000001.tif"),
            Path::new("/j/00000001.jp2"),
            5,
            Some(BitDepth::Color),
        );
        assert_eq!(inv.value_after("-i"), Some(OsStr::new("/t/00000001.tif")));
        assert_eq!(inv.value_after("-o"), Some(OsStr::new("/j/00000001.jp2")));
        assert_eq!(inv.value_after("-rate"), Some(OsStr::new(RATE_LADDER)));
        assert_eq!(inv.value_after("-jp2_space"), Some(OsStr::new("sRGB")));
        assert_eq!(inv.value_after("-num_threads"), Some(OsStr::new("2")));
        assert!(inv.args.iter().any(|a| a == "Clevels=5"));
        assert_eq!(inv.args.last().map(|a| a.as_os_str()), Some(OsStr::new("-no_weights")));
        assert_eq!(inv.env.len(), 1);
    }

    #[test]
    fn grey_and_unknown_sources_have_no_colour_space() {
        for depth in [Some(BitDepth::Gray), Some(BitDepth::Bitonal), None] {
            let inv = compression_invocation(
                &config(),
                Path::new("/t/1.tif"),
                Path::new("/j/1.jp2"),
                3,
                depth,
            );
            assert_eq!(inv.value_after("-jp2_space"), None);
        }
    }
}
