//! Configuration for a harvest run.
//!
//! Every directory root, external utility, and tuning knob lives in one
//! immutable [`HarvestConfig`], loaded once at startup from a YAML file and
//! shared as `Arc<HarvestConfig>` with every component. Nothing reads
//! ambient globals.
//!
//! ```yaml
//! directories:
//!   bitmaps_root: /data/harvest/bitmaps
//!   tiffs_local_root: /data/harvest/tiffs
//!   tiffs_final_root: /mnt/archives
//!   pdfs_local_root: /data/harvest/pdfs
//!   pdfs_final_root: /mnt/images/pdfs
//!   jp2s_root: /mnt/images/jp2s
//!   manifests_root: /mnt/images/mets
//!   tmp: /data/harvest/tmp
//! utilities:
//!   pdfimages: /usr/bin/pdfimages
//!   convert: /usr/bin/convert
//! ```
//!
//! Sections other than `directories` fall back to defaults when omitted.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the checkpoint file inside `directories.tmp`.
pub const CHECKPOINT_FILE: &str = "pdfs.txt";
/// Name of the run-lock file inside `directories.tmp`.
pub const LOCK_FILE: &str = "harvest.lock";
/// Intermediate folder manifest handed to the XSLT step.
pub const FOLDER_MANIFEST_FILE: &str = "folder.xml";

/// Configuration for a harvest run.
///
/// Built from YAML via [`HarvestConfig::from_file`] or programmatically via
/// [`HarvestConfig::builder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Working and final directory roots.
    pub directories: Directories,

    /// Paths to the external converters.
    #[serde(default)]
    pub utilities: Utilities,

    /// Files passed through to the converters (stylesheet, ICC profiles).
    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub normalize: NormalizeSettings,

    #[serde(default)]
    pub compress: CompressSettings,

    #[serde(default)]
    pub manifest: ManifestSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Directory roots. Working roots hold in-flight files; final roots are where
/// [`crate::pipeline::Stage::Finalize`] relocates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directories {
    /// Raw bitmaps written by the extractor.
    pub bitmaps_root: PathBuf,
    /// Normalised TIFFs before finalisation.
    pub tiffs_local_root: PathBuf,
    /// Permanent home of the TIFF masters.
    pub tiffs_final_root: PathBuf,
    /// Downloaded PDFs before finalisation.
    pub pdfs_local_root: PathBuf,
    /// Permanent home of the PDFs.
    pub pdfs_final_root: PathBuf,
    /// JPEG 2000 deliverables (written in place; never relocated).
    pub jp2s_root: PathBuf,
    /// Final package documents.
    pub manifests_root: PathBuf,
    /// Checkpoint, lock, and intermediate manifest.
    pub tmp: PathBuf,
}

impl Directories {
    /// Lay every root out under one base directory. Handy for tests and
    /// single-disk installs.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            bitmaps_root: base.join("bitmaps"),
            tiffs_local_root: base.join("tiffs-local"),
            tiffs_final_root: base.join("tiffs-final"),
            pdfs_local_root: base.join("pdfs-local"),
            pdfs_final_root: base.join("pdfs-final"),
            jp2s_root: base.join("jp2s"),
            manifests_root: base.join("mets"),
            tmp: base.join("tmp"),
        }
    }
}

/// External programs, resolved through `PATH` when not absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Utilities {
    pub pdfimages: PathBuf,
    pub convert: PathBuf,
    /// Re-orients bitonal and greyscale page images in place.
    pub orient: PathBuf,
    pub kdu_compress: PathBuf,
    pub java: PathBuf,
}

impl Default for Utilities {
    fn default() -> Self {
        Self {
            pdfimages: "pdfimages".into(),
            convert: "convert".into(),
            orient: "bin/orient_image.sh".into(),
            kdu_compress: "bin/kdu_compress".into(),
            java: "java".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub saxon_jar: PathBuf,
    /// Projects the folder manifest into the final package format.
    pub stylesheet: PathBuf,
    /// Embedded into colour TIFFs.
    pub srgb_profile: PathBuf,
    /// Embedded into bitonal and greyscale TIFFs.
    pub gray_profile: PathBuf,
    /// Exported as `LD_LIBRARY_PATH` for the wavelet compressor.
    pub compressor_library_path: Option<PathBuf>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            saxon_jar: "lib/saxon9he.jar".into(),
            stylesheet: "lib/folder2mets.xsl".into(),
            srgb_profile: "lib/sRGB.icc".into(),
            gray_profile: "lib/gray22.icc".into(),
            compressor_library_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// References whose locator contains this segment are never harvested.
    pub excluded_segment: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            excluded_segment: "/Accessions/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Per-request timeout in seconds. Default: 300.
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Delete each bitmap once its TIFF exists. Turning this off is meant for
    /// debugging only; raw bitmaps fill a disk quickly.
    pub remove_bitmaps: bool,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            remove_bitmaps: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressSettings {
    /// Passed through to the compressor as `-num_threads`.
    pub threads: u32,
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self { threads: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSettings {
    /// Public base under which package documents are served.
    pub locator_base: String,
    /// Prefix of every representation locator.
    pub urn_prefix: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            locator_base: "http://findingaids.princeton.edu/folders".into(),
            urn_prefix: crate::manifest::DEFAULT_URN_PREFIX.into(),
        }
    }
}

/// Optional file logging on top of stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// When set, a daily-rolling log file is written here.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "pdf-harvest".into(),
        }
    }
}

impl HarvestConfig {
    /// Create a builder with every optional section at its default.
    pub fn builder(directories: Directories) -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: HarvestConfig {
                directories,
                utilities: Utilities::default(),
                resources: Resources::default(),
                scan: ScanSettings::default(),
                fetch: FetchSettings::default(),
                normalize: NormalizeSettings::default(),
                compress: CompressSettings::default(),
                manifest: ManifestSettings::default(),
                logging: LoggingSettings::default(),
            },
        }
    }

    /// Read and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarvestError::ConfigUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            HarvestError::ConfigUnreadable { detail, .. } => HarvestError::ConfigUnreadable {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, HarvestError> {
        let config: HarvestConfig =
            serde_yaml::from_str(text).map_err(|e| HarvestError::ConfigUnreadable {
                path: PathBuf::from("<inline>"),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every item fail.
    pub fn validate(&self) -> Result<(), HarvestError> {
        let utilities = [
            ("utilities.pdfimages", &self.utilities.pdfimages),
            ("utilities.convert", &self.utilities.convert),
            ("utilities.orient", &self.utilities.orient),
            ("utilities.kdu_compress", &self.utilities.kdu_compress),
            ("utilities.java", &self.utilities.java),
        ];
        for (name, path) in utilities {
            if path.as_os_str().is_empty() {
                return Err(HarvestError::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if self.scan.excluded_segment.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "scan.excluded_segment must not be empty (it would exclude everything)".into(),
            ));
        }
        if self.compress.threads == 0 {
            return Err(HarvestError::InvalidConfig(
                "compress.threads must be ≥ 1".into(),
            ));
        }
        if self.manifest.locator_base.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "manifest.locator_base must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Where the work-item list is checkpointed between stages.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.directories.tmp.join(CHECKPOINT_FILE)
    }

    /// Lock file guarding the working roots against concurrent runs.
    pub fn lock_path(&self) -> PathBuf {
        self.directories.tmp.join(LOCK_FILE)
    }

    /// Scratch location of the folder manifest before the XSLT step.
    pub fn folder_manifest_path(&self) -> PathBuf {
        self.directories.tmp.join(FOLDER_MANIFEST_FILE)
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn utilities(mut self, utilities: Utilities) -> Self {
        self.config.utilities = utilities;
        self
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.config.resources = resources;
        self
    }

    pub fn excluded_segment(mut self, segment: impl Into<String>) -> Self {
        self.config.scan.excluded_segment = segment.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch.timeout_secs = secs;
        self
    }

    pub fn remove_bitmaps(mut self, remove: bool) -> Self {
        self.config.normalize.remove_bitmaps = remove;
        self
    }

    pub fn compress_threads(mut self, threads: u32) -> Self {
        self.config.compress.threads = threads.max(1);
        self
    }

    pub fn locator_base(mut self, base: impl Into<String>) -> Self {
        self.config.manifest.locator_base = base.into();
        self
    }

    pub fn urn_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.manifest.urn_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, HarvestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
