//! Stage 5: describe the item's files in a folder manifest and project it
//! into the package document.
//!
//! The folder manifest is built from the PDF, the TIFF directory and the
//! JP2 directory, written to `<tmp>/folder.xml`, and transformed by the
//! stylesheet into `<manifests_root>/<object id>.mets`. The package document
//! is published at `<locator_base>/<object id>.mets`.

use crate::config::HarvestConfig;
use crate::error::ItemError;
use crate::item::{require_populated, WorkItem};
use crate::manifest::{ManifestBuilder, ManifestError};
use crate::process::{prefixed, run_logged, Invocation, ProcessRunner};
use std::path::Path;
use tracing::debug;

/// `java -jar <saxon> -xsl:<stylesheet> -s:<folder.xml> -o:<mets> title=<title>`
pub fn transform_invocation(
    config: &HarvestConfig,
    folder_xml: &Path,
    output: &Path,
    title: &str,
) -> Invocation {
    Invocation::new(&config.utilities.java)
        .arg("-jar")
        .arg(&config.resources.saxon_jar)
        .arg(prefixed("-xsl:", &config.resources.stylesheet))
        .arg(prefixed("-s:", folder_xml))
        .arg(prefixed("-o:", output))
        .arg(format!("title={title}"))
}

/// Public locator of the item's package document.
pub fn package_url(config: &HarvestConfig, object_id: &str) -> String {
    format!(
        "{}/{object_id}.mets",
        config.manifest.locator_base.trim_end_matches('/')
    )
}

pub(crate) async fn package(
    config: &HarvestConfig,
    runner: &dyn ProcessRunner,
    item: &mut WorkItem,
) -> Result<(), ItemError> {
    item.require_fetched()?;
    let pdf = match &item.pdf_path {
        Some(p) if p.is_file() => p.clone(),
        _ => {
            return Err(ItemError::MissingPrerequisite(
                "the retrieved PDF is missing".into(),
            ))
        }
    };
    let tiffs_dir = require_populated("tiffs_dir", &item.tiffs_dir)?;
    let jp2s_dir = require_populated("jp2s_dir", &item.jp2s_dir)?;

    let object_id = item.object_id();
    let mets_path = item.path_under(&config.directories.manifests_root, Some("mets"));
    let mets_url = package_url(config, &object_id);
    item.manifest_path = Some(mets_path.clone());
    item.manifest_url = Some(mets_url.clone());

    if mets_path.exists() {
        return Err(ItemError::OutputExists { path: mets_path });
    }
    if let Some(dir) = mets_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ItemError::io(dir, e))?;
    }

    let folder_xml = config.folder_manifest_path();
    let builder =
        ManifestBuilder::new(object_id, mets_url).urn_prefix(config.manifest.urn_prefix.clone());
    let inputs = vec![pdf, tiffs_dir, jp2s_dir];
    let target = folder_xml.clone();
    let count = tokio::task::spawn_blocking(move || {
        let doc = builder.build(&inputs)?;
        doc.write_to(&target)?;
        Ok::<_, ManifestError>(doc.representation_count())
    })
    .await
    .map_err(|e| ItemError::TaskFailed(format!("Manifest task panicked: {e}")))??;
    debug!(representations = count, "Wrote {}", folder_xml.display());

    run_logged(
        runner,
        &transform_invocation(config, &folder_xml, &mets_path, &item.title),
    )
    .await
}
