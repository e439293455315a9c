//! Integration tests driving the whole pipeline against a scratch install.
//!
//! External converters and the network are replaced by the fakes in
//! `common/`, which write small but real PNM, TIFF and JP2 files so that
//! every stage reads genuine image headers.

mod common;

use common::{FakeTools, StubSource, Workspace, LOCATOR_BASE};
use ead_pdf_harvest::{
    CheckpointStore, FetchStatus, HarvestError, Pipeline, RunOptions, Stage,
};
use std::io;
use std::sync::{Arc, Mutex};

const LOST: &str = "http://pdfs.example.org/c002.pdf";

fn pipeline(ws: &Workspace, tools: Arc<FakeTools>, remove_bitmaps: bool) -> Pipeline {
    let source = StubSource::default().with_status(LOST, 404);
    Pipeline::new(Arc::new(ws.config(remove_bitmaps)), tools, Arc::new(source))
}

/// Formatted log output collected in memory.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn only(stage: Stage) -> RunOptions {
    RunOptions {
        resume_from: stage,
        stop_after: stage,
    }
}

#[tokio::test]
async fn full_run_packages_retrieved_pdfs_and_updates_the_finding_aid() {
    let ws = Workspace::new();
    let tools = Arc::new(FakeTools::default());
    let pipeline = pipeline(&ws, tools.clone(), true);

    let summary = pipeline.run(&ws.ead, &RunOptions::default()).await.unwrap();

    assert!(!summary.early_exit);
    assert_eq!(summary.stages.len(), Stage::ALL.len());
    assert_eq!(summary.total_failed(), 0);

    let harvest = summary.report(Stage::Harvest).unwrap();
    assert_eq!((harvest.total, harvest.processed, harvest.skipped), (4, 3, 1));
    for stage in [
        Stage::Extract,
        Stage::Normalize,
        Stage::Compress,
        Stage::Manifest,
        Stage::Finalize,
    ] {
        let report = summary.report(stage).unwrap();
        assert_eq!(report.processed, 3, "{stage}");
        assert_eq!(report.skipped, 1, "{stage}");
    }
    assert_eq!(summary.report(Stage::UpdateDocument).unwrap().processed, 4);

    // Two pages per PDF; only the greyscale page is re-oriented.
    assert_eq!(tools.calls_to("pdfimages"), 3);
    assert_eq!(tools.calls_to("orient_image.sh"), 3);
    assert_eq!(tools.calls_to("convert"), 6);
    assert_eq!(tools.calls_to("kdu_compress"), 6);
    assert_eq!(tools.calls_to("java"), 3);

    // PDFs and masters moved to the final roots; deliverables stay put.
    assert!(ws.path("pdfs-final/MC216/c001.pdf").is_file());
    assert!(!ws.path("pdfs-local/MC216/c001.pdf").exists());
    assert!(ws.path("tiffs-final/MC216/c003_1/00000002.tif").is_file());
    assert!(!ws.path("tiffs-local/MC216/c003_1").exists());
    assert!(ws.path("jp2s/MC216/c003/00000001.jp2").is_file());
    assert!(ws.path("mets/MC216/c001.mets").is_file());
    assert!(!ws.path("bitmaps/MC216/c001").exists());
    assert!(!ws.path("tmp/harvest.lock").exists());

    // The last folder manifest handed to the stylesheet.
    let folder = std::fs::read_to_string(ws.path("tmp/folder.xml")).unwrap();
    assert!(folder.contains("MC216/c003_1"));
    assert!(folder.contains("application/pdf"));
    assert!(folder.contains("image/tiff"));
    assert!(folder.contains("image/jp2"));

    let ead = ws.finding_aid();
    assert!(ead.contains(&format!(
        r#"xlink:href="{LOCATOR_BASE}/MC216/c003_1.mets" xlink:role="http://www.loc.gov/METS/""#
    )));
    assert_eq!(ead.matches(r#"xlink:role="http://www.loc.gov/METS/""#).count(), 3);
    assert!(ead.contains(&format!(
        r#"<dao xlink:type="simple" xlink:href="{LOST}" xlink:show="none"/>"#
    )));
    assert!(!ead.contains("c001.pdf"));

    let items = CheckpointStore::new(ws.path("tmp/pdfs.txt")).load().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[1].fetch_status, Some(FetchStatus::NotFound));
    assert_eq!(items[3].object_id(), "MC216/c003_1");
    assert_eq!(
        items[0].pdf_path.as_deref(),
        Some(ws.path("pdfs-final/MC216/c001.pdf").as_path())
    );
    assert_eq!(
        items[0].manifest_url.as_deref(),
        Some(format!("{LOCATOR_BASE}/MC216/c001.mets").as_str())
    );
}

#[tokio::test]
async fn second_run_finds_nothing_new() {
    let ws = Workspace::new();
    let tools = Arc::new(FakeTools::default());
    let pipeline = pipeline(&ws, tools.clone(), true);
    pipeline.run(&ws.ead, &RunOptions::default()).await.unwrap();
    let updated = ws.finding_aid();

    let again = pipeline.run(&ws.ead, &RunOptions::default()).await.unwrap();

    assert!(again.early_exit);
    assert!(again.stages.is_empty());
    assert_eq!(tools.calls_to("pdfimages"), 3);
    assert_eq!(ws.finding_aid(), updated);
}

#[tokio::test]
async fn stop_after_then_resume_from_the_checkpoint() {
    let ws = Workspace::new();
    let tools = Arc::new(FakeTools::default());
    let pipeline = pipeline(&ws, tools.clone(), false);

    let first = pipeline
        .run(
            &ws.ead,
            &RunOptions {
                resume_from: Stage::Harvest,
                stop_after: Stage::Extract,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.stages.len(), 2);
    assert!(ws.path("bitmaps/MC216/c001/x-000.pgm").is_file());
    assert!(ws.path("tmp/pdfs.txt").is_file());
    assert_eq!(tools.calls_to("convert"), 0);

    let items = pipeline.store().load().unwrap();
    assert_eq!(
        items[0].bitmaps_dir.as_deref(),
        Some(ws.path("bitmaps/MC216/c001").as_path())
    );

    let resumed = pipeline.run(&ws.ead, &only(Stage::Normalize)).await.unwrap();
    assert_eq!(resumed.report(Stage::Normalize).unwrap().processed, 3);
    assert_eq!(tools.calls_to("convert"), 6);
    // Bitmap removal is off, so the bitmaps survive.
    assert!(ws.path("bitmaps/MC216/c001/x-000.pgm").is_file());

    let items = pipeline.store().load().unwrap();
    assert_eq!(
        items[0].tiffs_dir.as_deref(),
        Some(ws.path("tiffs-local/MC216/c001").as_path())
    );
    assert_eq!(items[0].bit_depth.map(|d| d.bits()), Some(24));
    // The finding aid is only touched by the last stage.
    assert_eq!(ws.finding_aid(), common::FINDING_AID);
}

#[tokio::test]
async fn repeating_normalize_does_not_regenerate_tiffs() {
    let ws = Workspace::new();
    let tools = Arc::new(FakeTools::default());
    let pipeline = pipeline(&ws, tools.clone(), false);
    pipeline
        .run(
            &ws.ead,
            &RunOptions {
                resume_from: Stage::Harvest,
                stop_after: Stage::Normalize,
            },
        )
        .await
        .unwrap();
    let tiff = ws.path("tiffs-local/MC216/c003/00000001.tif");
    let before = std::fs::read(&tiff).unwrap();

    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let log = log.clone();
            move || log.clone()
        })
        .with_ansi(false)
        .finish();
    {
        let _default = tracing::subscriber::set_default(subscriber);
        pipeline.run(&ws.ead, &only(Stage::Normalize)).await.unwrap();
    }

    let text = log.text();
    let existing: Vec<&str> = text
        .lines()
        .filter(|line| line.contains("already exists, will not regenerate"))
        .collect();
    assert_eq!(existing.len(), 6, "{text}");
    assert!(existing.iter().all(|line| line.contains("ERROR")));
    assert_eq!(
        existing
            .iter()
            .filter(|line| line.contains("MC216/c003/00000001.tif"))
            .count(),
        1
    );
    assert_eq!(tools.calls_to("convert"), 6);
    assert_eq!(std::fs::read(&tiff).unwrap(), before);
    let tiffs = std::fs::read_dir(ws.path("tiffs-local/MC216/c003")).unwrap().count();
    assert_eq!(tiffs, 2);
}

#[tokio::test]
async fn failed_compression_keeps_items_out_of_later_stages() {
    let ws = Workspace::new();
    let tools = Arc::new(FakeTools::failing("kdu_compress"));
    let pipeline = pipeline(&ws, tools.clone(), true);

    let summary = pipeline.run(&ws.ead, &RunOptions::default()).await.unwrap();

    assert_eq!(summary.report(Stage::Compress).unwrap().failed, 3);
    assert_eq!(summary.report(Stage::Manifest).unwrap().skipped, 4);
    assert_eq!(summary.report(Stage::Finalize).unwrap().skipped, 4);
    let update = summary.report(Stage::UpdateDocument).unwrap();
    assert_eq!((update.processed, update.skipped), (1, 3));
    assert_eq!(tools.calls_to("java"), 0);

    // Only the lost PDF is marked; the others still point at their PDFs.
    let ead = ws.finding_aid();
    assert!(ead.contains(r#"xlink:href="http://pdfs.example.org/c001.pdf"/>"#));
    assert!(ead.contains(r#"xlink:show="none""#));
    assert!(!ead.contains("xlink:role"));
    assert!(ws.path("pdfs-local/MC216/c001.pdf").is_file());
}

#[tokio::test]
async fn held_lock_refuses_to_run() {
    let ws = Workspace::new();
    let lock = ws.path("tmp/harvest.lock");
    std::fs::create_dir_all(lock.parent().unwrap()).unwrap();
    // Owned by a live process: this one.
    std::fs::write(&lock, format!("{}\n", std::process::id())).unwrap();

    let tools = Arc::new(FakeTools::default());
    let err = pipeline(&ws, tools.clone(), true)
        .run(&ws.ead, &RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::LockHeld { .. }));
    assert!(lock.exists());
    assert!(tools.invocations().is_empty());
}

#[tokio::test]
async fn resume_without_checkpoint_is_fatal() {
    let ws = Workspace::new();
    let err = pipeline(&ws, Arc::new(FakeTools::default()), true)
        .run(&ws.ead, &only(Stage::Compress))
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::CheckpointUnreadable { .. }));
    // The lock is released on the error path too.
    assert!(!ws.path("tmp/harvest.lock").exists());
}

#[tokio::test]
async fn reversed_stage_range_is_rejected() {
    let ws = Workspace::new();
    let err = pipeline(&ws, Arc::new(FakeTools::default()), true)
        .run(
            &ws.ead,
            &RunOptions {
                resume_from: Stage::Finalize,
                stop_after: Stage::Extract,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::InvalidConfig(_)));
}

#[tokio::test]
async fn finding_aid_without_pdfs_exits_early() {
    let ws = Workspace::new();
    std::fs::write(
        &ws.ead,
        r#"<ead xmlns="urn:isbn:1-931666-22-9"><eadheader><eadid>MC999</eadid></eadheader></ead>"#,
    )
    .unwrap();

    let summary = pipeline(&ws, Arc::new(FakeTools::default()), true)
        .run(&ws.ead, &RunOptions::default())
        .await
        .unwrap();

    assert!(summary.early_exit);
    assert!(!ws.path("tmp/pdfs.txt").exists());
}
