//! Shared fixtures for the integration tests: a finding aid, a stub PDF
//! source, and a process runner that imitates the external converters by
//! writing small but real image files.

#![allow(dead_code)]

use async_trait::async_trait;
use ead_pdf_harvest::process::{Invocation, ProcessOutput, ProcessRunner};
use ead_pdf_harvest::{Directories, FetchResponse, HarvestConfig, ItemError, PdfSource};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const LOCATOR_BASE: &str = "http://example.org/folders";

/// Three components: one PDF that downloads, one that is gone, and a
/// component holding two PDFs.
pub const FINDING_AID: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ead xmlns="urn:isbn:1-931666-22-9" xmlns:xlink="http://www.w3.org/1999/xlink">
  <eadheader><eadid>MC216</eadid></eadheader>
  <archdesc level="collection">
    <dsc>
      <c id="MC216_c001">
        <did>
          <unittitle>Letters</unittitle>
          <unitdate>1950</unitdate>
          <dao xlink:type="simple" xlink:href="http://pdfs.example.org/c001.pdf"/>
        </did>
      </c>
      <c id="MC216_c002">
        <did>
          <unittitle>Lost file</unittitle>
          <dao xlink:type="simple" xlink:href="http://pdfs.example.org/c002.pdf"/>
        </did>
      </c>
      <c id="MC216_c003">
        <did>
          <unittitle>Diaries</unittitle>
          <unitdate>1951-1952</unitdate>
          <dao xlink:type="simple" xlink:href="http://pdfs.example.org/c003-a.pdf"/>
          <dao xlink:type="simple" xlink:href="http://pdfs.example.org/c003-b.pdf"/>
        </did>
      </c>
    </dsc>
  </archdesc>
</ead>
"#;

/// A scratch install: every root under one temp dir, plus the finding aid.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub ead: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let ead = dir.path().join("MC216.EAD.xml");
        std::fs::write(&ead, FINDING_AID).expect("write finding aid");
        Self { dir, ead }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn config(&self, remove_bitmaps: bool) -> HarvestConfig {
        HarvestConfig::builder(Directories::under(self.dir.path()))
            .locator_base(LOCATOR_BASE)
            .remove_bitmaps(remove_bitmaps)
            .build()
            .expect("valid config")
    }

    pub fn finding_aid(&self) -> String {
        std::fs::read_to_string(&self.ead).expect("read finding aid")
    }
}

// ── PDF source ───────────────────────────────────────────────────────────────

/// Answers 200 with a tiny PDF body unless a status is registered for the URL.
#[derive(Default)]
pub struct StubSource {
    statuses: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
}

impl StubSource {
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PdfSource for StubSource {
    async fn get(&self, url: &str) -> Result<FetchResponse, ItemError> {
        self.requests.lock().unwrap().push(url.to_string());
        let status = self.statuses.get(url).copied().unwrap_or(200);
        Ok(FetchResponse {
            status,
            body: (status == 200).then(|| format!("%PDF-1.4 {url}").into_bytes()),
        })
    }
}

// ── External converters ──────────────────────────────────────────────────────

/// Side length of the fake page bitmaps.
pub const PAGE_WIDTH: u32 = 200;
pub const PAGE_HEIGHT: u32 = 150;

/// Imitates pdfimages, convert, the orientation script, kdu_compress and
/// the XSLT processor closely enough for every stage to succeed.
#[derive(Default)]
pub struct FakeTools {
    calls: Mutex<Vec<Invocation>>,
    failing: Option<String>,
}

impl FakeTools {
    /// Every call to `program` exits with status 1 and writes nothing.
    pub fn failing(program: &str) -> Self {
        Self {
            failing: Some(program.to_string()),
            ..Self::default()
        }
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| inv.program_name() == program)
            .count()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeTools {
    async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let program = invocation.program_name();
        if self.failing.as_deref() == Some(program.as_str()) {
            return Ok(ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{program}: simulated failure"),
            });
        }

        match program.as_str() {
            "pdfimages" => {
                let prefix = last_arg(invocation);
                // One greyscale and one colour page per PDF.
                write_pnm(&sibling(&prefix, "-000.pgm"), b"P5", 1)?;
                write_pnm(&sibling(&prefix, "-001.ppm"), b"P6", 3)?;
            }
            "convert" => {
                let target = invocation
                    .value_after("-resize")
                    .and_then(OsStr::to_str)
                    .and_then(|v| v.split('x').next())
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(PAGE_WIDTH);
                let height = target * PAGE_HEIGHT / PAGE_WIDTH;
                image::GrayImage::new(target, height)
                    .save(last_arg(invocation))
                    .map_err(io::Error::other)?;
            }
            "kdu_compress" => {
                let out = invocation.value_after("-o").expect("kdu -o");
                std::fs::write(out, jp2_header(PAGE_WIDTH, PAGE_HEIGHT))?;
            }
            "java" => {
                let source = arg_with_prefix(invocation, "-s:").expect("saxon -s:");
                assert!(source.is_file(), "folder manifest missing: {}", source.display());
                let out = arg_with_prefix(invocation, "-o:").expect("saxon -o:");
                std::fs::write(out, "<mets:mets xmlns:mets=\"http://www.loc.gov/METS/\"/>\n")?;
            }
            _ => {}
        }
        Ok(ProcessOutput {
            code: Some(0),
            ..ProcessOutput::default()
        })
    }
}

fn last_arg(invocation: &Invocation) -> PathBuf {
    PathBuf::from(invocation.args.last().expect("at least one argument"))
}

fn sibling(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn arg_with_prefix(invocation: &Invocation, prefix: &str) -> Option<PathBuf> {
    invocation
        .args
        .iter()
        .filter_map(|a| a.to_str())
        .find_map(|a| a.strip_prefix(prefix))
        .map(PathBuf::from)
}

fn write_pnm(path: &Path, magic: &[u8], channels: usize) -> io::Result<()> {
    let mut bytes = magic.to_vec();
    bytes.extend_from_slice(format!("\n{PAGE_WIDTH} {PAGE_HEIGHT}\n255\n").as_bytes());
    bytes.resize(bytes.len() + PAGE_WIDTH as usize * PAGE_HEIGHT as usize * channels, 0x80);
    std::fs::write(path, bytes)
}

/// Signature, file-type and header boxes of a JP2 file; enough to read the
/// dimensions back.
pub fn jp2_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 12, b'j', b'P', b' ', b' ', 0x0d, 0x0a, 0x87, 0x0a];
    out.extend_from_slice(&20u32.to_be_bytes());
    out.extend_from_slice(b"ftypjp2 \0\0\0\0jp2 ");
    out.extend_from_slice(&30u32.to_be_bytes());
    out.extend_from_slice(b"jp2h");
    out.extend_from_slice(&22u32.to_be_bytes());
    out.extend_from_slice(b"ihdr");
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&[0, 1, 7, 7, 0, 0]);
    out
}
