//! External tools used by the format readers
//!
//! - LibreOffice (`soffice`) - legacy office document to text conversion
//! - tesseract - OCR on images and rasterized pages
//! - pdftoppm (poppler-utils) - PDF page rasterization
//! - mutool (MuPDF) - XPS page rasterization
//!
//! Every invocation is bounded by a timeout or by the worker deadline that
//! owns the calling process.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::reader::{decode_text, ReadError};

const WAIT_STEP: Duration = Duration::from_millis(25);

/// Captured result of a finished tool run
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, killing it once `timeout` elapses
///
/// Non-zero exit codes are reported as [`ReadError::ToolFailed`].
pub fn run_with_timeout(
    mut command: Command,
    tool: &'static str,
    timeout: Duration,
) -> Result<ToolOutput, ReadError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ReadError::ToolFailed {
            tool,
            message: format!("failed to spawn: {}", e),
        })?;

    // Drain both pipes on helper threads so a chatty tool cannot block on a full pipe
    let stdout_reader = child.stdout.take().map(drain_pipe);
    let stderr_reader = child.stderr.take().map(drain_pipe);

    let started = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReadError::Timeout {
                    tool,
                    secs: timeout.as_secs_f64(),
                });
            }
            None => std::thread::sleep(WAIT_STEP),
        }
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    if !status.success() {
        return Err(ReadError::ToolFailed {
            tool,
            message: format!("{} ({})", stderr.trim(), status),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Convert a legacy office document to text with LibreOffice
///
/// The converter writes `<stem>.txt` into a private scratch directory, which
/// is read back and removed.
pub fn convert_to_text(
    converter: &Path,
    input: &Path,
    scratch: &Path,
    timeout: Duration,
    keep_intermediate: bool,
) -> Result<String, ReadError> {
    fs::create_dir_all(scratch)?;

    let mut command = Command::new(converter);
    command
        .arg("--headless")
        .arg("--convert-to")
        .arg("txt:Text")
        .arg("--outdir")
        .arg(scratch)
        .arg(input);

    let result = run_with_timeout(command, "converter", timeout).and_then(|output| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text_path = scratch.join(format!("{}.txt", stem));
        if !text_path.is_file() {
            return Err(ReadError::ToolFailed {
                tool: "converter",
                message: format!(
                    "converted text file not found: {}. Converter output: {} {}",
                    text_path.display(),
                    output.stdout.trim(),
                    output.stderr.trim()
                ),
            });
        }
        Ok(decode_text(&fs::read(&text_path)?))
    });

    if !keep_intermediate {
        fs::remove_dir_all(scratch).ok();
    }
    result
}

/// Run tesseract on one image and return the recognized text
pub fn ocr_image(tesseract: &Path, image: &Path, language: &str) -> Result<String, ReadError> {
    let mut command = Command::new(tesseract);
    command.arg(image).arg("stdout").arg("-l").arg(language);

    // OCR has no timeout of its own: the supervisor deadline bounds the worker
    let output = run_with_timeout(command, "tesseract", Duration::MAX)?;
    Ok(output.stdout)
}

/// Rasterize every page of a PDF into `outdir` with pdftoppm
pub fn rasterize_pdf(
    rasterizer: &Path,
    input: &Path,
    resolution: u32,
    outdir: &Path,
) -> Result<Vec<PathBuf>, ReadError> {
    fs::create_dir_all(outdir)?;
    let mut command = Command::new(rasterizer);
    command
        .arg("-png")
        .arg("-r")
        .arg(resolution.to_string())
        .arg(input)
        .arg(outdir.join("page"));
    run_with_timeout(command, "rasterizer", Duration::MAX)?;
    collect_page_images(outdir, "rasterizer")
}

/// Rasterize every page of an XPS document into `outdir` with `mutool draw`
pub fn rasterize_xps(
    rasterizer: &Path,
    input: &Path,
    resolution: u32,
    outdir: &Path,
) -> Result<Vec<PathBuf>, ReadError> {
    fs::create_dir_all(outdir)?;
    let mut command = Command::new(rasterizer);
    command
        .arg("draw")
        .arg("-r")
        .arg(resolution.to_string())
        .arg("-o")
        .arg(outdir.join("page-%d.png"))
        .arg(input);
    run_with_timeout(command, "xps_rasterizer", Duration::MAX)?;
    collect_page_images(outdir, "xps_rasterizer")
}

/// Page images in page order
fn collect_page_images(dir: &Path, tool: &'static str) -> Result<Vec<PathBuf>, ReadError> {
    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    images.sort_by_key(|p| (page_number(p), p.clone()));

    if images.is_empty() {
        return Err(ReadError::ToolFailed {
            tool,
            message: "produced no page images".to_string(),
        });
    }
    Ok(images)
}

/// Trailing number of an image name such as `page-12.png`
fn page_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}
