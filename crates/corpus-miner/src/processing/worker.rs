//! Extraction worker process loop
//!
//! Runs inside `corpus-miner worker`. Reads requests from stdin and reports
//! on stdout; all logging goes to stderr.

use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use super::protocol::{decode_request, encode_line, ExtractionOutcome, WorkerEvent, WorkerRequest};
use crate::error::Result;
use crate::ingestion::FormatReader;

/// Serve requests until the stop sentinel or end of input
///
/// Returns the number of tasks handled.
pub fn serve<R: BufRead, W: Write>(
    worker_id: usize,
    reader: &FormatReader,
    input: R,
    mut output: W,
) -> Result<usize> {
    tracing::debug!("Worker {} ready", worker_id);
    let mut handled = 0;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match decode_request(&line) {
            Ok(WorkerRequest::Task { task_id, path }) => {
                let started = Instant::now();
                let page_count = reader.page_count(&path);
                send(&mut output, &WorkerEvent::Started { task_id, page_count })?;

                let outcome = extract(reader, &path);
                if let Some(error) = outcome.error() {
                    tracing::warn!("Worker {}: error processing {:?}: {}", worker_id, path, error);
                }
                send(
                    &mut output,
                    &WorkerEvent::Finished {
                        task_id,
                        outcome,
                        duration: started.elapsed(),
                    },
                )?;
                handled += 1;
            }
            Ok(WorkerRequest::Stop) => {
                tracing::debug!("Worker {} received stop after {} tasks", worker_id, handled);
                break;
            }
            Err(e) => {
                tracing::warn!("Worker {} ignoring malformed request: {}", worker_id, e);
            }
        }
    }

    Ok(handled)
}

/// Read one file, turning reader failures and panics into an inline error
fn extract(reader: &FormatReader, path: &Path) -> ExtractionOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| reader.read(path))) {
        Ok(Ok(content)) => ExtractionOutcome::Extracted { content },
        Ok(Err(e)) => ExtractionOutcome::failed(e.to_record_error()),
        Err(_) => ExtractionOutcome::failed("Reader Error: reader panicked"),
    }
}

fn send<W: Write>(output: &mut W, event: &WorkerEvent) -> Result<()> {
    output.write_all(encode_line(event)?.as_bytes())?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::processing::protocol::decode_event;
    use std::io::Cursor;

    #[test]
    fn test_serve_reports_start_then_finish() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "hello worker").unwrap();
        let bad = dir.path().join("bad.xyz");
        std::fs::write(&bad, "??").unwrap();

        let mut input = String::new();
        input.push_str(&encode_line(&WorkerRequest::Task { task_id: 1, path: good }).unwrap());
        input.push_str("garbage\n");
        input.push_str(&encode_line(&WorkerRequest::Task { task_id: 2, path: bad }).unwrap());
        input.push_str(&encode_line(&WorkerRequest::Stop).unwrap());
        input.push_str(&encode_line(&WorkerRequest::Task { task_id: 3, path: "x".into() }).unwrap());

        let reader = FormatReader::new(ReaderConfig::without_tools());
        let mut output = Vec::new();
        let handled = serve(0, &reader, Cursor::new(input), &mut output).unwrap();
        assert_eq!(handled, 2);

        let events: Vec<WorkerEvent> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| decode_event(l).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], WorkerEvent::Started { task_id: 1, page_count: 0 });
        match &events[1] {
            WorkerEvent::Finished { task_id: 1, outcome, .. } => {
                assert_eq!(outcome.content(), Some("hello worker"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[3] {
            WorkerEvent::Finished { task_id: 2, outcome, .. } => {
                assert_eq!(outcome.error(), Some("Reader Error: unsupported file type 'xyz'"))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
