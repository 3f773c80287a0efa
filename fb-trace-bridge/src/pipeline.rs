use crate::extractor::{ExtractError, FieldExtractor};
use crate::persister::{PersistError, SlowLogSink};
use crate::segmenter::RawBuffer;
use backtraced_error::error_chain_to_pretty_formatted;
use thiserror::Error;
use trace_structs::{StatementCapture, TraceFormat};
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
#[error("Dropping trace block")]
enum BlockError {
    Extract(#[from] ExtractError),
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    Persisted,
    Skipped,
    Failed,
}

/// What happened to the blocks completed by one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub persisted: usize,
    /// Blocks that are not slow statements
    pub skipped: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for BatchReport {
    fn add_assign(&mut self, other: Self) {
        self.persisted += other.persisted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl BatchReport {
    fn record(&mut self, outcome: BlockOutcome) {
        match outcome {
            BlockOutcome::Persisted => self.persisted += 1,
            BlockOutcome::Skipped => self.skipped += 1,
            BlockOutcome::Failed => self.failed += 1,
        }
    }
}

/// Turns raw trace manager stdout into slow log rows.
/// Blocks are handled one at a time in stream order, every insert is awaited before the
/// next block is looked at.
pub struct SlowQueryPipeline<S> {
    buffer: RawBuffer,
    extractor: FieldExtractor,
    sink: S,
}

impl<S: SlowLogSink> SlowQueryPipeline<S> {
    pub fn new(format: TraceFormat, statement_capture: StatementCapture, sink: S) -> Self {
        Self {
            buffer: RawBuffer::new(format),
            extractor: FieldExtractor::new(statement_capture),
            sink,
        }
    }

    #[instrument(level = "debug", skip_all, fields(chunk_len = chunk.len()))]
    pub async fn on_chunk(&mut self, chunk: &[u8]) -> BatchReport {
        let blocks = self.buffer.push_chunk(chunk);
        self.process_blocks(blocks).await
    }

    /// The trace manager went away, whatever is buffered is the last event it wrote.
    #[instrument(skip_all)]
    pub async fn on_stream_end(&mut self) -> BatchReport {
        let blocks: Vec<String> = self.buffer.finish().into_iter().collect();
        self.process_blocks(blocks).await
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    async fn process_blocks(&self, blocks: Vec<String>) -> BatchReport {
        let mut report = BatchReport::default();
        for block in blocks {
            let outcome = match self.process_block(&block).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}", error_chain_to_pretty_formatted(e));
                    BlockOutcome::Failed
                }
            };
            report.record(outcome);
        }
        if report != BatchReport::default() {
            debug!(?report, "Batch done");
        }
        report
    }

    async fn process_block(&self, block: &str) -> Result<BlockOutcome, BlockError> {
        let Some(event) = self.extractor.extract(block)? else {
            return Ok(BlockOutcome::Skipped);
        };
        self.sink.insert(&event).await?;
        Ok(BlockOutcome::Persisted)
    }
}

#[cfg(test)]
mod test {
    use crate::persister::test::InMemorySlowLog;
    use crate::pipeline::{BatchReport, SlowQueryPipeline};
    use std::time::Duration;
    use trace_structs::{StatementCapture, TraceFormat};

    fn spaced_pipeline(sink: InMemorySlowLog) -> SlowQueryPipeline<InMemorySlowLog> {
        SlowQueryPipeline::new(TraceFormat::Spaced, StatementCapture::StatementToken, sink)
    }

    #[tokio::test]
    async fn two_chunks_become_two_rows_in_order() {
        tracing_config_helper::setup_tracing_console_logging_for_test();
        let mut pipeline = spaced_pipeline(InMemorySlowLog::default());
        let first = pipeline
            .on_chunk(b"2026-02-12 15:05:09 TRA_77 ... 900 ms Statement 1: SELECT 1\n")
            .await;
        assert_eq!(first, BatchReport::default());
        let second = pipeline
            .on_chunk(b"2026-02-12 15:05:10 TRA_78 ... 50 ms Statement 2: SELECT 2\n")
            .await;
        assert_eq!(second.persisted, 1);
        let last = pipeline.on_stream_end().await;
        assert_eq!(last.persisted, 1);

        let rows = pipeline.sink().rows.lock().clone();
        let transaction_ids: Vec<i64> = rows.iter().map(|row| row.transaction_id).collect();
        assert_eq!(transaction_ids, vec![77, 78]);
        assert_eq!(rows[0].duration_ms, 900);
        assert_eq!(rows[1].duration_ms, 50);
        assert!(rows[1].statement_text.starts_with("Statement 2: SELECT 2"));
    }

    #[tokio::test]
    async fn blocks_without_duration_store_nothing() {
        let mut pipeline = spaced_pipeline(InMemorySlowLog::default());
        let report = pipeline
            .on_chunk(
                b"2026-02-12 15:05:09 TRA_1 START_TRANSACTION Statement 1: SELECT 1\n\
                2026-02-12 15:05:10 TRA_2 COMMIT_TRANSACTION\n",
            )
            .await;
        assert_eq!(
            report,
            BatchReport {
                persisted: 0,
                skipped: 1,
                failed: 0
            }
        );
        assert!(pipeline.sink().rows.lock().is_empty());
    }

    #[tokio::test]
    async fn replayed_block_is_stored_twice() {
        let mut pipeline = spaced_pipeline(InMemorySlowLog::default());
        let block = b"2026-02-12 15:05:09 TRA_77 900 ms Statement 1: SELECT 1\n";
        pipeline.on_chunk(block).await;
        pipeline.on_chunk(block).await;
        pipeline.on_stream_end().await;
        let rows = pipeline.sink().rows.lock().clone();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[tokio::test]
    async fn failing_insert_drops_only_that_block() {
        let sink = InMemorySlowLog {
            fail_transaction_ids: vec![2],
            ..Default::default()
        };
        let mut pipeline = spaced_pipeline(sink);
        let report = pipeline
            .on_chunk(
                b"2026-02-12 15:05:09 TRA_1 10 ms Statement 1: SELECT 1\n\
                2026-02-12 15:05:10 TRA_2 20 ms Statement 2: SELECT 2\n\
                2026-02-12 15:05:11 TRA_3 30 ms Statement 3: SELECT 3\n\
                2026-02-12 15:05:12 tail",
            )
            .await;
        assert_eq!(
            report,
            BatchReport {
                persisted: 2,
                skipped: 0,
                failed: 1
            }
        );
        let transaction_ids: Vec<i64> = pipeline
            .sink()
            .rows
            .lock()
            .iter()
            .map(|row| row.transaction_id)
            .collect();
        assert_eq!(transaction_ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn malformed_timestamp_drops_only_that_block() {
        let mut pipeline = spaced_pipeline(InMemorySlowLog::default());
        let report = pipeline
            .on_chunk(
                b"2026-02-31 15:05:09 TRA_1 10 ms Statement 1: SELECT 1\n\
                2026-02-12 15:05:10 TRA_2 20 ms Statement 2: SELECT 2\n\
                2026-02-12 15:05:11 tail",
            )
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.persisted, 1);
    }

    #[tokio::test]
    async fn slow_sink_keeps_stream_order() {
        let sink = InMemorySlowLog {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let mut pipeline = spaced_pipeline(sink);
        let mut stream = String::new();
        for i in 0..5 {
            stream.push_str(&format!(
                "2026-02-12 15:05:0{i} TRA_{i} {i}0 ms Statement {i}: SELECT {i}\n"
            ));
        }
        for chunk in stream.as_bytes().chunks(11) {
            pipeline.on_chunk(chunk).await;
        }
        pipeline.on_stream_end().await;
        let transaction_ids: Vec<i64> = pipeline
            .sink()
            .rows
            .lock()
            .iter()
            .map(|row| row.transaction_id)
            .collect();
        assert_eq!(transaction_ids, vec![0, 1, 2, 3, 4]);
    }
}
