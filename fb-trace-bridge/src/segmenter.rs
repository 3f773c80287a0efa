use regex::bytes::Regex;
use std::sync::OnceLock;
use trace_structs::TraceFormat;

/// Completed blocks at most this many characters long after trimming are dropped as noise.
pub const NOISE_BLOCK_MAX_CHARS: usize = 10;

/// `\n` plus `YYYY-MM-DD HH:MM:SS`, the same length for both header layouts.
const BOUNDARY_MATCH_LEN: usize = 20;

pub fn boundary_regex(format: TraceFormat) -> &'static Regex {
    static SPACED: OnceLock<Regex> = OnceLock::new();
    static ISO_T: OnceLock<Regex> = OnceLock::new();
    match format {
        TraceFormat::Spaced => SPACED.get_or_init(|| {
            Regex::new(r"\n[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}")
                .expect("Invalid regex")
        }),
        TraceFormat::IsoT => ISO_T.get_or_init(|| {
            Regex::new(r"\n[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}")
                .expect("Invalid regex")
        }),
    }
}

/// Splits `buffer` at every newline directly followed by an event header, looking for
/// headers from `search_from` on.
/// Returns the completed blocks in order and the trailing, possibly truncated, remainder.
/// The separating newline belongs to neither side.
fn segment<'a>(
    buffer: &'a [u8],
    boundary: &Regex,
    search_from: usize,
) -> (Vec<&'a [u8]>, &'a [u8]) {
    let mut blocks = vec![];
    let mut block_start = 0;
    for boundary_match in boundary.find_iter(&buffer[search_from..]) {
        let newline_at = search_from + boundary_match.start();
        blocks.push(&buffer[block_start..newline_at]);
        block_start = newline_at + 1;
    }
    (blocks, &buffer[block_start..])
}

pub fn is_noise(block: &str) -> bool {
    block.trim().chars().count() <= NOISE_BLOCK_MAX_CHARS
}

/// Trace manager stdout not yet cut into blocks.
/// Kept as bytes so a character split across two reads is only decoded once whole.
#[derive(Debug)]
pub struct RawBuffer {
    pending: Vec<u8>,
    // everything before this offset was already searched and holds no boundary
    searched_up_to: usize,
    boundary: &'static Regex,
}

impl RawBuffer {
    pub fn new(format: TraceFormat) -> Self {
        Self {
            pending: vec![],
            searched_up_to: 0,
            boundary: boundary_regex(format),
        }
    }

    /// Appends a chunk and returns the blocks it completed, noise already removed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return vec![];
        }
        self.pending.extend_from_slice(chunk);
        // a boundary may start in the old tail and end inside the new chunk
        let search_from = self.searched_up_to.saturating_sub(BOUNDARY_MATCH_LEN - 1);
        let (blocks, remainder) = segment(&self.pending, self.boundary, search_from);
        if blocks.is_empty() {
            self.searched_up_to = self.pending.len();
            return vec![];
        }
        let completed = blocks
            .into_iter()
            .map(|block| String::from_utf8_lossy(block).into_owned())
            .filter(|block| !is_noise(block))
            .collect();
        let consumed = self.pending.len() - remainder.len();
        self.pending.drain(..consumed);
        self.searched_up_to = self.pending.len();
        completed
    }

    /// Drains whatever is left as the last block of the stream.
    /// The newline closing the stream is dropped, the same way the newline before a
    /// header is, so the tail looks like any other completed block.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.searched_up_to = 0;
        let rest = rest.strip_suffix(b"\n").unwrap_or(&rest);
        let block = String::from_utf8_lossy(rest).into_owned();
        if is_noise(&block) {
            None
        } else {
            Some(block)
        }
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
