//! Packing of bus entries into publish batches.
//!
//! Entries are packed greedily in input order: a batch is closed as soon as the
//! next entry would exceed either the entry-count or the byte limit. An entry that
//! exceeds the byte limit on its own can never be published and is emitted as an
//! [`Chunk::Oversized`] in its input position, so concatenating all chunks always
//! reproduces the input sequence.

/// Hard limits of one SNS `PublishBatch` call
pub const SNS_MAX_BATCH_ENTRIES: usize = 10;
pub const SNS_MAX_BATCH_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_entries: SNS_MAX_BATCH_ENTRIES,
            max_bytes: SNS_MAX_BATCH_BYTES,
        }
    }
}

impl BatchLimits {
    /// Limits clamped into what a single SNS call accepts
    pub fn clamped(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.clamp(1, SNS_MAX_BATCH_ENTRIES),
            max_bytes: max_bytes.clamp(1, SNS_MAX_BATCH_BYTES),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<T> {
    /// Entries sent together in one publish call
    Publish(Vec<T>),
    /// Entry larger than a whole batch
    Oversized(T),
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        match self {
            Chunk::Publish(entries) => entries.len(),
            Chunk::Oversized(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_entries(self) -> Vec<T> {
        match self {
            Chunk::Publish(entries) => entries,
            Chunk::Oversized(entry) => vec![entry],
        }
    }
}

pub fn pack<T, F>(items: Vec<T>, limits: BatchLimits, size_of: F) -> Vec<Chunk<T>>
where
    F: Fn(&T) -> usize,
{
    let mut chunks = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let size = size_of(&item);

        if size > limits.max_bytes {
            if !current.is_empty() {
                chunks.push(Chunk::Publish(std::mem::take(&mut current)));
                current_bytes = 0;
            }
            chunks.push(Chunk::Oversized(item));
            continue;
        }

        if current.len() == limits.max_entries || current_bytes + size > limits.max_bytes {
            chunks.push(Chunk::Publish(std::mem::take(&mut current)));
            current_bytes = 0;
        }

        current_bytes += size;
        current.push(item);
    }

    if !current.is_empty() {
        chunks.push(Chunk::Publish(current));
    }

    chunks
}
