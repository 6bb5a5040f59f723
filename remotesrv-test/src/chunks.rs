//! Random chunk contents for tests.

use remotesrv_service::ChunkHash;

/// A chunk with random contents and a unique hash.
#[derive(Debug, Clone)]
pub struct TestChunk {
    /// The hash the chunk is stored under.
    pub hash: ChunkHash,
    /// The chunk contents.
    pub contents: Vec<u8>,
}

impl TestChunk {
    /// Generates a chunk of `size` random bytes under a random hash.
    pub fn random(size: usize) -> Self {
        let hash: String = (0..32)
            .map(|_| {
                let digit = rand::random_range(0..36u32);
                char::from_digit(digit, 36).unwrap_or('0')
            })
            .collect();

        let mut contents = vec![0; size];
        rand::fill(contents.as_mut_slice());

        Self {
            hash: hash.parse().unwrap(),
            contents,
        }
    }
}
