use bytes::Bytes;

/// Generate deterministic test data using a seeded pseudo-random generator
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split data into fixed-size chunks, the last one possibly shorter.
pub fn split_into_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}
