use bytes::Bytes;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_seeded_bytes_different_seeds() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(43, 1000);
        assert_ne!(data1, data2);
    }

    #[test]
    fn test_split_into_chunks() {
        let data = seeded_bytes(1, 250);
        let chunks = split_into_chunks(&data, 100);
        assert_eq!(
            chunks.iter().map(Bytes::len).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
    }
}
