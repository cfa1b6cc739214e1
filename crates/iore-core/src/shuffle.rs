use crate::error::Result;
use crate::prng::{PrngDistribution, PrngStream};

/// Permute `items` in place, reproducibly for a given `seed`.
///
/// Draws `j` from Uniform(0, n) for every position `i` and swaps the two
/// when they differ.
pub fn shuffle<T>(items: &mut [T], seed: u32) -> Result<()> {
    let n = items.len();
    if n < 2 {
        return Ok(());
    }

    let dist = PrngDistribution::uniform(0.0, n as f64);
    let mut stream = PrngStream::new_seeded(&dist, seed)?;
    let last = n - 1;

    for i in 0..n {
        let j = (stream.next_uint() as usize).min(last);
        if i != j {
            items.swap(i, j);
        }
    }

    Ok(())
}
