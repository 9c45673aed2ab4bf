//! MSB-first radix sort over fixed-width byte keys.

const BUCKETS: usize = 256;

/// Returns the indices of `order` rearranged so the keys they name are in
/// ascending byte-wise order.
///
/// `keys` holds one `key_len`-byte key per index. Indices whose keys are
/// equal keep their relative position in `order`.
pub fn sorted_order(keys: &[u8], key_len: usize, mut order: Vec<usize>) -> Vec<usize> {
    if order.len() < 2 || key_len == 0 {
        return order;
    }

    let mut scratch = vec![0usize; order.len()];
    // (start, end, byte) segments of `order` still to be bucketed
    let mut pending = vec![(0, order.len(), 0)];

    while let Some((lo, hi, byte)) = pending.pop() {
        if hi - lo < 2 || byte == key_len {
            continue;
        }

        let digit = |index: usize| keys[index * key_len + byte] as usize;

        let mut counts = [0usize; BUCKETS];
        for &index in &order[lo..hi] {
            counts[digit(index)] += 1;
        }

        let mut starts = [0usize; BUCKETS];
        let mut next = lo;
        for (bucket, &count) in counts.iter().enumerate() {
            starts[bucket] = next;
            if count > 1 {
                pending.push((next, next + count, byte + 1));
            }
            next += count;
        }

        for &index in &order[lo..hi] {
            let bucket = digit(index);
            scratch[starts[bucket]] = index;
            starts[bucket] += 1;
        }
        order[lo..hi].copy_from_slice(&scratch[lo..hi]);
    }

    order
}
