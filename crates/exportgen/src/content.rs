use bytes::Bytes;

/// Produces the pseudo-content for one chunk.
///
/// The bytes are the marker `"Chunk {chunk_id} - "` repeated and truncated to
/// exactly `size` bytes. The output depends only on the arguments, so chunks
/// can be generated in any order (or concurrently) and regenerated for
/// verification.
///
/// # Example
/// ```
/// let bytes = exportgen::generate(7, 24);
/// assert_eq!(&bytes[..], b"Chunk 7 - Chunk 7 - Chun");
/// ```
pub fn generate(chunk_id: u64, size: u32) -> Bytes {
    let mut buf = Vec::new();
    fill(chunk_id, &mut buf, size as usize);
    Bytes::from(buf)
}

/// Writes the content of `chunk_id` into `buf`, replacing its contents.
///
/// Reuses the allocation of `buf`, which makes it suitable for hot loops that
/// hand the bytes off by copy.
pub fn fill(chunk_id: u64, buf: &mut Vec<u8>, size: usize) {
    buf.clear();
    buf.reserve(size);

    let marker = format!("Chunk {chunk_id} - ");
    let seed = marker.len().min(size);
    buf.extend_from_slice(&marker.as_bytes()[..seed]);

    // Double the filled prefix until the target is reached. The prefix is
    // always a whole number of markers, so the pattern stays aligned.
    while buf.len() < size {
        let take = buf.len().min(size - buf.len());
        buf.extend_from_within(..take);
    }
}
