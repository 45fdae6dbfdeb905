/// Insert `items` into `list` at `at`, in chunks of at most `chunk` elements.
///
/// Chunks are taken from the tail of `items` backward and each one is
/// spliced at the same index, so the final order matches a single insert.
pub fn splice_bounded<T>(list: &mut Vec<T>, at: usize, mut items: Vec<T>, chunk: usize) {
    let at = at.min(list.len());
    let chunk = chunk.max(1);
    if items.len() <= chunk {
        list.splice(at..at, items);
        return;
    }

    tracing::debug!(
        event = "splice.chunked",
        total = items.len(),
        chunk,
        "inserting in chunks"
    );
    list.reserve(items.len());
    while !items.is_empty() {
        let start = items.len().saturating_sub(chunk);
        let tail = items.split_off(start);
        list.splice(at..at, tail);
    }
}
