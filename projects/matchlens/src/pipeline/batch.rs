use crate::error::{InferenceError, PipelineError};
use tracing::warn;

/// Run `infer` over `items` in chunks of `initial_batch`.
///
/// A resource-exhaustion error retries the same chunk at half the size. The
/// reduced size is kept for the remaining chunks. Exhaustion at size 1 and any
/// other backend error are fatal.
pub fn run_batched<T, R, F>(
    items: &[T],
    initial_batch: usize,
    stage: &'static str,
    mut infer: F,
) -> Result<Vec<R>, PipelineError>
where
    F: FnMut(&[T]) -> Result<Vec<R>, InferenceError>,
{
    let mut batch = initial_batch.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut start = 0;

    while start < items.len() {
        let end = (start + batch).min(items.len());
        match infer(&items[start..end]) {
            Ok(chunk) => {
                if chunk.len() != end - start {
                    return Err(PipelineError::BatchMismatch {
                        stage,
                        expected: end - start,
                        got: chunk.len(),
                    });
                }
                results.extend(chunk);
                start = end;
            }
            Err(e) if e.is_resource_exhausted() => {
                if batch == 1 {
                    return Err(PipelineError::ExhaustedAtMinBatch { stage });
                }
                batch = (batch / 2).max(1);
                warn!("{}: {}, retrying with batch size {}", stage, e, batch);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(results)
}
