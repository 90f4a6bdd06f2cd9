//! Export consumer: drains the pipe into the local image loader.

use tracing::{debug, instrument};

use crate::adapters::ImageLoader;

use super::error::BuildError;
use super::pipe::PipeReader;

/// Feed the whole exported stream to `loader`.
///
/// The read side is closed afterwards whatever the outcome, so a writer that
/// is still producing gets `BrokenPipe` instead of blocking forever.
#[instrument(skip_all, fields(loader = loader.name()))]
pub async fn export_to_loader<L>(loader: &L, mut reader: PipeReader) -> Result<(), BuildError>
where
    L: ImageLoader + ?Sized,
{
    let result = loader.load(&mut reader).await;
    reader.close();
    match &result {
        Ok(()) => debug!("image loaded"),
        Err(err) => debug!(error = %err, "image load failed"),
    }
    result
}
