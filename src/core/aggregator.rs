//! Platform fan-out: one solve per target platform, merged in input order.
//!
//! Each platform's task owns exactly one result slot, addressed by the
//! platform's position in the request. Completion order never affects the
//! merged result.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::adapters::{GatewayClient, SolveRequest};
use crate::domain::{
    ExportPlatform, ExportPlatforms, GatewayResult, GraphState, ImageConfig, Platform, Reference,
    IMAGE_CONFIG_KEY, PLATFORMS_KEY,
};

use super::cancel::CancelToken;
use super::error::BuildError;
use super::group::TaskGroup;

/// Output of one platform's solve
#[derive(Debug, Clone, PartialEq)]
struct PlatformOutput {
    reference: Reference,
    config: Vec<u8>,
}

/// Marshal, stamp and solve one graph; returns its reference and config JSON
async fn solve_state<G>(
    client: &dyn GatewayClient,
    cancel: &CancelToken,
    state: &G,
    image: ImageConfig,
) -> Result<PlatformOutput, BuildError>
where
    G: GraphState + ?Sized,
{
    let definition = state.marshal()?;
    let config = image.with_created(Utc::now()).to_json()?;

    let result = client
        .solve(SolveRequest { definition }, cancel)
        .await?;
    let reference = result.single_ref()?;
    Ok(PlatformOutput { reference, config })
}

/// Build one image and attach its configuration under the canonical key
#[instrument(skip_all)]
pub async fn build_image<G>(
    client: &dyn GatewayClient,
    cancel: &CancelToken,
    state: &G,
    image: ImageConfig,
) -> Result<GatewayResult, BuildError>
where
    G: GraphState + ?Sized,
{
    let output = solve_state(client, cancel, state, image).await?;
    let mut result = GatewayResult::with_ref(output.reference);
    result.add_meta(IMAGE_CONFIG_KEY, output.config);
    Ok(result)
}

/// Solve `state` and read `path` from the resulting filesystem
#[instrument(skip(client, cancel, state))]
pub async fn read_from_state<G>(
    client: &dyn GatewayClient,
    cancel: &CancelToken,
    state: &G,
    path: &str,
) -> Result<Vec<u8>, BuildError>
where
    G: GraphState + ?Sized,
{
    let definition = state.marshal()?;
    let result = client
        .solve(SolveRequest { definition }, cancel)
        .await?;
    let reference = result.single_ref()?;
    client.read_file(&reference, path, cancel).await
}

/// Build for every platform concurrently and merge the results.
///
/// `produce` returns the graph and image configuration for one platform.
/// The first failing platform cancels the others and its error is returned;
/// no partial result is produced.
#[instrument(skip(client, cancel, produce), fields(platforms = platforms.len()))]
pub async fn build_for_platforms<F, Fut, G>(
    client: Arc<dyn GatewayClient>,
    cancel: &CancelToken,
    platforms: &[Platform],
    produce: F,
) -> Result<GatewayResult, BuildError>
where
    F: Fn(Arc<dyn GatewayClient>, CancelToken, Platform) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(G, ImageConfig), BuildError>> + Send + 'static,
    G: GraphState + 'static,
{
    if platforms.is_empty() {
        return Err(BuildError::Unsupported("no target platforms".to_string()));
    }
    let mut seen = HashSet::new();
    for platform in platforms {
        if !seen.insert(platform) {
            return Err(BuildError::Unsupported(format!(
                "platform {} requested more than once",
                platform
            )));
        }
    }

    let produce = Arc::new(produce);
    let mut group: TaskGroup<(usize, PlatformOutput)> = TaskGroup::new(cancel);

    for (idx, platform) in platforms.iter().cloned().enumerate() {
        let client = Arc::clone(&client);
        let produce = Arc::clone(&produce);
        let scope = group.token();
        group.spawn("platform", async move {
            let key = platform.key();
            let (state, image) = produce(Arc::clone(&client), scope.clone(), platform).await?;
            let output = solve_state(client.as_ref(), &scope, &state, image).await?;
            debug!(platform = %key, reference = output.reference.id(), "Platform solved");
            Ok((idx, output))
        });
    }

    let mut slots: Vec<Option<PlatformOutput>> = vec![None; platforms.len()];
    for (idx, output) in group.wait().await? {
        slots[idx] = Some(output);
    }

    let result = merge(platforms, slots)?;
    info!(refs = result.refs.len().max(1), "Merged platform results");
    Ok(result)
}

fn merge(
    platforms: &[Platform],
    slots: Vec<Option<PlatformOutput>>,
) -> Result<GatewayResult, BuildError> {
    let mut result = GatewayResult::new();

    if platforms.len() == 1 {
        let output = slots
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| missing_slot(&platforms[0]))?;
        result.add_meta(IMAGE_CONFIG_KEY, output.config);
        result.set_ref(output.reference);
        return Ok(result);
    }

    let mut manifest = ExportPlatforms::default();
    for (platform, slot) in platforms.iter().zip(slots) {
        let output = slot.ok_or_else(|| missing_slot(platform))?;
        let key = platform.key();
        result.add_meta(format!("{}/{}", IMAGE_CONFIG_KEY, key), output.config);
        result.add_ref(key.clone(), output.reference);
        manifest.platforms.push(ExportPlatform {
            id: key,
            platform: platform.clone(),
        });
    }
    result.add_meta(PLATFORMS_KEY, serde_json::to_vec(&manifest)?);
    Ok(result)
}

fn missing_slot(platform: &Platform) -> BuildError {
    BuildError::MissingReference(format!("no result for platform {}", platform))
}
