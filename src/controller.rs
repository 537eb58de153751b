use crate::error::Mismatch;
use crate::image::resolve;
use crate::image_reference::ecr_image_prefix;
use crate::patch::{Plan, plan};
use crate::state::{ControllerContext, CycleOutcome, CycleReport};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn transient(error: anyhow::Error) -> CycleOutcome {
    CycleOutcome::ErrorTransient {
        message: format!("{:#}", error),
    }
}

fn mismatch(mismatch: Mismatch) -> CycleOutcome {
    CycleOutcome::SkippedConfigMismatch { mismatch }
}

/// Runs a single reconciliation pass from freshly fetched registry and workload state.
///
/// Never fails: every error ends the pass with a mismatch or transient outcome.
pub async fn reconcile_once(ctx: &ControllerContext) -> CycleOutcome {
    let target = &ctx.target;

    let images = match ctx.registry.list_images(&target.repository).await {
        Ok(images) => images,
        Err(e) => return transient(e.context("Failed to list images from registry")),
    };
    let channel_images = images
        .iter()
        .filter(|image| image.has_tag(&target.channel_tag))
        .count();
    if channel_images > 1 {
        warn!(
            "{} images in repository {} carry the tag \"{}\", only the first one is used",
            channel_images, target.repository, target.channel_tag
        );
    }
    let resolved = match resolve(&images, &target.repository, &target.channel_tag) {
        Ok(resolved) => resolved,
        Err(e) => return mismatch(e),
    };
    let expected_prefix = ecr_image_prefix(&target.region, resolved.record);
    info!(
        "Channel tag \"{}\" of {} points at build tag \"{}\"",
        target.channel_tag, target.repository, resolved.build_tag
    );

    // Matching and patching must both use this one snapshot, container
    // positions can change between reads.
    let snapshot = match ctx.workload_store.get_snapshot(&target.workload).await {
        Ok(snapshot) => snapshot,
        Err(e) => return transient(e),
    };
    let Some(index) = snapshot.find_container_index(&expected_prefix) else {
        return mismatch(Mismatch::ContainerNotFound {
            workload: target.workload.to_string(),
            prefix: expected_prefix,
        });
    };
    let container = &snapshot.containers[index];

    match plan(&container.image, resolved.build_tag, index) {
        Plan::NoOp => CycleOutcome::NoOpAlreadyCurrent {
            container: container.name.clone(),
            tag: resolved.build_tag.to_string(),
        },
        Plan::Patch {
            document,
            new_image,
        } => {
            info!(
                "Updating container {} of {} from {} to {}",
                container.name, target.workload, container.image, new_image
            );
            match ctx
                .workload_store
                .apply_patch(&target.workload, &document)
                .await
            {
                Ok(()) => CycleOutcome::Updated {
                    container: container.name.clone(),
                    image: new_image,
                },
                Err(e) => transient(e),
            }
        }
    }
}

fn log_outcome(ctx: &ControllerContext, outcome: &CycleOutcome) {
    let workload = &ctx.target.workload;
    match outcome {
        CycleOutcome::Updated { container, image } => info!(
            "Successfully updated container {} of {} to image {}",
            container, workload, image
        ),
        CycleOutcome::NoOpAlreadyCurrent { container, tag } => info!(
            "Skipping {} because container {} is already using image tag \"{}\"",
            workload, container, tag
        ),
        CycleOutcome::SkippedConfigMismatch { mismatch } => {
            warn!("Skipping {}: {}", workload, mismatch)
        }
        CycleOutcome::ErrorTransient { message } => {
            error!("Error reconciling {}: {}", workload, message)
        }
    }
}

/// Runs reconciliation cycles until `cancel` fires, sleeping `interval` between them.
///
/// Cancellation is only observed between cycles and while sleeping; a cycle that
/// has started always runs to completion.
pub async fn run(
    ctx: ControllerContext,
    interval: Duration,
    cancel: CancellationToken,
    reports: watch::Sender<Option<CycleReport>>,
) {
    info!(
        "Reconciling {} against tag \"{}\" of repository {} every {:?}",
        ctx.target.workload, ctx.target.channel_tag, ctx.target.repository, interval
    );
    let mut cycle: u64 = 0;
    while !cancel.is_cancelled() {
        cycle += 1;
        let outcome = reconcile_once(&ctx).await;
        log_outcome(&ctx, &outcome);
        reports.send_replace(Some(CycleReport {
            cycle,
            finished_at: Utc::now(),
            outcome,
        }));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Reconciliation loop stopped after {} cycles", cycle);
}
