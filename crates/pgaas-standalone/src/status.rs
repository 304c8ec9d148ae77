//! Status and condition management
//!
//! An instance moves Progressing → Ready once per change:
//!
//! - `mark-progressing` sets `Progressing=True` and `Ready=False` together,
//!   stamped with the generation being converged.
//! - `check-readiness` sets `Ready=True` and removes `Progressing` once the
//!   Helm release is synced and ready.
//!
//! A release's Ready condition only counts if it transitioned at or after
//! `status.helmChart.modifiedTime`, the readiness watermark. The release
//! step advances the watermark whenever the applied values change, so a
//! Ready report that predates the change is ignored until the provider
//! re-syncs.

use chrono::{DateTime, SubsecRound, Utc};
use kube::{Resource, ResourceExt};
use pgaas_common::crd::{
    find_condition, remove_condition, set_condition, Condition, ConditionStatus,
    DeploymentStrategy, PostgresqlStandaloneStatus, Release, CONDITION_PROGRESSING,
    CONDITION_READY,
};
use pgaas_common::events::InstanceEvent;
use pgaas_common::Result;
use pgaas_pipeline::Context;
use tracing::{debug, info};

use crate::keys::{EVENTS, INSTANCE, NOW, READY, RELEASE, STORE};

/// Apply `mutate` to the instance status and persist it if anything changed.
///
/// The written instance replaces [`INSTANCE`] so later writes carry the new
/// resourceVersion.
pub async fn update_status<F>(ctx: &mut Context, mutate: F) -> Result<()>
where
    F: FnOnce(&mut PostgresqlStandaloneStatus) + Send,
{
    let store = ctx.get(STORE)?.clone();
    let mut instance = ctx.get(INSTANCE)?.clone();
    let before = instance.status.clone();
    mutate(instance.status.get_or_insert_with(Default::default));
    if instance.status == before {
        return Ok(());
    }
    let updated = store.update_status(&instance).await?;
    ctx.set(INSTANCE, updated);
    Ok(())
}

/// True if the release reports Synced and Ready, and Ready transitioned at
/// or after `watermark`
///
/// Provider conditions carry whole seconds, so the watermark is compared at
/// second granularity.
pub fn is_release_ready(release: &Release, watermark: Option<DateTime<Utc>>) -> bool {
    let synced = release.synced().is_some_and(Condition::is_true);
    let Some(ready) = release.ready().filter(|c| c.is_true()) else {
        return false;
    };
    synced
        && watermark.map_or(true, |w| {
            ready.last_transition_time.trunc_subsecs(0) >= w.trunc_subsecs(0)
        })
}

/// Set Progressing=True and Ready=False for the current generation
pub async fn mark_progressing(ctx: &mut Context) -> Result<()> {
    let now = *ctx.get(NOW)?;
    let instance = ctx.get(INSTANCE)?;
    let generation = instance.metadata.generation;
    let was_progressing = instance
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_PROGRESSING))
        .is_some_and(Condition::is_true);

    update_status(ctx, move |status| {
        status.deployment_strategy = Some(DeploymentStrategy::HelmChart);
        status.observed_generation = generation;
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::True,
                "Reconciling",
                "Dependent resources are being converged",
                now,
            )
            .with_generation(generation),
        );
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                "Progressing",
                "Waiting for the Helm release to become ready",
                now,
            )
            .with_generation(generation),
        );
    })
    .await?;

    if !was_progressing {
        let instance = ctx.get(INSTANCE)?;
        let reference = instance.object_ref(&());
        ctx.get(EVENTS)?
            .publish(
                &reference,
                InstanceEvent::Progressing {
                    generation: generation.unwrap_or_default(),
                },
            )
            .await;
    }
    Ok(())
}

/// Record whether the release has caught up and, if so, mark the instance Ready
pub async fn check_readiness(ctx: &mut Context) -> Result<()> {
    let now = *ctx.get(NOW)?;
    let instance = ctx.get(INSTANCE)?;
    let watermark = instance
        .status
        .as_ref()
        .and_then(|s| s.helm_chart.as_ref())
        .and_then(|h| h.modified_time);
    let was_ready = instance.status.as_ref().is_some_and(|s| s.is_ready());
    let generation = instance.metadata.generation;
    let name = instance.name_any();

    let ready = is_release_ready(ctx.get(RELEASE)?, watermark);
    ctx.set(READY, ready);
    if !ready {
        debug!(instance = %name, watermark = ?watermark, "release not ready yet");
        return Ok(());
    }

    update_status(ctx, move |status| {
        status.observed_generation = generation;
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                "Available",
                "PostgreSQL is ready",
                now,
            )
            .with_generation(generation),
        );
        remove_condition(&mut status.conditions, CONDITION_PROGRESSING);
    })
    .await?;

    if !was_ready {
        info!(instance = %name, "instance is ready");
        let reference = ctx.get(INSTANCE)?.object_ref(&());
        ctx.get(EVENTS)?
            .publish(&reference, InstanceEvent::Ready)
            .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Harness};
    use chrono::Duration;
    use pgaas_common::crd::{ReleaseSpec, ReleaseStatus};

    fn release_with(synced: bool, ready: bool, ready_at: DateTime<Utc>) -> Release {
        let mut release = Release::new("sv-postgresql-s-test", ReleaseSpec::default());
        release.status = Some(ReleaseStatus {
            conditions: vec![
                Condition::new("Synced", synced.into(), "", "", ready_at),
                Condition::new(CONDITION_READY, ready.into(), "", "", ready_at),
            ],
        });
        release
    }

    #[test]
    fn release_ready_requires_synced_and_ready() {
        let t = fixtures::now();
        assert!(is_release_ready(&release_with(true, true, t), None));
        assert!(!is_release_ready(&release_with(false, true, t), None));
        assert!(!is_release_ready(&release_with(true, false, t), None));
        assert!(!is_release_ready(&Release::new("r", ReleaseSpec::default()), None));
    }

    /// Story: a Ready report from before the last values change is stale
    #[test]
    fn story_watermark_rejects_stale_ready() {
        let watermark = fixtures::now();
        let before = watermark - Duration::seconds(1);
        let after = watermark + Duration::seconds(1);

        assert!(!is_release_ready(&release_with(true, true, before), Some(watermark)));
        assert!(is_release_ready(&release_with(true, true, watermark), Some(watermark)));
        assert!(is_release_ready(&release_with(true, true, after), Some(watermark)));
    }

    #[test]
    fn ready_in_the_same_second_as_a_subsecond_watermark_counts() {
        let watermark = fixtures::now() + Duration::milliseconds(5_400);
        let reported = fixtures::now() + Duration::seconds(5);

        assert!(is_release_ready(&release_with(true, true, reported), Some(watermark)));
        assert!(!is_release_ready(
            &release_with(true, true, reported - Duration::seconds(1)),
            Some(watermark)
        ));
    }

    #[tokio::test]
    async fn mark_progressing_sets_both_conditions() {
        let harness = Harness::new();
        let mut ctx = harness.context();

        mark_progressing(&mut ctx).await.unwrap();

        let status = harness.instance().status.unwrap();
        let progressing = find_condition(&status.conditions, CONDITION_PROGRESSING).unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert!(progressing.is_true());
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(progressing.observed_generation, Some(1));
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.deployment_strategy, Some(DeploymentStrategy::HelmChart));
    }

    #[tokio::test]
    async fn ready_removes_progressing() {
        let harness = Harness::new();
        let mut ctx = harness.context();
        mark_progressing(&mut ctx).await.unwrap();
        ctx.set(RELEASE, release_with(true, true, fixtures::now()));

        check_readiness(&mut ctx).await.unwrap();

        assert_eq!(ctx.get(READY).unwrap(), &true);
        let status = harness.instance().status.unwrap();
        assert!(status.is_ready());
        assert!(find_condition(&status.conditions, CONDITION_PROGRESSING).is_none());
    }

    #[tokio::test]
    async fn not_ready_leaves_status_alone() {
        let harness = Harness::new();
        let mut ctx = harness.context();
        mark_progressing(&mut ctx).await.unwrap();
        harness.memory.clear_operations();
        ctx.set(RELEASE, release_with(true, false, fixtures::now()));

        check_readiness(&mut ctx).await.unwrap();

        assert_eq!(ctx.get(READY).unwrap(), &false);
        assert!(harness.memory.operations().is_empty());
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let harness = Harness::new();
        let mut ctx = harness.context();
        mark_progressing(&mut ctx).await.unwrap();
        harness.memory.clear_operations();

        mark_progressing(&mut ctx).await.unwrap();
        assert!(harness.memory.operations().is_empty());
    }
}
