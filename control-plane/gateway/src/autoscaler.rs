//! Provisioning autoscaler (§4.1): maintains an effective target claim count
//! `T` for the pool, with a scale-up cooldown and scale-down hysteresis, and
//! reconciles the pool's claim count toward `min(T, provisioned_count)`.

use crate::config::CliArgs;
use chrono::{DateTime, Utc};
use common::{labels::ClaimLabels, resource_store::ResourceStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Mutable autoscaler state carried between ticks. Lives only in this task —
/// nothing here is persisted, so a restart resets to `T_base` and relearns the
/// pool's shape from the next tick's claim count.
struct AutoscalerState {
    target: u32,
    last_scale_up: Option<DateTime<Utc>>,
    available_since: Option<DateTime<Utc>>,
}

/// Pure scale-up/scale-down policy, factored out of `Autoscaler` so it can be
/// exercised in tests without a live `ResourceStore`.
struct ScalingPolicy {
    base: u32,
    max: u32,
    increment: u32,
    available_threshold: u32,
    scale_up_cooldown: Duration,
    scale_down_hysteresis: Duration,
}

pub struct Autoscaler {
    store: ResourceStore,
    pool_name: String,
    claim_prefix: String,
    policy: ScalingPolicy,
    tick_period: Duration,
}

impl ScalingPolicy {
    /// Implements steps 2-3 of §4.1: scale-up on low availability (subject to
    /// cooldown), scale-down on sustained high availability (subject to
    /// hysteresis), clearing `available_since` the instant the scale-up
    /// condition re-triggers so the two never flap against each other.
    fn apply(&self, state: &mut AutoscalerState, now: DateTime<Utc>, available: u32, ready: u32) {
        let cooldown_elapsed = state
            .last_scale_up
            .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() >= self.scale_up_cooldown)
            .unwrap_or(true);

        let should_scale_up = available <= self.available_threshold && ready > 0 && state.target < self.max && cooldown_elapsed;

        if should_scale_up {
            state.target = (state.target + self.increment).min(self.max);
            state.last_scale_up = Some(now);
            state.available_since = None;
            tracing::info!(target = state.target, "autoscaler scaled up");
            return;
        }

        if available > self.available_threshold {
            let since = *state.available_since.get_or_insert(now);
            let held_long_enough = now.signed_duration_since(since).to_std().unwrap_or_default() >= self.scale_down_hysteresis;
            if state.target > self.base && held_long_enough {
                state.target = self.base;
                state.available_since = None;
                tracing::info!(target = state.target, "autoscaler scaled down");
            }
        } else {
            state.available_since = None;
        }
    }
}

impl Autoscaler {
    pub fn new(store: ResourceStore, args: &CliArgs) -> Self {
        Self {
            store,
            pool_name: args.pool_name.clone(),
            claim_prefix: args.claim_prefix.clone(),
            policy: ScalingPolicy {
                base: args.pool_base,
                max: args.pool_max,
                increment: args.pool_increment,
                available_threshold: args.available_threshold,
                scale_up_cooldown: args.scale_up_cooldown.into(),
                scale_down_hysteresis: args.scale_down_hysteresis.into(),
            },
            tick_period: args.reconcile_period.into(),
        }
    }

    /// Runs until `cancel` fires. Errors within a single tick are logged and
    /// retried after a short backoff; the loop itself never returns early on
    /// error, only on cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut state = AutoscalerState {
            target: self.policy.base,
            last_scale_up: None,
            available_since: None,
        };

        let mut ticks = common::resource_store::watch_ticks(
            self.store.deployments(),
            kube::api::ListParams::default(),
            self.tick_period,
            cancel.clone(),
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("autoscaler loop cancelled");
                    return;
                }
                tick = ticks.recv() => {
                    if tick.is_none() {
                        tracing::info!("autoscaler watch closed, exiting");
                        return;
                    }
                    if let Err(error) = self.tick(&mut state).await {
                        tracing::warn!(?error, "autoscaler tick failed, retrying after backoff");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                        }
                    }
                }
            }
        }
    }

    async fn tick(&mut self, state: &mut AutoscalerState) -> Result<(), common::error::Error> {
        let claims = self.store.list_pool_claims(&self.pool_name).await?;
        let now = Utc::now();

        let available = claims
            .iter()
            .filter(|c| ClaimLabels::from_map(c.meta().labels.as_ref().unwrap_or(&Default::default())).available())
            .count() as u32;
        let ready = claims
            .iter()
            .filter(|c| ClaimLabels::from_map(c.meta().labels.as_ref().unwrap_or(&Default::default())).ready())
            .count() as u32;

        self.policy.apply(state, now, available, ready);

        let provisioned_count = self.provisioned_deployment_count().await?;
        let existing = claims.len() as u32;
        let to_create = state.target.min(provisioned_count).saturating_sub(existing);

        if to_create > 0 {
            self.create_missing_claims(&claims, to_create).await?;
        }

        Ok(())
    }

    /// Counts `ClusterDeployment`s the orchestrator has finished installing.
    /// Every deployment in the pool's namespace belongs to this pool (one
    /// namespace per gateway instance), so no separate pool label is needed.
    /// `status.installed` is the orchestrator's authoritative signal; `spec.installed`
    /// is only a request and can be true before installation actually completes.
    async fn provisioned_deployment_count(&self) -> Result<u32, common::error::Error> {
        let deployments = self
            .store
            .deployments()
            .list(&kube::api::ListParams::default())
            .await
            .map_err(|source| common::error::Error::Kube {
                resource: "ClusterDeployment".to_string(),
                source,
            })?;
        Ok(deployments
            .items
            .iter()
            .filter(|d| d.status.as_ref().map(|s| s.installed).unwrap_or(false))
            .count() as u32)
    }

    async fn create_missing_claims(
        &self,
        existing: &[common::crd::ClusterClaim],
        to_create: u32,
    ) -> Result<(), common::error::Error> {
        use kube::ResourceExt;
        let existing_names: std::collections::HashSet<String> = existing.iter().map(|c| c.name()).collect();

        let mut created = 0;
        let mut candidate = 1u32;
        while created < to_create {
            let name = format!("{}{}", self.claim_prefix, candidate);
            candidate += 1;
            if existing_names.contains(&name) {
                continue;
            }
            let did_create = self
                .store
                .create_claim_if_absent(&name, &self.pool_name, None)
                .await?;
            if did_create {
                tracing::info!(name, "created new claim");
                created += 1;
            }
            if candidate > existing_names.len() as u32 + to_create + 1 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn policy(base: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy {
            base,
            max,
            increment: 1,
            available_threshold: 1,
            scale_up_cooldown: Duration::from_secs(25 * 60),
            scale_down_hysteresis: Duration::from_secs(10 * 60),
        }
    }

    #[test]
    fn scales_up_after_cooldown_elapses() {
        let policy = policy(4, 10);
        let mut state = AutoscalerState {
            target: 4,
            last_scale_up: Some(Utc::now() - ChronoDuration::minutes(26)),
            available_since: None,
        };
        policy.apply(&mut state, Utc::now(), 1, 4);
        assert_eq!(state.target, 5);
    }

    #[test]
    fn does_not_scale_up_within_cooldown() {
        let policy = policy(4, 10);
        let mut state = AutoscalerState {
            target: 4,
            last_scale_up: Some(Utc::now() - ChronoDuration::minutes(10)),
            available_since: None,
        };
        policy.apply(&mut state, Utc::now(), 1, 4);
        assert_eq!(state.target, 4);
    }

    #[test]
    fn clears_available_since_on_scale_up_recondition() {
        let policy = policy(4, 10);
        let mut state = AutoscalerState {
            target: 4,
            last_scale_up: None,
            available_since: Some(Utc::now() - ChronoDuration::minutes(15)),
        };
        policy.apply(&mut state, Utc::now(), 0, 4);
        assert_eq!(state.target, 5);
        assert!(state.available_since.is_none());
    }

    #[test]
    fn scales_down_after_hysteresis() {
        let policy = policy(4, 10);
        let mut state = AutoscalerState {
            target: 8,
            last_scale_up: Some(Utc::now() - ChronoDuration::hours(1)),
            available_since: Some(Utc::now() - ChronoDuration::minutes(11)),
        };
        policy.apply(&mut state, Utc::now(), 3, 4);
        assert_eq!(state.target, 4);
    }

    #[test]
    fn target_never_exceeds_max() {
        let policy = policy(4, 5);
        let mut state = AutoscalerState {
            target: 5,
            last_scale_up: None,
            available_since: None,
        };
        policy.apply(&mut state, Utc::now(), 0, 4);
        assert_eq!(state.target, 5);
    }
}
