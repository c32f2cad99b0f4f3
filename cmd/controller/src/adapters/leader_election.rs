//! Lease-based leader election. The algorithm (contention, lease stealing, renewal timing) is
//! the same `coordination.k8s.io/v1` Lease dance `kube::runtime`'s own (unexported) elector
//! uses, simplified to a poll loop - the HA election algorithm itself is explicitly out of
//! scope here, only the `LeaderElectionEvent` callback surface this adapter produces matters
//! to the orchestrator.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use htic_core::external::{LeaderElectionEvent, LeaderElectionFeed, LeaderElectorFactory};

pub struct K8sLeaderElectorFactory {
    client: Client,
    namespace: String,
    identity: String,
    lease_duration: StdDuration,
    poll_interval: StdDuration,
}

impl K8sLeaderElectorFactory {
    pub fn new(
        client: Client,
        namespace: String,
        identity: String,
        lease_duration: StdDuration,
        poll_interval: StdDuration,
    ) -> Self {
        Self {
            client,
            namespace,
            identity,
            lease_duration,
            poll_interval,
        }
    }
}

impl LeaderElectorFactory for K8sLeaderElectorFactory {
    fn elect(&self, lease_name: &str) -> Box<dyn LeaderElectionFeed> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_election(
            api,
            lease_name.to_string(),
            self.identity.clone(),
            self.lease_duration,
            self.poll_interval,
            tx,
        ));
        Box::new(Box::pin(ReceiverStream::new(rx)))
    }
}

enum LeaseState {
    Unheld,
    HeldByOther { holder: String, expires_at: DateTime<Utc> },
    HeldBySelf { expires_at: DateTime<Utc> },
}

fn lease_state(spec: &LeaseSpec, identity: &str) -> LeaseState {
    let duration = Duration::seconds(spec.lease_duration_seconds.unwrap_or(0).into());
    let renewed_at = spec.renew_time.as_ref().map(|t| t.0);
    match (&spec.holder_identity, renewed_at) {
        (None, _) | (_, None) => LeaseState::Unheld,
        (Some(holder), Some(renewed_at)) if holder == identity => LeaseState::HeldBySelf {
            expires_at: renewed_at + duration,
        },
        (Some(holder), Some(renewed_at)) => LeaseState::HeldByOther {
            holder: holder.clone(),
            expires_at: renewed_at + duration,
        },
    }
}

async fn try_acquire_or_renew(
    api: &Api<Lease>,
    lease_name: &str,
    identity: &str,
    lease_duration: StdDuration,
) -> Result<Result<(), String>, kube::Error> {
    let now = Utc::now();
    let existing = api.get_opt(lease_name).await?;
    let spec = existing.as_ref().and_then(|l| l.spec.clone()).unwrap_or_default();

    match lease_state(&spec, identity) {
        LeaseState::HeldByOther { holder, expires_at } if expires_at > now => return Ok(Err(holder)),
        _ => {}
    }

    let mut new_spec = spec;
    new_spec.holder_identity = Some(identity.to_string());
    new_spec.renew_time = Some(MicroTime(now));
    new_spec.lease_duration_seconds = Some(lease_duration.as_secs() as i32);
    if new_spec.acquire_time.is_none() {
        new_spec.acquire_time = Some(MicroTime(now));
    }
    new_spec.lease_transitions = Some(new_spec.lease_transitions.unwrap_or(0) + 1);

    let lease = Lease {
        metadata: kube::api::ObjectMeta {
            name: Some(lease_name.to_string()),
            ..Default::default()
        },
        spec: Some(new_spec),
    };
    api.patch(lease_name, &PatchParams::apply("htic-controller").force(), &Patch::Apply(&lease))
        .await?;
    Ok(Ok(()))
}

async fn run_election(
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration: StdDuration,
    poll_interval: StdDuration,
    tx: mpsc::Sender<LeaderElectionEvent>,
) {
    let mut holding = false;
    loop {
        match try_acquire_or_renew(&api, &lease_name, &identity, lease_duration).await {
            Ok(Ok(())) => {
                if !holding {
                    holding = true;
                    if tx.send(LeaderElectionEvent::StartedLeading).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Err(holder)) => {
                if holding {
                    holding = false;
                    if tx.send(LeaderElectionEvent::StoppedLeading).await.is_err() {
                        return;
                    }
                }
                if tx.send(LeaderElectionEvent::NewLeader(holder)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, lease = %lease_name, "lease acquire/renew attempt failed");
                if holding {
                    holding = false;
                    if tx.send(LeaderElectionEvent::StoppedLeading).await.is_err() {
                        return;
                    }
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}
