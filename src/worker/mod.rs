use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::campaigns::contacts::{CsvError, parse_contacts};
use crate::campaigns::resolver::resolve_variables;
use crate::campaigns::sanitizer::{parse_string_map, sanitize};
use crate::config::WorkerConfig;
use crate::db::enums::CampaignStatus;
use crate::db::models::{Campaign, CampaignJob, JobPayload};
use crate::db::services::{CampaignServiceError, CampaignStore};
use crate::gateway::{GatewayError, MessageGateway, OutboundMessage};
use crate::queue::{JobQueue, QueueError, RetryDecision};
use crate::server::broadcaster::{CampaignEvent, ProgressBroadcaster};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] CampaignServiceError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("embedded CSV is unreadable: {0}")]
    Csv(#[from] CsvError),
}

/// How one campaign run ended, short of an error.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Campaign),
    /// Operator paused the campaign; the job is parked, not retried.
    Paused,
}

/// Sends every pending contact of one campaign, sequentially and in CSV row
/// order. Resumes after a partial prior attempt by skipping the contacts
/// that already have a message log; the pause flag is checked between
/// contacts; a single send failure is recorded and never aborts the run.
pub async fn run_campaign<S, G>(
    store: &S,
    gateway: &G,
    broadcaster: &ProgressBroadcaster,
    payload: &JobPayload,
    send_timeout: Duration,
) -> Result<RunOutcome, WorkerError>
where
    S: CampaignStore + ?Sized,
    G: MessageGateway + ?Sized,
{
    let campaign = store.mark_processing(payload.campaign_id).await?;
    broadcaster.emit(
        campaign.id,
        CampaignEvent::status(&campaign, "Procesando campaña"),
    );

    let contacts = parse_contacts(&payload.csv_data)?;
    let mappings = parse_string_map(&sanitize(Some(&payload.variable_mappings)));
    let defaults = parse_string_map(&sanitize(Some(&payload.default_values)));

    // Resume watermark: one message log exists per contact already handled.
    let already_logged = store.logged_contact_count(campaign.id).await? as usize;
    if already_logged > 0 {
        info!(
            campaign_id = %campaign.id,
            skipped = already_logged,
            "resuming campaign past already-logged contacts"
        );
    }

    let total = campaign.total_contacts;
    let mut sent = campaign.sent_count;
    let mut errors = campaign.error_count;

    for contact in contacts.iter().skip(already_logged) {
        if store.current_status(campaign.id).await? == CampaignStatus::Paused {
            let paused = store.fetch(campaign.id).await?;
            broadcaster.emit(campaign.id, CampaignEvent::status(&paused, "Campaña pausada"));
            info!(campaign_id = %campaign.id, sent, errors, "campaign paused by operator");
            return Ok(RunOutcome::Paused);
        }

        let variables = resolve_variables(
            &payload.template.variables,
            &contact.fields,
            &mappings,
            &defaults,
        );
        let message = OutboundMessage {
            to: contact.phone.clone(),
            content_sid: payload.template.content_sid.clone(),
            variables,
        };

        let send_result = match tokio::time::timeout(send_timeout, gateway.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        };

        match send_result {
            Ok(receipt) => {
                store
                    .record_sent(campaign.id, &contact.phone, &receipt.sid)
                    .await?;
                sent += 1;
            }
            Err(err) => {
                warn!(campaign_id = %campaign.id, phone = %contact.phone, error = %err, "send failed");
                store
                    .record_failed(campaign.id, &contact.phone, &err.to_string())
                    .await?;
                errors += 1;
            }
        }

        broadcaster.emit(
            campaign.id,
            CampaignEvent::progress(campaign.id, sent, total, errors),
        );
    }

    let final_status = if errors == 0 {
        CampaignStatus::Completed
    } else {
        CampaignStatus::CompletedWithErrors
    };
    let finalized = store.finalize(campaign.id, final_status).await?;
    broadcaster.emit(
        finalized.id,
        CampaignEvent::status(&finalized, "Campaña completada"),
    );
    Ok(RunOutcome::Completed(finalized))
}

/// How a claimed job leaves the consumer: settled in the queue, or parked
/// awaiting an operator resume.
enum JobDisposition {
    Done,
    Parked,
}

/// Background consumer of the campaign job queue. Each consumer loop claims
/// one job at a time, so campaigns run concurrently across consumers while
/// contacts within a campaign stay strictly sequential.
pub struct CampaignWorker<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    queue: JobQueue,
    broadcaster: Arc<ProgressBroadcaster>,
    config: WorkerConfig,
}

impl<S, G> CampaignWorker<S, G>
where
    S: CampaignStore + 'static,
    G: MessageGateway + 'static,
{
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        queue: JobQueue,
        broadcaster: Arc<ProgressBroadcaster>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            broadcaster,
            config,
        }
    }

    /// Spawns the consumer loops plus a queue-pruning housekeeper. All loops
    /// stop when `shutdown` flips.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for n in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            let mut shutdown = shutdown.clone();
            let consumer = format!("consumer-{n}-{}", Uuid::new_v4());
            handles.push(tokio::spawn(async move {
                info!(consumer = %consumer, "campaign consumer started");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(worker.config.poll_interval) => {
                            if let Err(e) = worker.drain(&consumer).await {
                                error!(consumer = %consumer, error = %e, "consumer tick failed");
                            }
                        }
                    }
                }
                info!(consumer = %consumer, "campaign consumer stopped");
            }));
        }

        let worker = self.clone();
        let mut shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                        match worker.queue.prune_finished(worker.config.job_retention).await {
                            Ok(pruned) if pruned > 0 => {
                                info!(pruned, "pruned finished campaign jobs");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "job pruning failed"),
                        }
                    }
                }
            }
        }));

        handles
    }

    /// Processes queued jobs until the queue runs dry.
    async fn drain(&self, consumer: &str) -> Result<(), WorkerError> {
        while let Some(job) = self.queue.lock_next(consumer).await? {
            self.process_job(job).await?;
        }
        Ok(())
    }

    async fn process_job(&self, job: CampaignJob) -> Result<(), WorkerError> {
        let campaign_id = job.payload.0.campaign_id;
        info!(
            job_id = %job.id,
            %campaign_id,
            attempt = job.attempts,
            user = %job.payload.0.user_name,
            "processing campaign job"
        );

        // Every execution error takes the fail path, so a claimed job can
        // never be left behind in `running`.
        match self.try_job(&job).await {
            Ok(JobDisposition::Done) => self.queue.complete(job.id).await?,
            Ok(JobDisposition::Parked) => self.queue.hold(job.id).await?,
            Err(err) => {
                let reason = err.to_string();
                match self.queue.fail(job.id, &reason).await? {
                    RetryDecision::Retrying { attempt } => {
                        warn!(job_id = %job.id, attempt, error = %reason, "campaign job will retry");
                    }
                    RetryDecision::Dead => {
                        self.store.mark_failed(campaign_id, &reason).await?;
                        self.broadcaster.emit(
                            campaign_id,
                            CampaignEvent::error(campaign_id, reason, "job_execution"),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn try_job(&self, job: &CampaignJob) -> Result<JobDisposition, WorkerError> {
        let payload = &job.payload.0;

        let campaign = match self.store.fetch(payload.campaign_id).await {
            Ok(campaign) => campaign,
            Err(CampaignServiceError::NotFound(_)) => {
                warn!(job_id = %job.id, "job references a missing campaign, discarding");
                return Ok(JobDisposition::Done);
            }
            Err(e) => return Err(e.into()),
        };

        let status = campaign.status_enum();
        if status.is_terminal() {
            return Ok(JobDisposition::Done);
        }
        if status == CampaignStatus::Paused {
            return Ok(JobDisposition::Parked);
        }

        match run_campaign(
            self.store.as_ref(),
            self.gateway.as_ref(),
            &self.broadcaster,
            payload,
            self.config.send_timeout,
        )
        .await?
        {
            RunOutcome::Completed(_) => Ok(JobDisposition::Done),
            RunOutcome::Paused => Ok(JobDisposition::Parked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use chrono::Utc;

    use crate::db::models::TemplateSnapshot;
    use crate::db::services::campaign_service::MockCampaignStore;
    use crate::gateway::{GatewayReceipt, MockMessageGateway};

    const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    fn campaign_fixture(id: Uuid, status: &str, total: i32, sent: i32, errors: i32) -> Campaign {
        Campaign {
            id,
            name: "Recordatorios".to_string(),
            user_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            status: status.to_string(),
            total_contacts: total,
            sent_count: sent,
            error_count: errors,
            failure_reason: None,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    fn payload_fixture(campaign_id: Uuid, csv: &str, variables: &[&str], defaults: &str) -> JobPayload {
        JobPayload {
            campaign_id,
            campaign_name: "Recordatorios".to_string(),
            user_id: Uuid::new_v4(),
            user_name: "Ana Admin".to_string(),
            csv_data: csv.to_string(),
            template: TemplateSnapshot {
                id: Uuid::new_v4(),
                name: "recordatorio_cita".to_string(),
                content_sid: "HX0000000000000000000000000000000".to_string(),
                variables: variables.iter().map(|s| s.to_string()).collect(),
            },
            variable_mappings: "{}".to_string(),
            default_values: defaults.to_string(),
        }
    }

    fn counting_store(
        campaign_id: Uuid,
        total: i32,
        already_logged: i64,
    ) -> (MockCampaignStore, Arc<AtomicI32>, Arc<AtomicI32>) {
        let sent = Arc::new(AtomicI32::new(0));
        let errors = Arc::new(AtomicI32::new(0));

        let mut store = MockCampaignStore::new();
        store
            .expect_mark_processing()
            .returning(move |id| Ok(campaign_fixture(id, "processing", total, 0, 0)));
        store
            .expect_logged_contact_count()
            .returning(move |_| Ok(already_logged));
        store
            .expect_current_status()
            .returning(|_| Ok(CampaignStatus::Processing));
        store.expect_record_sent().returning({
            let sent = sent.clone();
            move |_, _, _| {
                sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        store.expect_record_failed().returning({
            let errors = errors.clone();
            move |_, _, _| {
                errors.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        store.expect_finalize().returning({
            let sent = sent.clone();
            let errors = errors.clone();
            move |id, status| {
                assert_eq!(id, campaign_id);
                Ok(campaign_fixture(
                    id,
                    status.as_str(),
                    total,
                    sent.load(Ordering::SeqCst),
                    errors.load(Ordering::SeqCst),
                ))
            }
        });
        (store, sent, errors)
    }

    #[tokio::test]
    async fn counters_account_for_every_contact() {
        let campaign_id = Uuid::new_v4();
        let csv = "telefono,nombre\n\
                   +573000000000,Ana\n\
                   +573000000001,Luis\n\
                   +573000000002,Marta\n\
                   +573000000003,Pedro\n\
                   +573000000004,Lucia\n";
        let payload = payload_fixture(campaign_id, csv, &["nombre"], "{}");
        let (store, sent, errors) = counting_store(campaign_id, 5, 0);

        // Two injected gateway failures; the loop must keep going.
        let mut gateway = MockMessageGateway::new();
        gateway.expect_send().returning(|msg| {
            if msg.to.ends_with('1') || msg.to.ends_with('3') {
                Err(GatewayError::Rejected("numero invalido".to_string()))
            } else {
                Ok(GatewayReceipt {
                    sid: format!("SM-{}", msg.to),
                    status: "queued".to_string(),
                })
            }
        });

        let broadcaster = ProgressBroadcaster::new();
        let outcome = run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 3);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        match outcome {
            RunOutcome::Completed(campaign) => {
                assert_eq!(campaign.status, "completed_with_errors");
                assert_eq!(campaign.sent_count + campaign.error_count, 5);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolves_variables_for_each_contact() {
        // CSV header nombre,telefono,Hora; template ["empresa","nombre"];
        // defaults {empresa: ACME} -> {"1":"ACME","2":"Ana"}.
        let campaign_id = Uuid::new_v4();
        let csv = "nombre,telefono,Hora\nAna,+573000000000,10:00 AM\n";
        let payload = payload_fixture(
            campaign_id,
            csv,
            &["empresa", "nombre"],
            r#"{"empresa":"ACME"}"#,
        );
        let (store, sent, errors) = counting_store(campaign_id, 1, 0);

        let mut gateway = MockMessageGateway::new();
        gateway
            .expect_send()
            .withf(|msg| {
                msg.to == "+573000000000"
                    && msg.variables.get("1").map(String::as_str) == Some("ACME")
                    && msg.variables.get("2").map(String::as_str) == Some("Ana")
                    && msg.variables.len() == 2
            })
            .times(1)
            .returning(|_| {
                Ok(GatewayReceipt {
                    sid: "SM1".to_string(),
                    status: "queued".to_string(),
                })
            });

        let broadcaster = ProgressBroadcaster::new();
        let outcome = run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        match outcome {
            RunOutcome::Completed(campaign) => assert_eq!(campaign.status, "completed"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_events_are_monotonic_and_reach_completion() {
        let campaign_id = Uuid::new_v4();
        let csv = "telefono\n+573000000000\n+573000000001\n+573000000002\n+573000000003\n";
        let payload = payload_fixture(campaign_id, csv, &[], "{}");
        let (store, _, _) = counting_store(campaign_id, 4, 0);

        let mut gateway = MockMessageGateway::new();
        gateway.expect_send().returning(|msg| {
            if msg.to.ends_with('2') {
                Err(GatewayError::Timeout)
            } else {
                Ok(GatewayReceipt {
                    sid: format!("SM-{}", msg.to),
                    status: "queued".to_string(),
                })
            }
        });

        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe(campaign_id);

        run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap();

        let mut last_sent = -1;
        let mut last_errors = -1;
        let mut last_progress = -1;
        let mut saw_completion = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                CampaignEvent::Progress {
                    sent,
                    errors,
                    progress,
                    total,
                    ..
                } => {
                    assert!(sent >= last_sent, "sent regressed");
                    assert!(errors >= last_errors, "errors regressed");
                    assert!(progress >= last_progress, "progress regressed");
                    assert_eq!(total, 4);
                    last_sent = sent;
                    last_errors = errors;
                    last_progress = progress;
                }
                CampaignEvent::Status { status, .. } => {
                    if status == "completed_with_errors" {
                        saw_completion = true;
                    }
                }
                _ => {}
            }
        }
        assert_eq!(last_progress, 100);
        assert_eq!(last_sent, 3);
        assert_eq!(last_errors, 1);
        assert!(saw_completion);
    }

    #[tokio::test]
    async fn resumes_past_contacts_with_existing_logs() {
        let campaign_id = Uuid::new_v4();
        let csv = "telefono\n+573000000000\n+573000000001\n+573000000002\n+573000000003\n";
        let payload = payload_fixture(campaign_id, csv, &[], "{}");
        let (store, sent, _) = counting_store(campaign_id, 4, 2);

        let mut gateway = MockMessageGateway::new();
        gateway
            .expect_send()
            .withf(|msg| msg.to.ends_with('2') || msg.to.ends_with('3'))
            .times(2)
            .returning(|msg| {
                Ok(GatewayReceipt {
                    sid: format!("SM-{}", msg.to),
                    status: "queued".to_string(),
                })
            });

        let broadcaster = ProgressBroadcaster::new();
        run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap();

        // Only the two unlogged contacts were sent on this attempt.
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pause_stops_between_contacts_without_finalizing() {
        let campaign_id = Uuid::new_v4();
        let csv = "telefono\n+573000000000\n+573000000001\n+573000000002\n";
        let payload = payload_fixture(campaign_id, csv, &[], "{}");

        let mut store = MockCampaignStore::new();
        store
            .expect_mark_processing()
            .returning(move |id| Ok(campaign_fixture(id, "processing", 3, 0, 0)));
        store.expect_logged_contact_count().returning(|_| Ok(0));

        // Processing for the first boundary, paused at the second.
        let polls = Arc::new(AtomicUsize::new(0));
        store.expect_current_status().returning({
            let polls = polls.clone();
            move |_| {
                if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(CampaignStatus::Processing)
                } else {
                    Ok(CampaignStatus::Paused)
                }
            }
        });
        store.expect_record_sent().returning(|_, _, _| Ok(()));
        store
            .expect_fetch()
            .returning(move |id| Ok(campaign_fixture(id, "paused", 3, 1, 0)));
        // No finalize expectation: finalizing a paused run must panic the mock.

        let mut gateway = MockMessageGateway::new();
        gateway.expect_send().times(1).returning(|_| {
            Ok(GatewayReceipt {
                sid: "SM1".to_string(),
                status: "queued".to_string(),
            })
        });

        let broadcaster = ProgressBroadcaster::new();
        let outcome = run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Paused));
    }

    #[tokio::test]
    async fn unreadable_csv_is_a_job_error() {
        let campaign_id = Uuid::new_v4();
        let payload = payload_fixture(campaign_id, "nombre,apellido\nAna,Gomez\n", &[], "{}");

        let mut store = MockCampaignStore::new();
        store
            .expect_mark_processing()
            .returning(move |id| Ok(campaign_fixture(id, "processing", 1, 0, 0)));

        let gateway = MockMessageGateway::new();
        let broadcaster = ProgressBroadcaster::new();
        let err = run_campaign(&store, &gateway, &broadcaster, &payload, SEND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Csv(_)));
    }
}
