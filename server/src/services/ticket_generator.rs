//! Ticket generator
//!
//! Offloads QR rendering and ticket persistence from the confirmation
//! path. Three job kinds share one queue: `generate_tickets`, `send_email`,
//! `send_sms`. Workers are a small fixed pool; each kind retries with
//! exponential backoff; job status is queryable while retention lasts.
//!
//! Writes are idempotent (`ON CONFLICT (ticket_id) DO UPDATE`), so the
//! at-least-once queue semantics are safe.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use qrcode::{EcLevel, QrCode};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus};
use crate::config::{DeliveryConfig, TicketConfig};
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::ticket::{self, ticket_id_for, NewTicket, Ticket};
use crate::schema::{event_seat_types, users};
use diesel::prelude::*;

/// Per-seat input to a generation job.
#[derive(Debug, Clone)]
pub struct TicketSeed {
    pub seat_id: i64,
    pub seat_label: String,
    pub seat_type_id: i64,
    pub price_paid: Decimal,
}

/// Outbound delivery channel. Real providers (email gateway, SMS gateway)
/// implement this; the default logs the send, which is what runs when no
/// provider credentials are configured.
#[async_trait::async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send_email(&self, booking_id: i64, email: &str) -> Result<(), anyhow::Error>;
    async fn send_sms(&self, booking_id: i64, phone: &str) -> Result<(), anyhow::Error>;
}

/// Log-only delivery, for development and credential-less deployments.
pub struct LogDelivery;

#[async_trait::async_trait]
impl DeliveryProvider for LogDelivery {
    async fn send_email(&self, booking_id: i64, email: &str) -> Result<(), anyhow::Error> {
        tracing::info!(booking_id, email = %email, "sending ticket email");
        Ok(())
    }

    async fn send_sms(&self, booking_id: i64, phone: &str) -> Result<(), anyhow::Error> {
        tracing::info!(booking_id, phone = %phone, "sending ticket SMS");
        Ok(())
    }
}

/// Maximum rendered QR dimension in pixels.
const QR_MAX_PX: u32 = 300;

/// Attempts per job kind.
const MAX_ATTEMPTS: u32 = 3;

/// Delay before delivery sub-jobs run, giving the generation transaction
/// time to be visible everywhere.
const CHAIN_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
enum Job {
    Generate {
        job_id: String,
        booking_id: i64,
        booking_ref: String,
        seeds: Vec<TicketSeed>,
        attempt: u32,
    },
    SendEmail {
        job_id: String,
        booking_id: i64,
        email: String,
        attempt: u32,
    },
    SendSms {
        job_id: String,
        booking_id: i64,
        phone: String,
        attempt: u32,
    },
}

impl Job {
    fn job_id(&self) -> &str {
        match self {
            Job::Generate { job_id, .. }
            | Job::SendEmail { job_id, .. }
            | Job::SendSms { job_id, .. } => job_id,
        }
    }

    fn attempt(&self) -> u32 {
        match self {
            Job::Generate { attempt, .. }
            | Job::SendEmail { attempt, .. }
            | Job::SendSms { attempt, .. } => *attempt,
        }
    }

    fn with_next_attempt(mut self) -> Self {
        match &mut self {
            Job::Generate { attempt, .. }
            | Job::SendEmail { attempt, .. }
            | Job::SendSms { attempt, .. } => *attempt += 1,
        }
        self
    }

    /// Exponential backoff, base depending on kind.
    fn backoff(&self) -> Duration {
        let base = match self {
            Job::Generate { .. } => 5,
            Job::SendEmail { .. } => 10,
            Job::SendSms { .. } => 15,
        };
        Duration::from_secs(base << (self.attempt() - 1).min(4))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded job-status registry: completed entries are retained up to a cap,
/// failed entries longer for forensics.
struct Registry {
    jobs: HashMap<String, JobStatus>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    completed_cap: usize,
    failed_cap: usize,
}

impl Registry {
    fn new(completed_cap: usize, failed_cap: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            completed_cap,
            failed_cap,
        }
    }

    fn set(&mut self, job_id: &str, status: JobStatus) {
        match status.state {
            JobState::Completed => {
                self.completed.push_back(job_id.to_string());
                if self.completed.len() > self.completed_cap {
                    if let Some(evicted) = self.completed.pop_front() {
                        self.jobs.remove(&evicted);
                    }
                }
            }
            JobState::Failed => {
                self.failed.push_back(job_id.to_string());
                if self.failed.len() > self.failed_cap {
                    if let Some(evicted) = self.failed.pop_front() {
                        self.jobs.remove(&evicted);
                    }
                }
            }
            _ => {}
        }
        self.jobs.insert(job_id.to_string(), status);
    }

    fn progress(&mut self, job_id: &str, percent: u8) {
        if let Some(status) = self.jobs.get_mut(job_id) {
            status.progress_percent = percent;
        }
    }
}

pub struct TicketGenerator {
    db: DbPool,
    bus: Arc<dyn EventBus>,
    delivery: DeliveryConfig,
    provider: Arc<dyn DeliveryProvider>,
    tx: mpsc::UnboundedSender<Job>,
    rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Job>>>,
    registry: Arc<RwLock<Registry>>,
    shutting_down: Arc<AtomicBool>,
    worker_concurrency: usize,
}

impl TicketGenerator {
    pub fn new(
        db: DbPool,
        bus: Arc<dyn EventBus>,
        config: TicketConfig,
        delivery: DeliveryConfig,
    ) -> Arc<Self> {
        Self::with_provider(db, bus, config, delivery, Arc::new(LogDelivery))
    }

    pub fn with_provider(
        db: DbPool,
        bus: Arc<dyn EventBus>,
        config: TicketConfig,
        delivery: DeliveryConfig,
        provider: Arc<dyn DeliveryProvider>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            db,
            bus,
            delivery,
            provider,
            tx,
            rx: AsyncMutex::new(Some(rx)),
            registry: Arc::new(RwLock::new(Registry::new(
                config.completed_retention,
                config.failed_retention,
            ))),
            shutting_down: Arc::new(AtomicBool::new(false)),
            worker_concurrency: config.worker_concurrency,
        })
    }

    /// Spawn the worker pool. Call once from the composition root.
    pub async fn start_workers(self: &Arc<Self>) {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("start_workers called twice");
        let rx = Arc::new(AsyncMutex::new(rx));

        for worker in 0..self.worker_concurrency {
            let rx = rx.clone();
            let this = self.clone();
            tokio::spawn(async move {
                loop {
                    if this.shutting_down.load(Ordering::Relaxed) {
                        break;
                    }
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else { break };
                    this.process(job).await;
                }
                tracing::debug!(worker, "ticket worker stopped");
            });
        }
        tracing::info!(
            workers = self.worker_concurrency,
            "ticket generation workers started"
        );
    }

    /// Stop claiming new jobs. In-flight jobs run to completion.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Queue a generation job for a confirmed booking. Fails only when the
    /// queue is unavailable; the coordinator then falls back to inline
    /// generation.
    pub async fn enqueue_generation(
        &self,
        booking_id: i64,
        booking_ref: String,
        seeds: Vec<TicketSeed>,
    ) -> Result<String, anyhow::Error> {
        let job_id = format!("tickets-{}", Uuid::new_v4());
        let job = Job::Generate {
            job_id: job_id.clone(),
            booking_id,
            booking_ref,
            seeds,
            attempt: 1,
        };
        self.mark(&job_id, JobState::Waiting, 0, None, None);
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("ticket queue is closed"))?;
        Ok(job_id)
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.registry
            .read()
            .ok()
            .and_then(|r| r.jobs.get(job_id).cloned())
    }

    /// Synchronous fallback used when the queue cannot accept the job: the
    /// confirmation response carries the tickets directly.
    pub async fn generate_inline(
        &self,
        booking_id: i64,
        booking_ref: &str,
        seeds: &[TicketSeed],
    ) -> Result<Vec<Ticket>, ApiError> {
        let tickets = persist_tickets(
            &self.db,
            booking_id,
            booking_ref.to_string(),
            seeds.to_vec(),
            None,
        )
        .await?;

        self.bus.publish(
            None,
            BusEvent::TicketsReady {
                booking_id,
                ticket_count: tickets.len(),
            },
        );
        Ok(tickets)
    }

    async fn process(&self, job: Job) {
        let job_id = job.job_id().to_string();
        self.mark(&job_id, JobState::Active, 0, None, None);

        let outcome = match &job {
            Job::Generate {
                booking_id,
                booking_ref,
                seeds,
                ..
            } => self.run_generate(&job_id, *booking_id, booking_ref, seeds).await,
            Job::SendEmail {
                booking_id, email, ..
            } => self.run_send_email(*booking_id, email).await,
            Job::SendSms {
                booking_id, phone, ..
            } => self.run_send_sms(*booking_id, phone).await,
        };

        match outcome {
            Ok(result) => {
                self.mark(&job_id, JobState::Completed, 100, Some(result), None);
            }
            Err(e) => {
                let message = format!("{:#}", e);
                if job.attempt() < MAX_ATTEMPTS {
                    let retry = job.clone().with_next_attempt();
                    let delay = retry.backoff();
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = job.attempt(),
                        error = %message,
                        delay_secs = delay.as_secs(),
                        "ticket job failed, scheduling retry"
                    );
                    self.mark(&job_id, JobState::Delayed, 0, None, Some(message));
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(retry);
                    });
                } else {
                    tracing::error!(job_id = %job_id, error = %message, "ticket job failed permanently");
                    if let Job::Generate { booking_id, .. } = &job {
                        let booking_id = *booking_id;
                        let _ = db::run(&self.db, move |conn| {
                            Ticket::mark_failed(conn, booking_id)?;
                            Ok(())
                        })
                        .await;
                    }
                    self.mark(&job_id, JobState::Failed, 0, None, Some(message));
                }
            }
        }
    }

    async fn run_generate(
        &self,
        job_id: &str,
        booking_id: i64,
        booking_ref: &str,
        seeds: &[TicketSeed],
    ) -> Result<serde_json::Value, anyhow::Error> {
        let tickets = persist_tickets(
            &self.db,
            booking_id,
            booking_ref.to_string(),
            seeds.to_vec(),
            Some((self.registry.clone(), job_id.to_string())),
        )
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

        self.bus.publish(
            None,
            BusEvent::TicketsReady {
                booking_id,
                ticket_count: tickets.len(),
            },
        );

        // Chain delivery sub-jobs after a small delay so the commit above
        // is visible to them.
        let contact = self.load_contact(booking_id).await;
        if let Some((email, phone)) = contact {
            if self.delivery.email_enabled() {
                if let Some(email) = email {
                    self.chain_after_delay(Job::SendEmail {
                        job_id: format!("email-{}", Uuid::new_v4()),
                        booking_id,
                        email,
                        attempt: 1,
                    });
                }
            }
            if self.delivery.sms_enabled() {
                if let Some(phone) = phone {
                    self.chain_after_delay(Job::SendSms {
                        job_id: format!("sms-{}", Uuid::new_v4()),
                        booking_id,
                        phone,
                        attempt: 1,
                    });
                }
            }
        }

        Ok(serde_json::json!({
            "booking_id": booking_id,
            "ticket_count": tickets.len(),
        }))
    }

    async fn run_send_email(
        &self,
        booking_id: i64,
        email: &str,
    ) -> Result<serde_json::Value, anyhow::Error> {
        self.provider.send_email(booking_id, email).await?;
        let now = Utc::now().naive_utc();
        db::run(&self.db, move |conn| {
            Ticket::mark_email_sent(conn, booking_id, now)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(serde_json::json!({ "booking_id": booking_id, "channel": "email" }))
    }

    async fn run_send_sms(
        &self,
        booking_id: i64,
        phone: &str,
    ) -> Result<serde_json::Value, anyhow::Error> {
        self.provider.send_sms(booking_id, phone).await?;
        let now = Utc::now().naive_utc();
        db::run(&self.db, move |conn| {
            Ticket::mark_sms_sent(conn, booking_id, now)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(serde_json::json!({ "booking_id": booking_id, "channel": "sms" }))
    }

    fn chain_after_delay(&self, job: Job) {
        self.mark(job.job_id(), JobState::Delayed, 0, None, None);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CHAIN_DELAY).await;
            let _ = tx.send(job);
        });
    }

    async fn load_contact(&self, booking_id: i64) -> Option<(Option<String>, Option<String>)> {
        let result = db::run(&self.db, move |conn| {
            let contact: Option<(Option<String>, Option<String>)> = crate::schema::bookings::table
                .inner_join(users::table.on(users::id.eq(crate::schema::bookings::user_id)))
                .filter(crate::schema::bookings::id.eq(booking_id))
                .select((users::email, users::phone))
                .first(conn)
                .optional()?;
            Ok(contact)
        })
        .await;
        result.ok().flatten()
    }

    fn mark(
        &self,
        job_id: &str,
        state: JobState,
        progress: u8,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        if let Ok(mut registry) = self.registry.write() {
            registry.set(
                job_id,
                JobStatus {
                    state,
                    progress_percent: progress,
                    result,
                    error,
                },
            );
        }
    }
}

/// Write the full ticket set for a booking in one transaction, seat by
/// seat, updating job progress as each row lands.
async fn persist_tickets(
    db: &DbPool,
    booking_id: i64,
    booking_ref: String,
    seeds: Vec<TicketSeed>,
    progress: Option<(Arc<RwLock<Registry>>, String)>,
) -> Result<Vec<Ticket>, ApiError> {
    db::transaction(db, move |conn| {
        let now = Utc::now().naive_utc();
        let total = seeds.len().max(1);
        let mut written = Vec::with_capacity(seeds.len());

        for (index, seed) in seeds.iter().enumerate() {
            let seat_type_name: String = event_seat_types::table
                .filter(event_seat_types::id.eq(seed.seat_type_id))
                .select(event_seat_types::name)
                .first(conn)?;

            let ticket_id = ticket_id_for(&booking_ref, &seed.seat_label);
            let qr = render_qr_data_uri(&ticket_id, &booking_ref, &seed.seat_label)
                .map_err(|e| ApiError::Internal(format!("QR render: {:#}", e)))?;

            let row = Ticket::upsert(
                conn,
                NewTicket {
                    booking_id,
                    seat_id: seed.seat_id,
                    ticket_id,
                    seat_label: seed.seat_label.clone(),
                    seat_type_name,
                    price_paid: seed.price_paid,
                    qr_payload: Some(qr),
                    status: ticket::STATUS_GENERATED.to_string(),
                    generated_at: Some(now),
                },
            )?;
            written.push(row);

            if let Some((registry, job_id)) = &progress {
                let percent = (((index + 1) * 100) / total) as u8;
                if let Ok(mut registry) = registry.write() {
                    registry.progress(job_id, percent);
                }
            }
        }

        Ok(written)
    })
    .await
}

/// Render the QR for one ticket as a base64 PNG data URI. High error
/// correction, bounded to 300 px.
fn render_qr_data_uri(
    ticket_id: &str,
    booking_ref: &str,
    seat_label: &str,
) -> Result<String, anyhow::Error> {
    let payload = serde_json::json!({
        "ticket_id": ticket_id,
        "booking_reference": booking_ref,
        "seat_label": seat_label,
    })
    .to_string();

    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)?;
    let image = code
        .render::<image::Luma<u8>>()
        .max_dimensions(QR_MAX_PX, QR_MAX_PX)
        .build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(image).write_to(
        &mut std::io::Cursor::new(&mut png),
        image::ImageOutputFormat::Png,
    )?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_per_kind() {
        let generate = Job::Generate {
            job_id: "j".into(),
            booking_id: 1,
            booking_ref: "BKG".into(),
            seeds: vec![],
            attempt: 1,
        };
        assert_eq!(generate.backoff(), Duration::from_secs(5));
        assert_eq!(
            generate.clone().with_next_attempt().backoff(),
            Duration::from_secs(10)
        );

        let email = Job::SendEmail {
            job_id: "j".into(),
            booking_id: 1,
            email: "a@b.c".into(),
            attempt: 1,
        };
        assert_eq!(email.backoff(), Duration::from_secs(10));

        let sms = Job::SendSms {
            job_id: "j".into(),
            booking_id: 1,
            phone: "+100".into(),
            attempt: 1,
        };
        assert_eq!(sms.backoff(), Duration::from_secs(15));
    }

    #[test]
    fn qr_renders_as_png_data_uri() {
        let uri =
            render_qr_data_uri("TKT-BKG-2025-0614-093005-00FF-V1", "BKG-2025-0614-093005-00FF", "V1")
                .unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let bytes = BASE64.decode(&uri["data:image/png;base64,".len()..]).unwrap();
        // PNG magic
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn registry_evicts_old_completed_jobs() {
        let mut registry = Registry::new(2, 2);
        for i in 0..3 {
            registry.set(
                &format!("job-{}", i),
                JobStatus {
                    state: JobState::Completed,
                    progress_percent: 100,
                    result: None,
                    error: None,
                },
            );
        }
        assert!(registry.jobs.get("job-0").is_none());
        assert!(registry.jobs.get("job-1").is_some());
        assert!(registry.jobs.get("job-2").is_some());
    }
}
