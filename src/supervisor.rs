// src/supervisor.rs

use std::fmt;
use std::time::Duration;

use tracing::{Instrument, Span};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::sys::bootstrap::{fetch_wrapped_token, unwrap_token, Session};
use crate::sys::broker::HttpBroker;
use crate::sys::catalog::Catalog;
use crate::sys::process::{Workload, WorkloadOutcome};
use crate::sys::retrieval::{materialize, retrieve_all};
use crate::sys::traits::{SecretBackend, TokenBroker};
use crate::sys::vault::HttpVaultClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    Retrieving,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Retrieving => "retrieving",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What a completed run looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: WorkloadOutcome,
    pub renewal_ticks: u32,
}

/// Result of one renewal pass. Failures are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub session_renewed: bool,
    pub leases_renewed: usize,
    pub leases_failed: usize,
}

/// Drives one agent run: bootstrap, retrieval, workload supervision with lease renewal,
/// and the final revocation of the agent's own token.
pub struct Supervisor {
    config: AgentConfig,
    backend: Box<dyn SecretBackend>,
    broker: Box<dyn TokenBroker>,
    catalog: Catalog,
    phase: Phase,
    span: Span,
}

impl Supervisor {
    /// Wires the HTTP broker and backend clients from configuration.
    pub fn new(config: AgentConfig, catalog: Catalog) -> Result<Self> {
        let backend = HttpVaultClient::new(&config.vault_addr, config.request_timeout)
            .map_err(|e| AgentError::config(format!("cannot build backend client: {}", e)))?;
        let broker = HttpBroker::new(&config.broker_addr, config.request_timeout)
            .map_err(|e| AgentError::config(format!("cannot build broker client: {}", e)))?;
        Ok(Self::with_clients(config, catalog, Box::new(backend), Box::new(broker)))
    }

    pub fn with_clients(
        config: AgentConfig,
        catalog: Catalog,
        backend: Box<dyn SecretBackend>,
        broker: Box<dyn TokenBroker>,
    ) -> Self {
        let span = tracing::info_span!(
            "vaultkeeper",
            task_id = %config.task_id,
            app = config.app_name.as_deref().unwrap_or("-"),
        );
        Self { config, backend, broker, catalog, phase: Phase::Bootstrapping, span }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs to completion. Every path that acquired a session revokes it exactly once
    /// before returning.
    pub async fn run(&mut self) -> Result<RunReport> {
        let span = self.span.clone();
        self.run_phases().instrument(span).await
    }

    async fn run_phases(&mut self) -> Result<RunReport> {
        tracing::info!(phase = %self.phase, "Supervisor starting");
        let mut session = match self.bootstrap().await {
            Ok(session) => session,
            Err(e) => {
                // A self-check failure has already drained the session.
                if self.phase != Phase::Terminated {
                    self.enter(Phase::Terminated);
                }
                return Err(e);
            }
        };

        self.enter(Phase::Retrieving);
        let workload = match self.prepare_workload(&session).await {
            Ok(workload) => workload,
            Err(e) => {
                tracing::error!(error = %e, "Credential retrieval failed; workload will not start");
                self.drain(&session).await;
                return Err(e);
            }
        };

        self.enter(Phase::Running);
        let supervised = self.supervise(workload, &mut session).await;

        self.drain(&session).await;
        let report = supervised?;
        tracing::info!(
            outcome = %report.outcome.describe(),
            renewal_ticks = report.renewal_ticks,
            "Workload finished"
        );
        Ok(report)
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    async fn bootstrap(&mut self) -> Result<Session> {
        let wrapped = fetch_wrapped_token(self.broker.as_ref(), &self.config.task_id).await?;
        match unwrap_token(self.backend.as_ref(), &wrapped).await {
            Ok(session) => {
                tracing::info!(
                    lease_duration = session.lease_duration(),
                    renewable = session.renewable(),
                    "Session established"
                );
                Ok(session)
            }
            Err(failure) => {
                if let Some(session) = failure.session {
                    self.drain(&session).await;
                }
                Err(failure.error)
            }
        }
    }

    /// Retrieves the catalog, writes the credential file and only then spawns the child.
    async fn prepare_workload(&mut self, session: &Session) -> Result<Workload> {
        retrieve_all(self.backend.as_ref(), session, &mut self.catalog).await?;
        self.warn_on_short_leases();

        materialize(&self.catalog, &self.config.credential_path)?;
        tracing::info!(
            path = %self.config.credential_path.display(),
            secrets = self.catalog.len(),
            "Credentials written"
        );

        let workload =
            Workload::spawn(&self.config.entry_cmd, self.config.working_directory.as_deref())?;
        tracing::info!(pid = ?workload.pid(), command = %self.config.entry_cmd.join(" "), "Workload started");
        Ok(workload)
    }

    /// Advisory: the grace value never changes the cadence, it only feeds this warning.
    fn warn_on_short_leases(&self) {
        let horizon = self.config.refresh_interval.saturating_add(self.config.renewal_grace);
        for secret in self.catalog.values().filter(|s| s.needs_renewal()) {
            let lease = Duration::from_secs(secret.lease_duration.unwrap_or_default());
            if lease < horizon {
                tracing::warn!(
                    secret_id = %secret.id,
                    lease_secs = lease.as_secs(),
                    refresh_interval_secs = self.config.refresh_interval.as_secs_f64(),
                    renewal_grace_secs = self.config.renewal_grace.as_secs_f64(),
                    "Lease may expire before the next renewal tick"
                );
            }
        }
    }

    /// Waits on the child, bounded by the renewal interval. Child exit wins a tie.
    async fn supervise(
        &mut self,
        mut workload: Workload,
        session: &mut Session,
    ) -> Result<RunReport> {
        let mut renewal_ticks = 0;
        loop {
            let interval = tokio::time::sleep(self.config.refresh_interval);
            tokio::select! {
                biased;
                outcome = workload.wait() => {
                    let outcome = outcome?;
                    return Ok(RunReport { outcome, renewal_ticks });
                }
                _ = interval => {
                    renewal_ticks += 1;
                    let tick = self.renewal_tick(session).await;
                    tracing::info!(
                        tick = renewal_ticks,
                        session_renewed = tick.session_renewed,
                        leases_renewed = tick.leases_renewed,
                        leases_failed = tick.leases_failed,
                        "Renewal tick complete"
                    );
                }
            }
        }
    }

    /// Renews the session token and every renewable lease. Best-effort: a failure is
    /// logged and the remaining renewals still run.
    pub async fn renewal_tick(&mut self, session: &mut Session) -> TickReport {
        let mut report = TickReport::default();

        let increment = session.lease_duration();
        match self.backend.renew_self(session.token(), increment).await {
            Ok(response) => {
                let granted = response
                    .auth
                    .as_ref()
                    .and_then(|auth| auth.lease_duration)
                    .unwrap_or(increment);
                session.update_lease(granted);
                report.session_renewed = true;
            }
            Err(e) => tracing::warn!(error = %e, "Session token renewal failed"),
        }

        for secret in self.catalog.values_mut().filter(|s| s.needs_renewal()) {
            let lease_id = secret.lease_id.clone().unwrap_or_default();
            let increment = secret.lease_duration.unwrap_or_default();
            match self.backend.renew_lease(session.token(), &lease_id, increment).await {
                Ok(response) => {
                    secret.update_lease(
                        response.lease_id,
                        response.lease_duration.unwrap_or(increment),
                    );
                    report.leases_renewed += 1;
                }
                Err(e) => {
                    tracing::warn!(secret_id = %secret.id, error = %e, "Lease renewal failed");
                    report.leases_failed += 1;
                }
            }
        }
        report
    }

    /// Best-effort revocation of the session token. Failure is logged, never raised.
    async fn drain(&mut self, session: &Session) {
        self.enter(Phase::Draining);
        match self.backend.revoke_self(session.token()).await {
            Ok(()) => tracing::info!("Session token revoked"),
            Err(e) => tracing::warn!(error = %e, "Session token revocation failed"),
        }
        self.enter(Phase::Terminated);
    }
}
