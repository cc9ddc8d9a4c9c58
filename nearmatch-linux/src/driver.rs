//! Session driver: one task owns the MatchSession. Transport packets, transport failures and
//! cleanup ticks all arrive through one ordered channel, so no upsert races a tick.

use std::collections::VecDeque;
use std::time::Instant;

use nearmatch_core::{
    Action, Candidate, IntentMessage, MatchSession, Readiness, Report, SessionEvent,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::transport::BroadcastTransport;

/// Things the rest of the app may want to react to besides the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Intent(IntentMessage),
    Report(Report),
}

#[derive(Debug)]
enum Control {
    Stop(oneshot::Sender<()>),
}

/// Handle to a running session. Dropping it stops the session.
#[derive(Debug)]
pub struct DriverHandle {
    control: mpsc::UnboundedSender<Control>,
    candidates: watch::Receiver<Vec<Candidate>>,
    notices: mpsc::UnboundedReceiver<Notice>,
    task: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Latest published list, best match first.
    pub fn candidates(&self) -> watch::Receiver<Vec<Candidate>> {
        self.candidates.clone()
    }

    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    /// Stop advertising, scanning and the cleanup timer, and wait for the task to end.
    pub async fn stop(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start the session on `transport` and drive it on a spawned task.
/// Fails with the session's `NotReady` if the transport is unavailable or disabled.
pub fn spawn<T>(mut session: MatchSession, transport: T) -> anyhow::Result<DriverHandle>
where
    T: BroadcastTransport + 'static,
{
    let readiness = Readiness {
        available: transport.is_available(),
        enabled: transport.is_enabled(),
    };
    let actions = session.start(readiness)?;
    tracing::debug!(id = %session.self_id(), "session driver starting");

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (candidates_tx, candidates_rx) = watch::channel(Vec::new());
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let mut driver = Driver {
        session,
        transport,
        events: event_tx,
        candidates: candidates_tx,
        notices: notice_tx,
        ticker: None,
    };
    driver.apply(actions);
    let task = tokio::spawn(driver.run(event_rx, control_rx));

    Ok(DriverHandle {
        control: control_tx,
        candidates: candidates_rx,
        notices: notice_rx,
        task: Some(task),
    })
}

struct Driver<T> {
    session: MatchSession,
    transport: T,
    events: mpsc::UnboundedSender<SessionEvent>,
    candidates: watch::Sender<Vec<Candidate>>,
    notices: mpsc::UnboundedSender<Notice>,
    ticker: Option<Interval>,
}

impl<T: BroadcastTransport> Driver<T> {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        loop {
            tokio::select! {
                cmd = control.recv() => {
                    let actions = self.session.stop();
                    self.apply(actions);
                    if let Some(Control::Stop(done)) = cmd {
                        let _ = done.send(());
                    }
                    return;
                }
                Some(event) = events.recv() => {
                    let actions = self.session.handle(event);
                    self.apply(actions);
                }
                _ = next_tick(&mut self.ticker) => {
                    let actions = self.session.on_cleanup_tick(Instant::now());
                    self.apply(actions);
                }
            }
        }
    }

    /// Execute actions; transport failures are fed back to the session as events.
    fn apply(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::StartAdvertising(payload) => {
                    if let Err(e) = self.transport.start_broadcast(payload.to_vec()) {
                        queue.extend(self.session.handle(SessionEvent::AdvertiseFailed(e.to_string())));
                    }
                }
                Action::StopAdvertising => self.transport.stop_broadcast(),
                Action::StartScanning => {
                    if let Err(e) = self.transport.start_listening(self.events.clone()) {
                        queue.extend(self.session.handle(SessionEvent::ScanFailed(e.to_string())));
                    }
                }
                Action::StopScanning => self.transport.stop_listening(),
                Action::StartCleanupTimer(period) => {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ticker = Some(ticker);
                }
                Action::CancelCleanupTimer => self.ticker = None,
                Action::CandidatesChanged(list) => {
                    self.candidates.send_replace(list);
                }
                Action::IntentReceived(intent) => {
                    let _ = self.notices.send(Notice::Intent(intent));
                }
                Action::Report(report) => {
                    let _ = self.notices.send(Notice::Report(report));
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
