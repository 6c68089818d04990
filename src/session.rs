//! The public contract: a cloneable [`Session`] handle backed by a single
//! actor task that owns all protocol state, enforcing single-flight
//! operation the way §5's single logical scheduler is described.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::link::LinkAdapter;
use crate::receiver;
use crate::sender::{self, FinalAck};
use crate::stats::Statistics;

/// Default deadline for [`Session::exchange`] when the caller doesn't supply
/// one.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

type ProgressFn = Box<dyn FnMut(u32, u32, bool) + Send>;
type PayloadFn = Box<dyn FnMut(Bytes) + Send>;
type ConnectionFn = Box<dyn FnMut(bool) + Send>;

#[derive(Default)]
struct Observers {
    on_payload: Option<PayloadFn>,
    on_progress: Option<ProgressFn>,
    on_connection: Option<ConnectionFn>,
}

enum SessionEvent {
    Send {
        payload: Bytes,
        responder: oneshot::Sender<Result<()>>,
    },
    Receive {
        deadline: Option<Duration>,
        responder: oneshot::Sender<Result<Bytes>>,
    },
    Exchange {
        payload: Bytes,
        deadline: Duration,
        responder: oneshot::Sender<Result<Bytes>>,
    },
    Cancel,
    SetOnPayload(PayloadFn),
    SetOnProgress(ProgressFn),
    SetOnConnection(ConnectionFn),
}

/// Replies `Busy` to whichever operation-shaped event arrived while another
/// operation was already in flight. `Cancel` is handled inline by the caller.
/// Observer setters arriving mid-operation are dropped silently: observers
/// are set before an operation starts, not applied retroactively to one
/// already in flight (and doing so would mean writing through a `&mut` the
/// in-flight future already holds).
fn reply_busy(ev: SessionEvent) {
    match ev {
        SessionEvent::Send { responder, .. } => {
            let _ = responder.send(Err(Error::Busy));
        }
        SessionEvent::Receive { responder, .. } => {
            let _ = responder.send(Err(Error::Busy));
        }
        SessionEvent::Exchange { responder, .. } => {
            let _ = responder.send(Err(Error::Busy));
        }
        _ => {}
    }
}

/// A handle to a running session. Cheap to clone; every clone talks to the
/// same actor task and therefore the same single-flight state machine.
#[derive(Clone)]
pub struct Session {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    stats: Arc<Statistics>,
}

impl Session {
    /// Spawns the session actor bound to `link` and returns a handle to it.
    pub fn new(link: Arc<dyn LinkAdapter>, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let stats = Statistics::new();

        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        link.subscribe_data(data_tx);
        link.subscribe_control(control_tx);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let actor = SessionActor {
            link,
            config,
            stats: stats.clone(),
            data_rx,
            control_rx,
            events: event_rx,
            observers: Observers::default(),
        };
        tokio::spawn(actor.run());

        Ok(Session { event_tx, stats })
    }

    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.event_tx
            .send(SessionEvent::Send {
                payload: payload.into(),
                responder: tx,
            })
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn receive(&self, deadline: Option<Duration>) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.event_tx
            .send(SessionEvent::Receive {
                deadline,
                responder: tx,
            })
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn exchange(&self, request: impl Into<Bytes>) -> Result<Bytes> {
        self.exchange_with_deadline(request, DEFAULT_EXCHANGE_TIMEOUT)
            .await
    }

    pub async fn exchange_with_deadline(
        &self,
        request: impl Into<Bytes>,
        deadline: Duration,
    ) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.event_tx
            .send(SessionEvent::Exchange {
                payload: request.into(),
                deadline,
                responder: tx,
            })
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Forces the session back to idle from any state. Idempotent: a no-op
    /// if nothing is in flight. Does not wait for the actor to observe it.
    pub fn cancel(&self) -> Result<()> {
        self.event_tx
            .send(SessionEvent::Cancel)
            .map_err(|_| Error::Disconnected)
    }

    pub fn stats(&self) -> Arc<Statistics> {
        self.stats.clone()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn on_payload(&self, f: impl FnMut(Bytes) + Send + 'static) {
        let _ = self.event_tx.send(SessionEvent::SetOnPayload(Box::new(f)));
    }

    pub fn on_progress(&self, f: impl FnMut(u32, u32, bool) + Send + 'static) {
        let _ = self
            .event_tx
            .send(SessionEvent::SetOnProgress(Box::new(f)));
    }

    pub fn on_connection(&self, f: impl FnMut(bool) + Send + 'static) {
        let _ = self
            .event_tx
            .send(SessionEvent::SetOnConnection(Box::new(f)));
    }
}

struct SessionActor {
    link: Arc<dyn LinkAdapter>,
    config: TransportConfig,
    stats: Arc<Statistics>,
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    control_rx: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    observers: Observers,
}

impl SessionActor {
    async fn run(mut self) {
        info!("[SESSION] actor started");
        loop {
            match self.events.recv().await {
                None => {
                    debug!("[SESSION] handle dropped, actor shutting down");
                    return;
                }
                Some(SessionEvent::Cancel) => {
                    // Idle: nothing to cancel.
                }
                Some(SessionEvent::SetOnPayload(f)) => self.observers.on_payload = Some(f),
                Some(SessionEvent::SetOnProgress(f)) => self.observers.on_progress = Some(f),
                Some(SessionEvent::SetOnConnection(f)) => self.observers.on_connection = Some(f),
                Some(SessionEvent::Send { payload, responder }) => {
                    self.do_send(payload, responder).await
                }
                Some(SessionEvent::Receive {
                    deadline,
                    responder,
                }) => self.do_receive(deadline, responder).await,
                Some(SessionEvent::Exchange {
                    payload,
                    deadline,
                    responder,
                }) => self.do_exchange(payload, deadline, responder).await,
            }
        }
    }

    async fn do_send(&mut self, payload: Bytes, responder: oneshot::Sender<Result<()>>) {
        info!("[SESSION] Idle -> Sending");
        let fut = sender::run_send(
            self.link.as_ref(),
            &self.config,
            &self.stats,
            &payload,
            &mut self.control_rx,
            false,
            |c, t, s| {
                if let Some(cb) = &mut self.observers.on_progress {
                    cb(c, t, s);
                }
            },
        );
        tokio::pin!(fut);

        let result = loop {
            tokio::select! {
                res = &mut fut => break res.map(|_| ()),
                ev = self.events.recv() => match ev {
                    Some(SessionEvent::Cancel) => break Err(Error::Cancelled),
                    Some(other) => reply_busy(other),
                    None => break Err(Error::Disconnected),
                }
            }
        };
        info!("[SESSION] Sending -> Idle");
        let _ = responder.send(result);
    }

    async fn do_receive(
        &mut self,
        deadline: Option<Duration>,
        responder: oneshot::Sender<Result<Bytes>>,
    ) {
        info!("[SESSION] Idle -> Receiving");
        let deadline_fut = tokio::time::sleep(deadline.unwrap_or(FAR_FUTURE));
        tokio::pin!(deadline_fut);

        let fut = receiver::run_receive(
            self.link.as_ref(),
            &self.config,
            &self.stats,
            &mut self.data_rx,
            |c, t, s| {
                if let Some(cb) = &mut self.observers.on_progress {
                    cb(c, t, s);
                }
            },
        );
        tokio::pin!(fut);

        let result = loop {
            tokio::select! {
                res = &mut fut => break res,
                _ = &mut deadline_fut => break Err(Error::Timeout),
                ev = self.events.recv() => match ev {
                    Some(SessionEvent::Cancel) => break Err(Error::Cancelled),
                    Some(other) => reply_busy(other),
                    None => break Err(Error::Disconnected),
                }
            }
        };

        if let (Ok(payload), Some(cb)) = (&result, &mut self.observers.on_payload) {
            cb(payload.clone());
        }
        info!("[SESSION] Receiving -> Idle");
        let _ = responder.send(result);
    }

    async fn do_exchange(
        &mut self,
        payload: Bytes,
        deadline: Duration,
        responder: oneshot::Sender<Result<Bytes>>,
    ) {
        info!("[SESSION] Idle -> Sending (exchange)");
        let deadline_fut = tokio::time::sleep(deadline);
        tokio::pin!(deadline_fut);

        let send_fut = sender::run_send(
            self.link.as_ref(),
            &self.config,
            &self.stats,
            &payload,
            &mut self.control_rx,
            true,
            |c, t, s| {
                if let Some(cb) = &mut self.observers.on_progress {
                    cb(c, t, s);
                }
            },
        );
        tokio::pin!(send_fut);

        let send_result = loop {
            tokio::select! {
                res = &mut send_fut => break res,
                _ = &mut deadline_fut => {
                    let _ = responder.send(Err(Error::Timeout));
                    return;
                }
                ev = self.events.recv() => match ev {
                    Some(SessionEvent::Cancel) => { let _ = responder.send(Err(Error::Cancelled)); return; }
                    Some(other) => reply_busy(other),
                    None => { let _ = responder.send(Err(Error::Disconnected)); return; }
                }
            }
        };

        let final_ack = match send_result {
            Ok(ack) => ack,
            Err(e) => {
                let _ = responder.send(Err(e));
                return;
            }
        };
        if final_ack == FinalAck::Success {
            let _ = responder.send(Err(Error::Other(
                "peer completed the transfer without sending a response".into(),
            )));
            return;
        }

        info!("[SESSION] Sending -> AwaitingResponse -> Receiving (exchange)");
        let recv_fut = receiver::run_receive(
            self.link.as_ref(),
            &self.config,
            &self.stats,
            &mut self.data_rx,
            |c, t, s| {
                if let Some(cb) = &mut self.observers.on_progress {
                    cb(c, t, s);
                }
            },
        );
        tokio::pin!(recv_fut);

        let recv_result = loop {
            tokio::select! {
                res = &mut recv_fut => break res,
                _ = &mut deadline_fut => break Err(Error::Timeout),
                ev = self.events.recv() => match ev {
                    Some(SessionEvent::Cancel) => break Err(Error::Cancelled),
                    Some(other) => reply_busy(other),
                    None => break Err(Error::Disconnected),
                }
            }
        };

        if let (Ok(payload), Some(cb)) = (&recv_result, &mut self.observers.on_payload) {
            cb(payload.clone());
        }
        info!("[SESSION] Receiving -> Idle (exchange)");
        let _ = responder.send(recv_result);
    }
}

/// Stand-in for "no deadline": longer than any real test or demo will run.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 50);
