//! WebSocket broadcaster
//!
//! Actor-based fan-out of lifecycle events to connected clients.
//! Connections may be anonymous (receive-only); authenticated connections
//! may also originate mutations, which are handed to the owning service.
//! On success the public event is broadcast to everyone except the
//! originating connection; the originator gets a direct response.

use actix::{
    Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Context, Handler, Message,
    StreamHandler,
};
use actix_web_actors::ws;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus, Origin};
use crate::services::booking::{BookingCoordinator, SeatSelection};
use crate::services::seat_lock::SeatLockManager;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

// --- Connection limits ---

/// Caps concurrent sockets per user and globally.
pub struct ConnectionManager {
    per_user: std::sync::Mutex<HashMap<i64, usize>>,
    global: std::sync::atomic::AtomicUsize,
    max_per_user: usize,
    max_global: usize,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(3, 1000)
    }
}

impl ConnectionManager {
    pub fn new(max_per_user: usize, max_global: usize) -> Self {
        Self {
            per_user: std::sync::Mutex::new(HashMap::new()),
            global: std::sync::atomic::AtomicUsize::new(0),
            max_per_user,
            max_global,
        }
    }

    /// Reserve a slot. Anonymous connections only count against the global
    /// cap.
    pub fn try_acquire(&self, user_id: Option<i64>) -> Result<(), String> {
        // Check-and-increment must be one atomic step, or a connection
        // burst walks past the cap between the load and the add.
        let reserved = self.global.fetch_update(
            std::sync::atomic::Ordering::SeqCst,
            std::sync::atomic::Ordering::SeqCst,
            |current| (current < self.max_global).then_some(current + 1),
        );
        if reserved.is_err() {
            return Err(format!("global connection limit {} reached", self.max_global));
        }

        if let Some(user_id) = user_id {
            let mut per_user = self.per_user.lock().unwrap_or_else(|e| e.into_inner());
            let count = per_user.entry(user_id).or_insert(0);
            if *count >= self.max_per_user {
                // Hand the reserved global slot back.
                self.global
                    .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(format!(
                    "user connection limit {} reached",
                    self.max_per_user
                ));
            }
            *count += 1;
        }

        Ok(())
    }

    pub fn release(&self, user_id: Option<i64>) {
        if let Some(user_id) = user_id {
            let mut per_user = self.per_user.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(count) = per_user.get_mut(&user_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_user.remove(&user_id);
                }
            }
        }
        self.global
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn current_user_connections(&self, user_id: i64) -> usize {
        self.per_user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }
}

// --- Broadcast server actor ---

#[derive(Default)]
pub struct BroadcastServer {
    sessions: HashMap<Uuid, Addr<WsSession>>,
    user_sessions: HashMap<i64, HashSet<Uuid>>,
}

impl Actor for BroadcastServer {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!("BroadcastServer actor started");
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub addr: Addr<WsSession>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: Uuid,
}

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct OutboundText(pub String);

/// Fan an event out to every session except the originator.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Broadcast {
    pub origin: Origin,
    pub json: String,
}

/// Push an event to one user's sessions only.
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyUser {
    pub user_id: i64,
    pub json: String,
}

impl Handler<Connect> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!(session = %msg.id, user_id = ?msg.user_id, "websocket session connected");
        self.sessions.insert(msg.id, msg.addr);
        if let Some(user_id) = msg.user_id {
            self.user_sessions.entry(user_id).or_default().insert(msg.id);
        }
    }
}

impl Handler<Disconnect> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!(session = %msg.id, "websocket session disconnected");
        if self.sessions.remove(&msg.id).is_some() {
            for sessions in self.user_sessions.values_mut() {
                sessions.remove(&msg.id);
            }
        }
    }
}

impl Handler<Broadcast> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, _: &mut Context<Self>) {
        for (id, addr) in &self.sessions {
            if Some(*id) == msg.origin {
                continue;
            }
            addr.do_send(OutboundText(msg.json.clone()));
        }
    }
}

impl Handler<NotifyUser> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: NotifyUser, _: &mut Context<Self>) {
        let Some(session_ids) = self.user_sessions.get(&msg.user_id) else {
            return;
        };
        for session_id in session_ids {
            if let Some(addr) = self.sessions.get(session_id) {
                addr.do_send(OutboundText(msg.json.clone()));
            }
        }
    }
}

// --- Bus adapter ---

/// The event-bus implementation the services publish to. Serialization or
/// delivery trouble is logged and swallowed; a broadcast failure must never
/// fail the mutation that produced it.
pub struct WsEventBus {
    server: Addr<BroadcastServer>,
}

impl WsEventBus {
    pub fn new(server: Addr<BroadcastServer>) -> Arc<Self> {
        Arc::new(Self { server })
    }
}

impl EventBus for WsEventBus {
    fn publish(&self, origin: Origin, event: BusEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => {
                self.server.do_send(Broadcast { origin, json });
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast event");
            }
        }
    }
}

// --- Per-connection session actor ---

/// Service handles a session needs to act on client-originated mutations.
#[derive(Clone)]
pub struct SessionServices {
    pub seat_locks: Arc<SeatLockManager>,
    pub bookings: Arc<BookingCoordinator>,
}

pub struct WsSession {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub hb: Instant,
    pub server: Addr<BroadcastServer>,
    pub conn_mgr: actix_web::web::Data<ConnectionManager>,
    pub services: SessionServices,
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.server.do_send(Connect {
            id: self.id,
            user_id: self.user_id,
            addr: ctx.address(),
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.server.do_send(Disconnect { id: self.id });
        self.conn_mgr.release(self.user_id);
    }
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(session = %act.id, "heartbeat timeout, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_command(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let command: ClientCommand = match serde_json::from_str(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                ctx.text(error_response("VALIDATION", &format!("bad command: {}", e)));
                return;
            }
        };

        // Receive-only unless the handshake carried a verified identity.
        let Some(user_id) = self.user_id else {
            ctx.text(error_response(
                "AUTH_REQUIRED",
                "Authenticate to originate events",
            ));
            return;
        };

        let services = self.services.clone();
        let origin = Some(self.id);

        let fut = async move {
            match command {
                ClientCommand::LockSeat {
                    event_id,
                    seat_type_id,
                    seat_label,
                } => services
                    .seat_locks
                    .acquire(origin, event_id, seat_type_id, &seat_label, user_id)
                    .await
                    .and_then(|lock| {
                        serde_json::to_value(lock)
                            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))
                    }),
                ClientCommand::ReleaseSeat {
                    event_id,
                    seat_type_id,
                    seat_label,
                } => services
                    .seat_locks
                    .release(origin, event_id, seat_type_id, &seat_label, user_id)
                    .await
                    .map(|released| serde_json::json!({ "released": released })),
                ClientCommand::CreateBooking {
                    event_id,
                    seat_details,
                } => services
                    .bookings
                    .create_booking(origin, event_id, user_id, seat_details)
                    .await
                    .and_then(|view| {
                        serde_json::to_value(view)
                            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))
                    }),
                ClientCommand::CancelBooking {
                    booking_id,
                    reason,
                    idempotency_key,
                } => services
                    .bookings
                    .cancel_booking(origin, booking_id, user_id, reason, idempotency_key)
                    .await
                    .and_then(|response| {
                        serde_json::to_value(response)
                            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))
                    }),
            }
        };

        let wrapped = actix::fut::wrap_future::<_, Self>(fut).map(|result, _act, ctx| {
            match result {
                Ok(value) => ctx.text(
                    serde_json::json!({ "type": "response", "ok": true, "result": value })
                        .to_string(),
                ),
                Err(e) => ctx.text(error_response(e.code(), &e.to_string())),
            }
        });
        ctx.spawn(wrapped);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_command(&text, ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<OutboundText> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut <Self as Actor>::Context) {
        ctx.text(msg.0);
    }
}

/// Mutations a client may originate over the socket. Mirrors the HTTP
/// surface; confirmation stays webhook-only.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    LockSeat {
        event_id: i64,
        seat_type_id: i64,
        seat_label: String,
    },
    ReleaseSeat {
        event_id: i64,
        seat_type_id: i64,
        seat_label: String,
    },
    CreateBooking {
        event_id: i64,
        seat_details: Vec<SeatSelection>,
    },
    CancelBooking {
        booking_id: i64,
        reason: Option<String>,
        idempotency_key: Option<String>,
    },
}

fn error_response(code: &str, message: &str) -> String {
    serde_json::json!({
        "type": "response",
        "ok": false,
        "code": code,
        "message": message,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_manager_enforces_caps() {
        let mgr = ConnectionManager::new(2, 3);
        assert!(mgr.try_acquire(Some(1)).is_ok());
        assert!(mgr.try_acquire(Some(1)).is_ok());
        assert!(mgr.try_acquire(Some(1)).is_err());
        assert_eq!(mgr.current_user_connections(1), 2);

        // A different user still fits under the global cap.
        assert!(mgr.try_acquire(Some(2)).is_ok());
        // Global cap reached now.
        assert!(mgr.try_acquire(None).is_err());

        mgr.release(Some(1));
        assert_eq!(mgr.current_user_connections(1), 1);
        assert!(mgr.try_acquire(None).is_ok());
    }

    #[test]
    fn client_commands_parse() {
        let lock: ClientCommand = serde_json::from_str(
            r#"{"action":"lock_seat","event_id":1,"seat_type_id":2,"seat_label":"V1"}"#,
        )
        .unwrap();
        assert!(matches!(lock, ClientCommand::LockSeat { .. }));

        let cancel: ClientCommand = serde_json::from_str(
            r#"{"action":"cancel_booking","booking_id":9,"reason":null,"idempotency_key":"k1"}"#,
        )
        .unwrap();
        assert!(matches!(cancel, ClientCommand::CancelBooking { .. }));
    }
}
