//! Per-connection read loop and message dispatch.
//!
//! Each accepted connection runs one handler task. The handler registers the
//! session, then loops: accumulate bytes, extract complete frames, dispatch
//! by message type and reply. Frame errors answer RESPONSE_ERROR and keep
//! the connection alive; only EOF, a read/write error, an explicit
//! DISCONNECT or server shutdown end the loop, and every exit path releases
//! the registry slot and closes the socket.

use crate::auth::AuthService;
use crate::sessions::{SessionRegistry, SessionWriter};
use crate::vehicle::Vehicle;
use log::{info, warn};
use shared::{encode_response, encode_telemetry, CommandType, Message, MessageType, Role};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};

/// Cap on buffered unterminated input. A peer that never completes a frame
/// gets an error and a buffer reset instead of unbounded memory growth.
const MAX_ACCUMULATED: usize = 16384;

/// Shared server state handed to every connection handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<RwLock<SessionRegistry>>,
    pub auth: Arc<RwLock<AuthService>>,
    pub vehicle: Arc<Mutex<Vehicle>>,
}

/// Runs one connection to completion. Consumes the stream; the write half
/// is shared with the broadcaster through the session registry.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: HandlerContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, write_half) = stream.into_split();
    let writer: SessionWriter = Arc::new(Mutex::new(write_half));

    let session_id = {
        let mut registry = ctx.registry.write().await;
        match registry.register(addr, Arc::clone(&writer)) {
            Ok(id) => id,
            Err(full) => {
                warn!("Refusing connection from {}: {}", addr, full);
                let reply = encode_response(MessageType::ResponseError, "Server full");
                let mut w = writer.lock().await;
                let _ = w.write_all(reply.as_bytes()).await;
                let _ = w.shutdown().await;
                return;
            }
        }
    };

    let mut accumulated: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; 2048];

    'connection: loop {
        // Drain every complete frame already buffered before reading more.
        loop {
            match Message::parse(&accumulated) {
                Ok(Some((msg, consumed))) => {
                    accumulated.drain(..consumed);
                    if !dispatch(&msg, session_id, addr, &ctx, &writer).await {
                        break 'connection;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Session {} ({}): malformed message: {}", session_id, addr, e);
                    let reply =
                        encode_response(MessageType::ResponseError, "Invalid message format");
                    if !send(&writer, &reply, session_id).await {
                        break 'connection;
                    }
                    accumulated.clear();
                    break;
                }
            }
        }

        if accumulated.len() > MAX_ACCUMULATED {
            warn!(
                "Session {} ({}): {} bytes without a message terminator, resetting buffer",
                session_id,
                addr,
                accumulated.len()
            );
            let reply = encode_response(MessageType::ResponseError, "Message too large");
            if !send(&writer, &reply, session_id).await {
                break;
            }
            accumulated.clear();
        }

        tokio::select! {
            read = reader.read(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        info!("Session {} ({}): connection closed by peer", session_id, addr);
                        break;
                    }
                    Ok(n) => accumulated.extend_from_slice(&read_buf[..n]),
                    Err(e) => {
                        warn!("Session {} ({}): read error: {}", session_id, addr, e);
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Session {} ({}): closing for server shutdown", session_id, addr);
                break;
            }
        }
    }

    // Sole cleanup path besides broadcast pruning: release the slot and
    // close the socket unconditionally.
    ctx.registry.write().await.unregister(session_id);
    let _ = writer.lock().await.shutdown().await;
}

/// Handles one decoded message. Returns false when the connection should
/// close (DISCONNECT or a failed write).
async fn dispatch(
    msg: &Message,
    session_id: u32,
    addr: SocketAddr,
    ctx: &HandlerContext,
    writer: &SessionWriter,
) -> bool {
    match msg.kind {
        MessageType::Connect => {
            let role = Role::from_user_type(msg.user_type.as_deref().unwrap_or(""));
            ctx.registry.write().await.set_role(session_id, role);
            info!("Session {} ({}): connected as {}", session_id, addr, role);

            let text = match role {
                Role::Admin => "Connected as ADMIN. Authenticate to send commands",
                Role::Observer => "Connected as OBSERVER. Telemetry will arrive automatically",
            };
            send(writer, &encode_response(MessageType::ResponseOk, text), session_id).await
        }

        MessageType::Auth => {
            let role = ctx.registry.read().await.role(session_id);
            if role != Some(Role::Admin) {
                warn!("Session {} ({}): AUTH from non-admin", session_id, addr);
                let reply = encode_response(
                    MessageType::ResponseError,
                    "Only administrators can authenticate",
                );
                return send(writer, &reply, session_id).await;
            }

            let username = msg.username.as_deref().unwrap_or("");
            let password = msg.auth_token.as_deref().unwrap_or("");

            let issued = ctx.auth.write().await.authenticate(username, password);
            match issued {
                Some(token) => {
                    ctx.registry
                        .write()
                        .await
                        .set_authenticated(session_id, username, &token);
                    info!("Session {} ({}): authenticated as {}", session_id, addr, username);

                    let text = format!("Authentication successful. Token: {}", token);
                    send(writer, &encode_response(MessageType::ResponseOk, &text), session_id)
                        .await
                }
                None => {
                    warn!("Session {} ({}): invalid credentials for '{}'", session_id, addr, username);
                    let reply =
                        encode_response(MessageType::ResponseError, "Invalid credentials");
                    send(writer, &reply, session_id).await
                }
            }
        }

        MessageType::Command => {
            if let Err(reason) = admin_gate(session_id, ctx).await {
                warn!("Session {} ({}): COMMAND refused: {}", session_id, addr, reason);
                return send(
                    writer,
                    &encode_response(MessageType::ResponseError, reason),
                    session_id,
                )
                .await;
            }

            let command = CommandType::parse(msg.command.as_deref().unwrap_or(""));
            if command == CommandType::Unknown {
                warn!(
                    "Session {} ({}): unknown command '{}'",
                    session_id,
                    addr,
                    msg.command.as_deref().unwrap_or("")
                );
                let reply = encode_response(MessageType::ResponseError, "Unknown command");
                return send(writer, &reply, session_id).await;
            }

            // Admission check and mutation form one critical section.
            let result = ctx.vehicle.lock().await.execute(command);
            match result {
                Ok(state) => {
                    let text = format!(
                        "Command {} executed. Speed: {:.2} km/h, Direction: {}",
                        command, state.speed, state.direction
                    );
                    info!("Session {} ({}): {}", session_id, addr, text);
                    send(writer, &encode_response(MessageType::ResponseOk, &text), session_id)
                        .await
                }
                Err(rejected) => {
                    let reason = rejected.to_string();
                    warn!("Session {} ({}): command rejected: {}", session_id, addr, reason);
                    send(
                        writer,
                        &encode_response(MessageType::ResponseError, &reason),
                        session_id,
                    )
                    .await
                }
            }
        }

        MessageType::ListUsers => {
            if let Err(reason) = admin_gate(session_id, ctx).await {
                warn!("Session {} ({}): LIST_USERS refused: {}", session_id, addr, reason);
                return send(
                    writer,
                    &encode_response(MessageType::ResponseError, reason),
                    session_id,
                )
                .await;
            }

            let listing = ctx.registry.read().await.describe();
            info!("Session {} ({}): listed users", session_id, addr);
            send(writer, &encode_response(MessageType::ResponseOk, &listing), session_id).await
        }

        MessageType::GetTelemetry => {
            let state = ctx.vehicle.lock().await.snapshot();
            info!("Session {} ({}): requested telemetry", session_id, addr);
            send(writer, &encode_telemetry(&state), session_id).await
        }

        MessageType::Disconnect => {
            info!("Session {} ({}): requested disconnect", session_id, addr);
            let reply = encode_response(MessageType::ResponseOk, "Disconnected");
            send(writer, &reply, session_id).await;
            false
        }

        MessageType::ResponseOk | MessageType::ResponseError | MessageType::TelemetryData => {
            warn!(
                "Session {} ({}): inbound {} is not a client message",
                session_id, addr, msg.kind
            );
            let reply = encode_response(MessageType::ResponseError, "Unsupported message type");
            send(writer, &reply, session_id).await
        }
    }
}

/// Authorization gate shared by COMMAND and LIST_USERS: the session must be
/// an authenticated admin whose stored token still validates (it may have
/// expired since login).
async fn admin_gate(session_id: u32, ctx: &HandlerContext) -> Result<(), &'static str> {
    let (role, authenticated, credentials) = {
        let registry = ctx.registry.read().await;
        (
            registry.role(session_id),
            registry.is_authenticated(session_id),
            registry.credentials(session_id),
        )
    };

    if role != Some(Role::Admin) || !authenticated {
        return Err("Must be an authenticated administrator");
    }

    let (username, token) =
        credentials.ok_or("Must be an authenticated administrator")?;
    if !ctx.auth.read().await.validate(&username, &token) {
        return Err("Token invalid, re-authenticate");
    }
    Ok(())
}

/// Writes one encoded frame to the session socket. A failed write means the
/// peer is gone; the caller tears the connection down.
async fn send(writer: &SessionWriter, payload: &str, session_id: u32) -> bool {
    let mut w = writer.lock().await;
    match w.write_all(payload.as_bytes()).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Session {}: write failed: {}", session_id, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRegistry;
    use tokio::net::{TcpListener, TcpStream};

    async fn context() -> HandlerContext {
        HandlerContext {
            registry: Arc::new(RwLock::new(SessionRegistry::new(4))),
            auth: Arc::new(RwLock::new(AuthService::with_default_accounts())),
            vehicle: Arc::new(Mutex::new(Vehicle::new())),
        }
    }

    async fn writer_pair() -> (SessionWriter, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (_, write_half) = server_side.into_split();
        (Arc::new(Mutex::new(write_half)), client)
    }

    #[tokio::test]
    async fn test_admin_gate_requires_admin_role() {
        let ctx = context().await;
        let (writer, _client) = writer_pair().await;
        let id = ctx
            .registry
            .write()
            .await
            .register("127.0.0.1:9999".parse().unwrap(), writer)
            .unwrap();

        assert_eq!(
            admin_gate(id, &ctx).await,
            Err("Must be an authenticated administrator")
        );
    }

    #[tokio::test]
    async fn test_admin_gate_requires_valid_token() {
        let ctx = context().await;
        let (writer, _client) = writer_pair().await;
        let id = ctx
            .registry
            .write()
            .await
            .register("127.0.0.1:9999".parse().unwrap(), writer)
            .unwrap();

        {
            let mut registry = ctx.registry.write().await;
            registry.set_role(id, Role::Admin);
            registry.set_authenticated(id, "admin", "TOKEN_stale");
        }

        // The session claims a token the auth service never issued.
        assert_eq!(admin_gate(id, &ctx).await, Err("Token invalid, re-authenticate"));
    }

    #[tokio::test]
    async fn test_admin_gate_passes_with_issued_token() {
        let ctx = context().await;
        let (writer, _client) = writer_pair().await;
        let id = ctx
            .registry
            .write()
            .await
            .register("127.0.0.1:9999".parse().unwrap(), writer)
            .unwrap();

        let token = ctx
            .auth
            .write()
            .await
            .authenticate("admin", "admin123")
            .unwrap();
        {
            let mut registry = ctx.registry.write().await;
            registry.set_role(id, Role::Admin);
            registry.set_authenticated(id, "admin", &token);
        }

        assert_eq!(admin_gate(id, &ctx).await, Ok(()));
    }

    #[tokio::test]
    async fn test_admin_gate_fails_after_revoke() {
        let ctx = context().await;
        let (writer, _client) = writer_pair().await;
        let id = ctx
            .registry
            .write()
            .await
            .register("127.0.0.1:9999".parse().unwrap(), writer)
            .unwrap();

        let token = ctx
            .auth
            .write()
            .await
            .authenticate("admin", "admin123")
            .unwrap();
        {
            let mut registry = ctx.registry.write().await;
            registry.set_role(id, Role::Admin);
            registry.set_authenticated(id, "admin", &token);
        }

        ctx.auth.write().await.revoke("admin");
        assert_eq!(admin_gate(id, &ctx).await, Err("Token invalid, re-authenticate"));
    }
}
