//! Echo bot over the loopback transport.
//!
//! Run with: cargo run -p echo-bot
//!
//! A simulated hook process logs in, pushes one text message and answers
//! contact queries; the bot echoes the text back.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wxbridge_core::{ClientId, Envelope, MessageType, Transport};
use wxbridge_session::{Session, SessionConfig, SessionRegistry};
use wxbridge_transport::{MemoryTransport, Outbound};

const DEMO_PID: u32 = 4242;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = Arc::new(SessionRegistry::new());
    let transport = Arc::new(MemoryTransport::new());
    let outbound = transport
        .take_outbound()
        .context("outbound stream already taken")?;

    let config = SessionConfig::default().with_default_timeout(Duration::from_secs(2));
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let session = Session::new(dyn_transport, &registry, config);
    let attachment = session.attach(DEMO_PID).await?;
    tracing::info!("{session}");

    session.subscribe(MessageType::RecvText, |session, envelope| {
        let from = envelope.data["from_wxid"]
            .as_str()
            .context("text push without sender")?
            .to_string();
        let msg = envelope.data["msg"].as_str().unwrap_or_default().to_string();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.send_text(&from, &format!("echo: {msg}")).await {
                tracing::error!("Failed to echo: {e}");
            }
        });
        Ok(())
    });

    let (echoed_tx, echoed_rx) = oneshot::channel();
    tokio::spawn(simulate_hook(
        Arc::clone(&registry),
        attachment.client_id,
        outbound,
        echoed_tx,
    ));

    if !session.wait_for_login(Duration::from_secs(5)).await {
        anyhow::bail!("no login notification");
    }
    tracing::info!(profile = %session.login_info().to_value(), "logged in");

    let contacts = session.get_contacts().await?;
    tracing::info!(?contacts, "contacts");

    let echoed = tokio::time::timeout(Duration::from_secs(5), echoed_rx)
        .await
        .context("echo not seen")??;
    tracing::info!(%echoed, "hook received echo");

    session.detach().await?;
    Ok(())
}

/// Plays the hook process: pushes a login and a text message, then answers
/// correlated queries and reports the first text sent back.
async fn simulate_hook(
    registry: Arc<SessionRegistry>,
    client_id: ClientId,
    mut outbound: UnboundedReceiverStream<Outbound>,
    echoed: oneshot::Sender<String>,
) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let login = Envelope::new(
        MessageType::Login,
        json!({"wxid": "wxid_bot", "nickname": "Bot"}),
    );
    deliver(&registry, client_id, &login);
    let push = Envelope::new(
        MessageType::RecvText,
        json!({"from_wxid": "wxid_friend", "msg": "hello"}),
    );
    deliver(&registry, client_id, &push);

    let mut echoed = Some(echoed);

    while let Some(sent) = outbound.next().await {
        let Some(request) = sent.envelope() else {
            tracing::warn!("hook got undecodable envelope");
            continue;
        };
        match (request.msg_type, request.correlation_id) {
            (MessageType::SendText, None) => {
                let content = request.data["content"].as_str().unwrap_or_default();
                if let Some(tx) = echoed.take() {
                    let _ = tx.send(content.to_string());
                }
            }
            (msg_type, Some(id)) => {
                let reply = Envelope::new(msg_type, canned_reply(msg_type)).with_correlation_id(id);
                deliver(&registry, client_id, &reply);
            }
            (msg_type, None) => tracing::debug!(%msg_type, "hook ignoring command"),
        }
    }
}

fn canned_reply(msg_type: MessageType) -> Value {
    match msg_type {
        MessageType::GetContacts => json!([{"wxid": "wxid_friend", "nickname": "Friend"}]),
        MessageType::GetSelfInfo => json!({"wxid": "wxid_bot", "nickname": "Bot"}),
        _ => json!([]),
    }
}

fn deliver(registry: &SessionRegistry, client_id: ClientId, envelope: &Envelope) {
    match envelope.encode() {
        Ok(raw) => {
            if let Err(e) = registry.route(client_id, &raw) {
                tracing::error!("Failed to route: {e}");
            }
        }
        Err(e) => tracing::error!("Failed to encode: {e}"),
    }
}
