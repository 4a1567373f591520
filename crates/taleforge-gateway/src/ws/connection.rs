//! Per-connection session controller.
//!
//! One task per WebSocket owns an `Orchestrator` (conversation history across
//! the whole session) and, per turn, a fresh `OrderedPipeline`. A single
//! cooperative event loop drives the current turn, the audio pipeline, the
//! dice-roll handshake, and inbound client frames together — nothing here
//! runs on more than one task at a time besides the generation work the
//! pipeline itself spawns.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use taleforge_agent::tools::player_state::{PlayerState, UpdatePlayerGold, UpdatePlayerHp, UpdatePlayerInventory, UpdatePlayerXp};
use taleforge_agent::tools::roll_dice::RollDice;
use taleforge_agent::tools::search_world::SearchWorld;
use taleforge_agent::tools::Tool;
use taleforge_agent::{AnthropicProvider, Orchestrator, RollCoordinator, TurnEvent};
use taleforge_audio::{ArtifactCache, ElevenLabsSoundEffects, ElevenLabsTts, OrderedPipeline, SegmentProcessor};
use taleforge_campaign::{CampaignSnapshot, OpeningTurnCache};
use taleforge_protocol::{AudioMode, ClientMessage, RollKind, RollOutcome, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::app::{AppState, DM_SYSTEM_PROMPT};

const END_OF_SESSION_MARKER: &str = "[END OF SESSION]";
const DEFAULT_ELEVENLABS_URL: &str = "https://api.elevenlabs.io";

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub async fn ws_handler(
    Path(campaign_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, campaign_id, state))
}

async fn handle_connection(socket: WebSocket, campaign_id: String, state: Arc<AppState>) {
    state.active_sessions.fetch_add(1, Ordering::Relaxed);
    info!(%campaign_id, "new WS connection");

    if let Err(e) = run_session(socket, &campaign_id, &state).await {
        warn!(%campaign_id, error = %e, "session ended with an error");
    }

    state.active_sessions.fetch_sub(1, Ordering::Relaxed);
    info!(%campaign_id, "WS connection closed");
}

async fn run_session(socket: WebSocket, campaign_id: &str, state: &AppState) -> anyhow::Result<()> {
    let campaigns_dir = PathBuf::from(&state.config.campaigns.data_dir);
    let snapshot = CampaignSnapshot::load(&campaigns_dir, campaign_id)?;

    let (mut sink, mut stream) = socket.split();

    let Some(api_key) = state.config.model.api_key.clone() else {
        let _ = send_message(
            &mut sink,
            &ServerMessage::Error {
                content: "model API key not configured".to_string(),
            },
        )
        .await;
        return Ok(());
    };

    let player_state = PlayerState::new(snapshot.character.clone(), snapshot.dir.join("character.json"));
    let corpus = format!(
        "{}\n{}",
        snapshot.overview.campaign_name, snapshot.session_log_tail
    );
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(RollDice),
        Box::new(SearchWorld::new(corpus)),
        Box::new(UpdatePlayerHp(player_state.clone())),
        Box::new(UpdatePlayerXp(player_state.clone())),
        Box::new(UpdatePlayerInventory(player_state.clone())),
        Box::new(UpdatePlayerGold(player_state.clone())),
    ];

    let provider = Arc::new(AnthropicProvider::new(api_key, state.config.model.base_url.clone()));
    let mut orchestrator = Orchestrator::new(
        provider,
        state.config.model.model_id.clone(),
        DM_SYSTEM_PROMPT.to_string(),
        snapshot.context_block(),
        tools,
    );

    let audio = &state.config.audio;
    let cache = Arc::new(ArtifactCache::new(PathBuf::from(&audio.cache_dir)));
    let tts: Arc<dyn taleforge_audio::TtsGenerator> = Arc::new(ElevenLabsTts::new(
        audio.tts_api_key.clone(),
        audio.tts_base_url.clone().unwrap_or_else(|| DEFAULT_ELEVENLABS_URL.to_string()),
    ));
    let sound: Arc<dyn taleforge_audio::SoundGenerator> = Arc::new(ElevenLabsSoundEffects::new(
        audio.sfx_api_key.clone(),
        audio.sfx_base_url.clone().unwrap_or_else(|| DEFAULT_ELEVENLABS_URL.to_string()),
    ));
    let processor = Arc::new(SegmentProcessor::new(
        snapshot.voices.clone(),
        tts,
        sound,
        cache,
        AudioMode::default(),
    ));

    send_message(
        &mut sink,
        &ServerMessage::State {
            updates: serde_json::to_value(&snapshot.character)?,
        },
    )
    .await
    .ok();

    if let Some(cached) = OpeningTurnCache::load_if_fresh(&snapshot.dir, &snapshot.session_log_hash) {
        info!(%campaign_id, "replaying cached opening turn");
        orchestrator.seed_history(cached.messages.clone());
        for value in &cached.messages {
            if sink.send(Message::Text(value.to_string().into())).await.is_err() {
                return Ok(());
            }
        }
    } else {
        let opening_prompt = if snapshot.session_log_tail.contains(END_OF_SESSION_MARKER) {
            "Recap where the party left off last session, then continue the adventure."
        } else {
            "Begin the adventure."
        };
        let outcome = drive_turn(&mut orchestrator, opening_prompt, &mut sink, &mut stream, &processor).await?;
        if outcome.pending_next.is_some() {
            warn!(%campaign_id, "player sent input during the opening turn, dropping it");
        }
        OpeningTurnCache::save(&snapshot.dir, snapshot.session_log_hash.clone(), outcome.recorded).ok();
    }

    let mut next_message: Option<String> = None;
    loop {
        let player_message = match next_message.take() {
            Some(m) => m,
            None => match read_player_message(&mut stream, &processor).await {
                Some(m) => m,
                None => break,
            },
        };

        let outcome = drive_turn(&mut orchestrator, &player_message, &mut sink, &mut stream, &processor).await?;
        next_message = outcome.pending_next;
    }

    Ok(())
}

/// Read client frames until a `PlayerMessage` arrives (applying audio-mode
/// changes along the way), or the connection closes.
async fn read_player_message(stream: &mut WsStream, processor: &Arc<SegmentProcessor>) -> Option<String> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::PlayerMessage { message }) => return Some(message),
                Ok(ClientMessage::SetAudioMode { mode }) => processor.set_mode(mode),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "malformed client frame, ignoring"),
            },
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Err(e)) => {
                warn!(error = %e, "WS read error");
                return None;
            }
            _ => {}
        }
    }
}

/// What a dice roll in progress needs to resume once the client acknowledges it.
enum RollState {
    Idle,
    AwaitingExecute {
        notation: String,
        respond_to: oneshot::Sender<RollOutcome>,
    },
    AwaitingAck {
        outcome: RollOutcome,
        respond_to: oneshot::Sender<RollOutcome>,
    },
}

enum SessionCommand {
    RollRequest {
        tool_use_id: String,
        notation: String,
        reason: String,
        respond_to: oneshot::Sender<RollOutcome>,
    },
}

struct ChannelRollCoordinator {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

#[async_trait::async_trait]
impl RollCoordinator for ChannelRollCoordinator {
    async fn perform_roll(&self, tool_use_id: &str, notation: &str, reason: &str) -> RollOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::RollRequest {
                tool_use_id: tool_use_id.to_string(),
                notation: notation.to_string(),
                reason: reason.to_string(),
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return fallback_outcome(notation);
        }
        rx.await.unwrap_or_else(|_| fallback_outcome(notation))
    }
}

fn fallback_outcome(notation: &str) -> RollOutcome {
    RollOutcome {
        kind: RollKind::Standard,
        notation: notation.to_string(),
        rolls: Vec::new(),
        total: 0,
        modifier: None,
        kept: None,
        discarded: None,
        natural_20: None,
        natural_1: None,
    }
}

struct TurnOutcome {
    recorded: Vec<serde_json::Value>,
    pending_next: Option<String>,
}

/// Drive one player turn to completion: stream narration to the client,
/// feed the audio pipeline, and service the dice-roll handshake, all in one
/// cooperative loop. Returns every message actually sent (for the opening
/// turn cache) and a player message that arrived mid-turn, if any.
async fn drive_turn(
    orchestrator: &mut Orchestrator,
    player_message: &str,
    sink: &mut WsSink,
    stream: &mut WsStream,
    processor: &Arc<SegmentProcessor>,
) -> anyhow::Result<TurnOutcome> {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(4);
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnEvent>(64);
    let (pipeline_tx, mut pipeline_rx) = mpsc::channel::<ServerMessage>(64);
    let mut pipeline = OrderedPipeline::new(processor.clone(), pipeline_tx);
    let roll_coordinator = ChannelRollCoordinator { cmd_tx };

    let mut recorded = Vec::new();
    let mut pending_next = None;
    let mut roll_state = RollState::Idle;

    let run_turn_fut = orchestrator.run_turn(player_message, &roll_coordinator, turn_tx);
    tokio::pin!(run_turn_fut);
    let mut generating = true;

    while generating {
        tokio::select! {
            biased;

            _ = &mut run_turn_fut, if generating => {
                generating = false;
            }

            Some(event) = turn_rx.recv() => {
                match event {
                    TurnEvent::TextDelta { content } => {
                        send_and_record(sink, &ServerMessage::TextDelta { content }, &mut recorded).await?;
                    }
                    TurnEvent::RawDelta { content } => pipeline.feed(&content),
                    TurnEvent::TextEnd { content } => {
                        send_and_record(sink, &ServerMessage::TextEnd { content }, &mut recorded).await?;
                    }
                    TurnEvent::State { character } => {
                        let updates = serde_json::to_value(&character)?;
                        send_and_record(sink, &ServerMessage::State { updates }, &mut recorded).await?;
                    }
                }
            }

            Some(msg) = pipeline_rx.recv() => {
                send_and_record(sink, &msg, &mut recorded).await?;
            }

            Some(cmd) = cmd_rx.recv() => {
                let SessionCommand::RollRequest { tool_use_id, notation, reason, respond_to } = cmd;
                drain_and_flush(&mut pipeline, &mut pipeline_rx, sink, &mut recorded).await?;
                let (tx, rx) = mpsc::channel(64);
                pipeline = OrderedPipeline::new(processor.clone(), tx);
                pipeline_rx = rx;

                let msg = ServerMessage::RollRequest { tool_use_id, notation: notation.clone(), reason };
                send_and_record(sink, &msg, &mut recorded).await?;
                roll_state = RollState::AwaitingExecute { notation, respond_to };
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::SetAudioMode { mode }) => processor.set_mode(mode),
                        Ok(ClientMessage::PlayerMessage { message }) => pending_next = Some(message),
                        Ok(ClientMessage::RollExecute) => {
                            roll_state = resolve_roll_execute(roll_state, sink, &mut recorded).await?;
                        }
                        Ok(ClientMessage::RollAck) => {
                            roll_state = resolve_roll_ack(roll_state);
                        }
                        Err(e) => warn!(error = %e, "malformed client frame, ignoring"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        pipeline.cancel();
                        return Ok(TurnOutcome { recorded, pending_next });
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WS read error, abandoning turn");
                        pipeline.cancel();
                        return Ok(TurnOutcome { recorded, pending_next });
                    }
                    _ => {}
                }
            }
        }
    }

    // `run_turn` has returned, which drops its `TurnEvent` sender — drain
    // whatever it already buffered, then flush the pipeline to completion.
    while let Ok(event) = turn_rx.try_recv() {
        match event {
            TurnEvent::TextDelta { content } => {
                send_and_record(sink, &ServerMessage::TextDelta { content }, &mut recorded).await?;
            }
            TurnEvent::RawDelta { content } => pipeline.feed(&content),
            TurnEvent::TextEnd { content } => {
                send_and_record(sink, &ServerMessage::TextEnd { content }, &mut recorded).await?;
            }
            TurnEvent::State { character } => {
                let updates = serde_json::to_value(&character)?;
                send_and_record(sink, &ServerMessage::State { updates }, &mut recorded).await?;
            }
        }
    }

    drain_and_flush(&mut pipeline, &mut pipeline_rx, sink, &mut recorded).await?;

    Ok(TurnOutcome { recorded, pending_next })
}

/// Flush a pipeline to completion while concurrently draining its output —
/// `flush()`'s internal drain worker delivers by sending on `pipeline_rx`,
/// so leaving it unread while awaiting flush would deadlock once the
/// channel's buffer fills.
async fn drain_and_flush(
    pipeline: &mut OrderedPipeline,
    pipeline_rx: &mut mpsc::Receiver<ServerMessage>,
    sink: &mut WsSink,
    recorded: &mut Vec<serde_json::Value>,
) -> anyhow::Result<()> {
    let flush_fut = pipeline.flush();
    tokio::pin!(flush_fut);
    let mut flushing = true;

    while flushing {
        tokio::select! {
            _ = &mut flush_fut, if flushing => {
                flushing = false;
            }
            Some(msg) = pipeline_rx.recv() => {
                send_and_record(sink, &msg, recorded).await?;
            }
        }
    }

    while let Ok(msg) = pipeline_rx.try_recv() {
        send_and_record(sink, &msg, recorded).await?;
    }

    Ok(())
}

async fn resolve_roll_execute(
    roll_state: RollState,
    sink: &mut WsSink,
    recorded: &mut Vec<serde_json::Value>,
) -> anyhow::Result<RollState> {
    match roll_state {
        RollState::AwaitingExecute { notation, respond_to } => {
            let outcome = {
                let mut rng = rand::thread_rng();
                taleforge_agent::dice::roll(&notation, &mut rng).unwrap_or_else(|e| {
                    warn!(error = %e, notation, "dice notation rejected at roll time");
                    fallback_outcome(&notation)
                })
            };
            send_and_record(sink, &ServerMessage::RollResult { outcome: outcome.clone() }, recorded).await?;
            Ok(RollState::AwaitingAck { outcome, respond_to })
        }
        other => Ok(other),
    }
}

fn resolve_roll_ack(roll_state: RollState) -> RollState {
    match roll_state {
        RollState::AwaitingAck { outcome, respond_to } => {
            let _ = respond_to.send(outcome);
            RollState::Idle
        }
        other => other,
    }
}

async fn send_message(sink: &mut WsSink, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(json.into())).await
}

async fn send_and_record(
    sink: &mut WsSink,
    msg: &ServerMessage,
    recorded: &mut Vec<serde_json::Value>,
) -> anyhow::Result<()> {
    send_message(sink, msg).await?;
    recorded.push(serde_json::to_value(msg)?);
    Ok(())
}
