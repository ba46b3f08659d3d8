//! The conversation session controller.
//!
//! Single point of mutation for the transcript, the avatar emotion, and
//! the voice flag. Runs as a `tokio::select!` event loop over three inputs
//! — commands from [`SessionHandle`]s, gateway turn outcomes, playback
//! completion signals — plus a cancellable idle deadline that returns the
//! avatar to its resting state a bounded time after any reply.

use crate::config::ChikoConfig;
use crate::emotion::{self, EmotionState};
use crate::error::{ChikoError, Result};
use crate::gateway::{ConversationIdentity, GatewayReply, ReplyGateway};
use crate::playback::{AudioSink, PlaybackEvent, PlaybackUnit};
use crate::repetition::{self, QuestionHistory};
use crate::session::messages::{
    Message, SessionCommand, SessionEvent, SessionSnapshot,
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Buffer size for the session event broadcast channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Canned replies used when the user keeps asking the same thing.
const FRUSTRATION_REPLIES: &[&str] = &[
    "We just went over this. Asking again won't change my answer.",
    "You keep asking me the same question. I already told you!",
    "Again? Really? I answered that a moment ago.",
    "I'm starting to think you're not listening to me.",
];

/// One in-flight conversation turn.
struct PendingTurn {
    /// Conversation id active when the turn was submitted. A reset rotates
    /// the session's id, which makes this tag stale.
    conv_id: String,
    /// Whether the repetition detector flagged the question.
    repeated: bool,
}

/// Result of a spawned gateway call.
struct TurnOutcome {
    conv_id: String,
    result: Result<GatewayReply>,
}

/// Cloneable handle for driving a running session controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Submit user text for a conversation turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has stopped.
    pub fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Submit(text.into()))
    }

    /// Clear the session and notify the gateway (best-effort).
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has stopped.
    pub fn reset(&self) -> Result<()> {
        self.send(SessionCommand::Reset)
    }

    /// Enable or disable voice playback.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has stopped.
    pub fn set_voice_enabled(&self, enabled: bool) -> Result<()> {
        self.send(SessionCommand::SetVoiceEnabled(enabled))
    }

    /// Manually override the avatar emotion, bypassing the classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has stopped.
    pub fn set_emotion(&self, state: EmotionState) -> Result<()> {
        self.send(SessionCommand::SetEmotion(state))
    }

    /// Stop the controller loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has already stopped.
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Fetch a copy of the current session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller loop has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| ChikoError::Channel("controller dropped snapshot request".into()))
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ChikoError::Channel("session controller is not running".into()))
    }
}

/// The session controller: state plus the channels feeding its run loop.
pub struct SessionController {
    state: SessionState,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    turns_rx: mpsc::UnboundedReceiver<TurnOutcome>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
}

impl SessionController {
    /// Create a controller and a handle for driving it.
    pub fn new(
        config: ChikoConfig,
        gateway: Arc<ReplyGateway>,
        sink: Arc<dyn AudioSink>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (turns_tx, turns_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let identity = ConversationIdentity::new(config.session.user_id.clone());
        info!(user_id = %identity.user_id, conv_id = %identity.conv_id, "session started");

        let fetch_timeout = std::time::Duration::from_secs(config.gateway.request_timeout_secs);
        let state = SessionState {
            history: QuestionHistory::new(config.repetition.history_len),
            voice_enabled: config.audio.voice_enabled,
            playback: PlaybackUnit::new(sink, playback_tx, fetch_timeout),
            config,
            gateway,
            turns_tx,
            events: events.clone(),
            transcript: Vec::new(),
            emotion: EmotionState::Idle,
            identity,
            pending: None,
            audio_active: false,
            idle_deadline: None,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            events,
        };
        (
            Self {
                state,
                commands_rx,
                turns_rx,
                playback_rx,
            },
            handle,
        )
    }

    /// Run the controller loop until every handle is dropped or a
    /// [`SessionCommand::Shutdown`] arrives.
    pub async fn run(self) {
        let Self {
            mut state,
            mut commands_rx,
            mut turns_rx,
            mut playback_rx,
        } = self;

        loop {
            let idle_deadline = state.idle_deadline;
            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => state.handle_command(command),
                },
                Some(outcome) = turns_rx.recv() => state.handle_turn_outcome(outcome),
                Some(event) = playback_rx.recv() => state.handle_playback_event(event),
                _ = sleep_until_opt(idle_deadline) => state.handle_idle_timeout(),
            }
        }

        state.playback.stop();
        info!("session controller stopped");
    }
}

/// Sleep until the deadline, or forever when there is none.
async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// All mutable session state. Only the run loop touches it.
struct SessionState {
    config: ChikoConfig,
    gateway: Arc<ReplyGateway>,
    playback: PlaybackUnit,
    turns_tx: mpsc::UnboundedSender<TurnOutcome>,
    events: broadcast::Sender<SessionEvent>,
    transcript: Vec<Message>,
    history: QuestionHistory,
    emotion: EmotionState,
    voice_enabled: bool,
    identity: ConversationIdentity,
    pending: Option<PendingTurn>,
    audio_active: bool,
    idle_deadline: Option<tokio::time::Instant>,
}

impl SessionState {
    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Submit(text) => self.submit(&text),
            SessionCommand::Reset => self.reset_session(),
            SessionCommand::SetVoiceEnabled(enabled) => self.set_voice_enabled(enabled),
            SessionCommand::SetEmotion(state) => {
                self.set_emotion(state);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    transcript: self.transcript.clone(),
                    emotion: self.emotion,
                    voice_enabled: self.voice_enabled,
                    pending: self.pending.is_some(),
                });
            }
            SessionCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Start a conversation turn.
    ///
    /// No-op for blank input and while another turn is in flight.
    fn submit(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank submission");
            return;
        }
        if self.pending.is_some() {
            debug!("submission already in flight, rejecting");
            return;
        }

        self.append(Message::user(text));

        let repeated = repetition::is_repeated(&self.history, text, &self.config.repetition);
        if repeated {
            // Optimistic: show irritation before the reply even arrives.
            self.set_emotion(EmotionState::Angry);
        }
        self.history.push(text);

        self.pending = Some(PendingTurn {
            conv_id: self.identity.conv_id.clone(),
            repeated,
        });

        let gateway = Arc::clone(&self.gateway);
        let identity = self.identity.clone();
        let turns_tx = self.turns_tx.clone();
        let text = text.to_owned();
        tokio::spawn(async move {
            let result = gateway.ask(&text, &identity).await;
            let _ = turns_tx.send(TurnOutcome {
                conv_id: identity.conv_id,
                result,
            });
        });
    }

    /// Apply a finished gateway turn, unless it belongs to a conversation
    /// that has since been reset.
    fn handle_turn_outcome(&mut self, outcome: TurnOutcome) {
        if outcome.conv_id != self.identity.conv_id {
            debug!("discarding reply for reset conversation");
            return;
        }
        let Some(pending) = self.pending.take() else {
            warn!("gateway outcome with no pending turn");
            return;
        };

        match outcome.result {
            Ok(reply) => self.apply_reply(reply, pending.repeated),
            Err(e) => {
                warn!("gateway turn failed: {e}");
                self.append(Message::system(format!("reply failed: {e}")));
                self.schedule_idle(self.config.timing.error_idle_timeout());
            }
        }
    }

    fn apply_reply(&mut self, reply: GatewayReply, repeated: bool) {
        let (text, emotion) = if repeated {
            (frustration_reply(), EmotionState::Angry)
        } else {
            let emotion = emotion::classify(reply.emotion.as_deref(), &reply.reply);
            (reply.reply.clone(), emotion)
        };

        self.append(Message::assistant(text.clone()));
        self.set_emotion(emotion);

        if let Some(audio) = reply.audio
            && self.voice_enabled
        {
            self.playback.play(audio);
            self.audio_active = true;
        } else {
            self.schedule_idle(self.config.timing.idle_timeout_for_reply(text.chars().count()));
        }
    }

    /// Clear the session: transcript, history, audio, emotion, and rotate
    /// the conversation id so in-flight replies become stale.
    fn reset_session(&mut self) {
        let new_identity = self.identity.rotated();
        let old_identity = std::mem::replace(&mut self.identity, new_identity);
        info!(conv_id = %self.identity.conv_id, "session reset");

        self.pending = None;
        self.transcript.clear();
        self.history.clear();
        self.playback.stop();
        self.audio_active = false;
        let _ = self.events.send(SessionEvent::TranscriptCleared);

        // Transient greeting, then back to rest.
        self.set_emotion(EmotionState::Wave);
        self.schedule_idle(self.config.timing.greeting_duration());

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.reset(&old_identity).await {
                warn!("best-effort gateway reset failed: {e}");
            }
        });
    }

    fn set_voice_enabled(&mut self, enabled: bool) {
        self.voice_enabled = enabled;
        if !enabled {
            self.playback.stop();
            if self.audio_active {
                self.audio_active = false;
                // The stopped playback will never signal `ended`, so bring
                // the avatar back to rest on a short timer instead.
                self.schedule_idle(self.config.timing.error_idle_timeout());
            }
        }
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        if let PlaybackEvent::Failed(reason) = &event {
            warn!("reply audio failed: {reason}");
        }
        self.audio_active = false;
        self.set_emotion(EmotionState::Idle);
    }

    fn handle_idle_timeout(&mut self) {
        self.idle_deadline = None;
        self.set_emotion(EmotionState::Idle);
    }

    fn append(&mut self, message: Message) {
        self.transcript.push(message.clone());
        let _ = self.events.send(SessionEvent::MessageAppended(message));
    }

    /// Change the emotion state, cancelling any scheduled idle transition
    /// so a stale timer cannot clobber the new state.
    fn set_emotion(&mut self, state: EmotionState) {
        self.idle_deadline = None;
        if self.emotion != state {
            self.emotion = state;
            let _ = self.events.send(SessionEvent::EmotionChanged(state));
        }
    }

    fn schedule_idle(&mut self, after: std::time::Duration) {
        self.idle_deadline = Some(tokio::time::Instant::now() + after);
    }
}

fn frustration_reply() -> String {
    FRUSTRATION_REPLIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FRUSTRATION_REPLIES[0])
        .to_owned()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::GatewayConfig;
    use crate::gateway::AudioSource;
    use crate::playback::NullSink;

    fn test_state() -> SessionState {
        let config = ChikoConfig::default();
        let gateway = Arc::new(ReplyGateway::new(&GatewayConfig::default()).unwrap());
        let (turns_tx, _turns_rx) = mpsc::unbounded_channel();
        let (playback_tx, _playback_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        SessionState {
            history: QuestionHistory::new(config.repetition.history_len),
            voice_enabled: config.audio.voice_enabled,
            playback: PlaybackUnit::new(
                Arc::new(NullSink),
                playback_tx,
                std::time::Duration::from_secs(5),
            ),
            config,
            gateway,
            turns_tx,
            events,
            transcript: Vec::new(),
            emotion: EmotionState::Idle,
            identity: ConversationIdentity::new("test-user"),
            pending: None,
            audio_active: false,
            idle_deadline: None,
        }
    }

    fn reply(text: &str, emotion: Option<&str>) -> GatewayReply {
        GatewayReply {
            reply: text.to_owned(),
            emotion: emotion.map(str::to_owned),
            audio: None,
        }
    }

    #[tokio::test]
    async fn blank_submit_is_a_noop() {
        let mut state = test_state();
        state.submit("   ");
        state.submit("");
        assert!(state.transcript.is_empty());
        assert!(state.pending.is_none());
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn second_submit_while_pending_is_rejected() {
        let mut state = test_state();
        state.submit("first question");
        state.submit("second question");
        assert_eq!(state.transcript.len(), 1, "only the first turn is accepted");
        assert_eq!(state.transcript[0], Message::user("first question"));
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn successful_reply_round_trip() {
        let mut state = test_state();
        state.submit("hello");
        let conv_id = state.identity.conv_id.clone();

        state.handle_turn_outcome(TurnOutcome {
            conv_id,
            result: Ok(reply("hi there", Some("wave"))),
        });

        assert_eq!(
            state.transcript,
            vec![Message::user("hello"), Message::assistant("hi there")]
        );
        assert_eq!(state.emotion, EmotionState::Wave);
        assert!(state.pending.is_none());
        assert!(state.idle_deadline.is_some(), "reply schedules idle return");
    }

    #[tokio::test]
    async fn third_identical_question_gets_frustration_reply() {
        let mut state = test_state();

        for _ in 0..2 {
            state.submit("why is the sky blue?");
            let conv_id = state.identity.conv_id.clone();
            state.handle_turn_outcome(TurnOutcome {
                conv_id,
                result: Ok(reply("because of scattering", None)),
            });
        }
        assert_ne!(state.emotion, EmotionState::Angry);

        state.submit("why is the sky blue?");
        assert_eq!(
            state.emotion,
            EmotionState::Angry,
            "optimistic angry before the reply arrives"
        );
        let conv_id = state.identity.conv_id.clone();
        state.handle_turn_outcome(TurnOutcome {
            conv_id,
            result: Ok(reply("because of scattering", Some("talk"))),
        });

        assert_eq!(state.emotion, EmotionState::Angry, "repetition overrides tag");
        let last = state.transcript.last().unwrap();
        assert!(
            FRUSTRATION_REPLIES.contains(&last.content.as_str()),
            "reply replaced by a frustration phrase, got: {}",
            last.content
        );
    }

    #[tokio::test]
    async fn failed_turn_appends_system_message_and_recovers() {
        let mut state = test_state();
        state.submit("hello");
        let conv_id = state.identity.conv_id.clone();

        state.handle_turn_outcome(TurnOutcome {
            conv_id,
            result: Err(ChikoError::Gateway("connection refused".into())),
        });

        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.transcript[1].role, crate::session::messages::Role::System);
        assert!(state.transcript[1].content.contains("connection refused"));
        assert!(state.pending.is_none(), "the in-flight guard clears");
        assert!(state.idle_deadline.is_some());

        state.submit("hello again");
        assert_eq!(state.transcript.len(), 3, "submission works again");
    }

    #[tokio::test]
    async fn stale_reply_after_reset_is_discarded() {
        let mut state = test_state();
        state.submit("hello");
        let old_conv_id = state.identity.conv_id.clone();

        state.reset_session();
        state.handle_turn_outcome(TurnOutcome {
            conv_id: old_conv_id,
            result: Ok(reply("too late", None)),
        });

        assert!(
            state.transcript.is_empty(),
            "stale reply must not touch the new session"
        );
    }

    #[tokio::test]
    async fn reset_clears_everything_and_waves() {
        let mut state = test_state();
        state.submit("hello");
        let conv_id = state.identity.conv_id.clone();
        state.handle_turn_outcome(TurnOutcome {
            conv_id: conv_id.clone(),
            result: Ok(reply("hi", None)),
        });

        let before = state.identity.conv_id.clone();
        state.reset_session();

        assert!(state.transcript.is_empty());
        assert!(state.history.is_empty());
        assert!(state.pending.is_none());
        assert_ne!(state.identity.conv_id, before, "conversation id rotates");
        assert_eq!(state.emotion, EmotionState::Wave, "transient greeting");
        assert!(state.idle_deadline.is_some(), "greeting ends on a timer");

        state.handle_idle_timeout();
        assert_eq!(state.emotion, EmotionState::Idle);
    }

    #[tokio::test]
    async fn voice_disabled_suppresses_playback() {
        let mut state = test_state();
        state.set_voice_enabled(false);
        state.submit("say something");
        let conv_id = state.identity.conv_id.clone();

        state.handle_turn_outcome(TurnOutcome {
            conv_id,
            result: Ok(GatewayReply {
                reply: "with audio".to_owned(),
                emotion: None,
                audio: Some(AudioSource::Url("/voice/x.mp3".to_owned())),
            }),
        });

        assert!(!state.audio_active, "no playback while voice is off");
        assert!(state.idle_deadline.is_some(), "falls back to the idle timer");
    }

    #[tokio::test]
    async fn voice_off_while_playing_schedules_idle_return() {
        let mut state = test_state();
        state.audio_active = true;
        state.emotion = EmotionState::Talk;

        state.set_voice_enabled(false);

        assert!(!state.audio_active);
        assert!(state.idle_deadline.is_some());
        state.handle_idle_timeout();
        assert_eq!(state.emotion, EmotionState::Idle);
    }

    #[tokio::test]
    async fn playback_end_returns_to_idle() {
        let mut state = test_state();
        state.emotion = EmotionState::Talk;
        state.audio_active = true;

        state.handle_playback_event(PlaybackEvent::Ended);

        assert_eq!(state.emotion, EmotionState::Idle);
        assert!(!state.audio_active);
    }

    #[tokio::test]
    async fn playback_failure_also_returns_to_idle() {
        let mut state = test_state();
        state.emotion = EmotionState::Talk;
        state.audio_active = true;

        state.handle_playback_event(PlaybackEvent::Failed("decode error".into()));

        assert_eq!(state.emotion, EmotionState::Idle);
    }

    #[tokio::test]
    async fn manual_emotion_override_cancels_idle_timer() {
        let mut state = test_state();
        state.schedule_idle(std::time::Duration::from_millis(10));

        state.set_emotion(EmotionState::Defeated);

        assert_eq!(state.emotion, EmotionState::Defeated);
        assert!(state.idle_deadline.is_none());
    }

    #[test]
    fn frustration_reply_is_always_from_the_table() {
        for _ in 0..32 {
            assert!(FRUSTRATION_REPLIES.contains(&frustration_reply().as_str()));
        }
    }
}
