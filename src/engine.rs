//! The conversation engine — the state machine driving every multi-step
//! flow (registration, report submission, event browsing).
//!
//! One entry point, `handle_update`: given the stored conversation and an
//! inbound update, decide the next state, any backend side effects, and
//! the reply. A validation failure never mutates state; a backend failure
//! never advances the phase, so already-entered data survives a retry.
//! Cancellation is handled before any phase logic and always wins.

use qalabot_core::{
    traits::{BackendApi, NewReport, PhotoStorage},
    update::{Button, Reply, Update},
    validate::{self, Rejection, ReportCategory},
};
use qalabot_session::{Conversation, Draft, Phase, RegistrationDraft, ReportDraft, SessionStore};
use std::sync::Arc;
use tracing::{error, info, warn};

const HELP_TEXT: &str = "I can help you improve your city.\n\n\
    /report — report a city problem (garbage, road damage, lighting...)\n\
    /register — register with your name and phone number\n\
    /events — browse community events\n\
    /cancel — cancel whatever we were doing";

const FLOW_IN_PROGRESS: &str =
    "We're in the middle of something. Finish this step, or send /cancel to start over.";

const CANCELLED: &str = "Cancelled. Send /report, /register, or /events whenever you're ready.";
const NOTHING_TO_CANCEL: &str = "Nothing to cancel. Send /help to see what I can do.";

const ASK_NAME: &str = "Let's get you registered. What is your name? (first and last name)";
const ASK_PHONE: &str = "Thanks! Now send me your phone number (for example +7 705 123 45 67).";
const ASK_CATEGORY: &str = "What kind of problem are you reporting?";
const ASK_DESCRIPTION: &str = "Got it. Describe the problem in a sentence or two.";
const ASK_LOCATION: &str =
    "Where is it? Attach a location (paperclip menu > Location) so crews can find it.";
const ASK_PHOTO: &str =
    "Almost done. Send a photo of the problem, or type \"skip\" if you don't have one.";

const REGISTRATION_FAILED: &str =
    "Registration didn't go through. Your details are saved — send the phone number again to retry.";
const SUBMIT_FAILED: &str =
    "Submitting your report didn't go through. Nothing was lost — send the photo again or type \"skip\" to retry.";
const PHOTO_FAILED: &str =
    "I couldn't save that photo. Send it again, or type \"skip\" to submit without one.";
const EVENTS_FAILED: &str = "I couldn't fetch the events right now. Try /events again in a bit.";
const JOIN_FAILED: &str = "Joining didn't go through. Tap the button again to retry.";
const NO_EVENTS: &str = "No upcoming events right now. Check back later!";
const PICK_EVENT: &str = "Tap an event to see more.";
const STATE_RESET: &str =
    "Something went wrong on my side, so I've reset our conversation. Sorry about that — \
     send /report or /register to start again.";

/// Commands a user can issue. Only a message that is exactly one token
/// (optionally slash-prefixed) counts, so free text like "report broken
/// lamp" flows into the current step instead of being eaten as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Register,
    Report,
    Events,
    Cancel,
    Help,
}

impl Command {
    fn parse(text: &str) -> Option<Command> {
        let trimmed = text.trim();
        let mut words = trimmed.split_whitespace();
        let word = words.next()?;
        if words.next().is_some() {
            return None;
        }

        let word = word.strip_prefix('/').unwrap_or(word);
        // Telegram group syntax: /report@qalabot
        let word = word.split('@').next().unwrap_or(word);

        match word.to_lowercase().as_str() {
            "register" => Some(Command::Register),
            "report" => Some(Command::Report),
            "events" => Some(Command::Events),
            "cancel" => Some(Command::Cancel),
            "help" | "start" => Some(Command::Help),
            _ => None,
        }
    }
}

/// The conversation state machine.
///
/// Holds the session store and the two collaborators a step can block on.
/// Callers (the gateway's per-user workers) must invoke `handle_update`
/// for a given transport identity strictly sequentially.
pub struct Engine {
    store: SessionStore,
    backend: Arc<dyn BackendApi>,
    photos: Arc<dyn PhotoStorage>,
}

impl Engine {
    pub fn new(
        store: SessionStore,
        backend: Arc<dyn BackendApi>,
        photos: Arc<dyn PhotoStorage>,
    ) -> Self {
        Self {
            store,
            backend,
            photos,
        }
    }

    /// Process one inbound update and produce the reply.
    pub async fn handle_update(&self, update: &Update) -> Reply {
        let command = update.text.as_deref().and_then(Command::parse);

        // Cancellation always wins, regardless of phase or validation.
        if command == Some(Command::Cancel) {
            return self.cancel(update);
        }

        // Absent is treated as Idle. Nothing is persisted here; an entry
        // appears only once a transition actually stores a phase or draft,
        // so help text and stray chatter never allocate session state.
        let conv = self
            .store
            .get(&update.transport_id)
            .unwrap_or_else(|| Conversation::idle(update.transport_id.as_str()));

        // Any other command mid-flow is blocked rather than silently
        // abandoning the data already typed in.
        if conv.phase.in_flow() && command.is_some() {
            return Reply::text_to(update, FLOW_IN_PROGRESS);
        }

        match conv.phase {
            Phase::Idle => self.idle(update, conv, command).await,
            Phase::AwaitingRegistrationName => self.registration_name(update, conv),
            Phase::AwaitingRegistrationPhone => self.registration_phone(update, conv).await,
            Phase::AwaitingReportCategory => self.report_category(update, conv),
            Phase::AwaitingReportDescription => self.report_description(update, conv),
            Phase::AwaitingReportLocation => self.report_location(update, conv),
            Phase::AwaitingReportPhoto => self.report_photo(update, conv).await,
            Phase::BrowsingEvents => self.browsing_events(update, conv),
            Phase::AwaitingEventSubscription => self.event_subscription(update, conv).await,
        }
    }

    fn cancel(&self, update: &Update) -> Reply {
        match self.store.get(&update.transport_id) {
            Some(mut conv) if conv.phase.in_flow() => {
                info!("{}: flow cancelled in {:?}", update.transport_id, conv.phase);
                conv.reset();
                self.store.set(&update.transport_id, conv);
                Reply::text_to(update, CANCELLED)
            }
            _ => Reply::text_to(update, NOTHING_TO_CANCEL),
        }
    }

    async fn idle(&self, update: &Update, mut conv: Conversation, command: Option<Command>) -> Reply {
        match command {
            Some(Command::Register) => {
                conv.phase = Phase::AwaitingRegistrationName;
                conv.draft = Draft::Registration(RegistrationDraft::default());
                self.store.set(&update.transport_id, conv);
                Reply::text_to(update, ASK_NAME)
            }
            Some(Command::Report) => {
                conv.phase = Phase::AwaitingReportCategory;
                conv.draft = Draft::Report(ReportDraft::default());
                self.store.set(&update.transport_id, conv);
                Reply::with_buttons(update, ASK_CATEGORY, category_buttons())
            }
            Some(Command::Events) => match self.backend.list_events().await {
                Ok(events) if events.is_empty() => Reply::text_to(update, NO_EVENTS),
                Ok(events) => {
                    conv.phase = Phase::BrowsingEvents;
                    self.store.set(&update.transport_id, conv);
                    let buttons = events
                        .iter()
                        .map(|e| Button {
                            label: e.title.clone(),
                            payload: format!("event:{}", e.id),
                        })
                        .collect();
                    Reply::with_buttons(update, PICK_EVENT, buttons)
                }
                Err(e) => {
                    warn!("{}: list_events failed: {e}", update.transport_id);
                    Reply::text_to(update, EVENTS_FAILED)
                }
            },
            // Help, unknown text, stale button presses: explain ourselves.
            _ => Reply::text_to(update, HELP_TEXT),
        }
    }

    fn registration_name(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Registration(mut draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        let text = match update.text.as_deref().map(validate::non_empty_text) {
            Some(Ok(text)) => text,
            _ => return Reply::text_to(update, rejection_prompt(Rejection::EmptyText)),
        };

        let mut parts = text.split_whitespace();
        draft.first_name = parts.next().map(str::to_string);
        let rest = parts.collect::<Vec<_>>().join(" ");
        draft.last_name = if rest.is_empty() { None } else { Some(rest) };

        conv.draft = Draft::Registration(draft);
        conv.phase = Phase::AwaitingRegistrationPhone;
        self.store.set(&update.transport_id, conv);
        Reply::text_to(update, ASK_PHONE)
    }

    async fn registration_phone(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Registration(draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        let phone = match update.text.as_deref().map(validate::phone_number) {
            Some(Ok(phone)) => phone,
            _ => return Reply::text_to(update, rejection_prompt(Rejection::InvalidPhone)),
        };

        let Some(first_name) = draft.first_name.clone() else {
            return self.recover(update, conv);
        };
        let last_name = draft.last_name.clone().unwrap_or_default();

        match self.backend.register(&first_name, &last_name, &phone).await {
            Ok(user_id) => {
                info!("{}: registered as backend user {user_id}", update.transport_id);
                conv.domain_user_id = Some(user_id);
                conv.reset();
                self.store.set(&update.transport_id, conv);
                Reply::text_to(
                    update,
                    format!("You're registered, {first_name}! Send /report to report a problem."),
                )
            }
            Err(e) => {
                warn!("{}: register failed: {e}", update.transport_id);
                Reply::text_to(update, REGISTRATION_FAILED)
            }
        }
    }

    fn report_category(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Report(mut draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        let input = update.callback.as_deref().or(update.text.as_deref());
        let category = match input.map(validate::category) {
            Some(Ok(category)) => category,
            _ => {
                return Reply::with_buttons(
                    update,
                    rejection_prompt(Rejection::UnknownCategory),
                    category_buttons(),
                )
            }
        };

        draft.category = Some(category);
        conv.draft = Draft::Report(draft);
        conv.phase = Phase::AwaitingReportDescription;
        self.store.set(&update.transport_id, conv);
        Reply::text_to(update, ASK_DESCRIPTION)
    }

    fn report_description(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Report(mut draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        let description = match update.text.as_deref().map(validate::non_empty_text) {
            Some(Ok(text)) => text,
            _ => return Reply::text_to(update, rejection_prompt(Rejection::EmptyText)),
        };

        draft.description = Some(description);
        conv.draft = Draft::Report(draft);
        conv.phase = Phase::AwaitingReportLocation;
        self.store.set(&update.transport_id, conv);
        Reply::text_to(update, ASK_LOCATION)
    }

    fn report_location(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Report(mut draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        let Some(location) = update.location else {
            return Reply::text_to(update, rejection_prompt(Rejection::ExpectedLocation));
        };
        let (latitude, longitude) =
            match validate::coordinates(location.latitude, location.longitude) {
                Ok(coords) => coords,
                Err(rejection) => return Reply::text_to(update, rejection_prompt(rejection)),
            };

        draft.latitude = Some(latitude);
        draft.longitude = Some(longitude);
        conv.draft = Draft::Report(draft);
        conv.phase = Phase::AwaitingReportPhoto;
        self.store.set(&update.transport_id, conv);
        Reply::text_to(update, ASK_PHOTO)
    }

    async fn report_photo(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Draft::Report(mut draft) = conv.draft.clone() else {
            return self.recover(update, conv);
        };

        if let Some(photo) = &update.photo {
            match self.photos.store(&photo.url).await {
                Ok(url) => {
                    // Persist the durable URL before submitting, so a failed
                    // submission does not force the user to resend the photo.
                    draft.photo_url = Some(url);
                    conv.draft = Draft::Report(draft.clone());
                    self.store.set(&update.transport_id, conv.clone());
                    self.submit_report(update, conv, draft).await
                }
                Err(e) => {
                    warn!("{}: photo store failed: {e}", update.transport_id);
                    Reply::text_to(update, PHOTO_FAILED)
                }
            }
        } else if update.text.as_deref().is_some_and(validate::is_skip) {
            self.submit_report(update, conv, draft).await
        } else {
            Reply::text_to(update, rejection_prompt(Rejection::ExpectedPhotoOrSkip))
        }
    }

    /// Submit a completed report draft. On backend failure the stored
    /// state is left exactly as it was, so the user can retry the step.
    async fn submit_report(
        &self,
        update: &Update,
        mut conv: Conversation,
        draft: ReportDraft,
    ) -> Reply {
        let (Some(category), Some(description), Some(latitude), Some(longitude)) = (
            draft.category,
            draft.description.clone(),
            draft.latitude,
            draft.longitude,
        ) else {
            return self.recover(update, conv);
        };

        let report = NewReport {
            category,
            description,
            latitude,
            longitude,
            photo_url: draft.photo_url.clone(),
            address: draft.address.clone(),
            user_id: conv.domain_user_id,
        };

        match self.backend.create_report(&report).await {
            Ok(report_id) => {
                info!("{}: report {report_id} submitted", update.transport_id);
                conv.reset();
                self.store.set(&update.transport_id, conv);
                Reply::text_to(
                    update,
                    format!(
                        "Report #{report_id} submitted — {}. Thank you! \
                         We'll pass it to the district crew.",
                        category.label()
                    ),
                )
            }
            Err(e) => {
                warn!("{}: create_report failed: {e}", update.transport_id);
                Reply::text_to(update, SUBMIT_FAILED)
            }
        }
    }

    fn browsing_events(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Some(event_id) = payload_id(update.callback.as_deref(), "event:") else {
            return Reply::text_to(update, "Tap one of the event buttons, or /cancel.");
        };

        conv.phase = Phase::AwaitingEventSubscription;
        self.store.set(&update.transport_id, conv);
        Reply::with_buttons(
            update,
            "Want to join this event?",
            vec![Button {
                label: "Join".into(),
                payload: format!("join:{event_id}"),
            }],
        )
    }

    async fn event_subscription(&self, update: &Update, mut conv: Conversation) -> Reply {
        let Some(event_id) = payload_id(update.callback.as_deref(), "join:") else {
            return Reply::text_to(update, "Tap Join to confirm, or /cancel.");
        };

        match self.backend.join_event(conv.domain_user_id, event_id).await {
            Ok(()) => {
                info!("{}: joined event {event_id}", update.transport_id);
                conv.reset();
                self.store.set(&update.transport_id, conv);
                Reply::text_to(update, "You're in! See you there.")
            }
            Err(e) => {
                warn!("{}: join_event failed: {e}", update.transport_id);
                Reply::text_to(update, JOIN_FAILED)
            }
        }
    }

    /// Defensive reset: the stored draft kind does not match the phase.
    /// Unreachable through the transition table; never crashes the user.
    fn recover(&self, update: &Update, mut conv: Conversation) -> Reply {
        error!(
            "{}: draft inconsistent with phase {:?}, resetting",
            update.transport_id, conv.phase
        );
        conv.reset();
        self.store.set(&update.transport_id, conv);
        Reply::text_to(update, STATE_RESET)
    }
}

/// One button per report category, in display order.
fn category_buttons() -> Vec<Button> {
    ReportCategory::ALL
        .iter()
        .map(|c| Button {
            label: c.label().to_string(),
            payload: c.payload(),
        })
        .collect()
}

/// Extract the numeric id from a `<prefix><id>` callback payload.
fn payload_id(payload: Option<&str>, prefix: &str) -> Option<i64> {
    payload?.strip_prefix(prefix)?.parse().ok()
}

/// The re-prompt for a rejected input.
fn rejection_prompt(rejection: Rejection) -> &'static str {
    match rejection {
        Rejection::EmptyText => "I need a bit of text for that. Try again?",
        Rejection::InvalidPhone => {
            "That doesn't look like a phone number. Send it like +7 705 123 45 67."
        }
        Rejection::UnknownCategory => "Please pick one of the categories below.",
        Rejection::OutOfRangeCoordinates => {
            "Those coordinates don't look right. Attach the location again?"
        }
        Rejection::ExpectedLocation => {
            "I need a location attachment for this step (paperclip menu > Location)."
        }
        Rejection::ExpectedPhotoOrSkip => {
            "Send a photo of the problem, or type \"skip\" to submit without one."
        }
    }
}
