//! One form session: a change observer feeding one Reconciliation Engine,
//! plus the collaborators that write into it.
//!
//! The engine sits behind a single async mutex. Every collaborator await
//! (AI call, preference load, audio open) happens outside that lock, so no
//! read-modify-write on a field is split by an await.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detection::dom::DomNode;
use crate::detection::observer::{
    run_observer, ChangeObserver, HostEvent, ObserverSink, ScanBatch, ScanCause, ScanSequencer,
};
use crate::detection::scanner::FieldScanner;
use crate::errors::AppError;
use crate::models::profile::UserProfile;
use crate::models::suggestion::ConfidenceTier;
use crate::preferences::store::PreferenceStore;
use crate::reconcile::engine::{ActionOutcome, AnalysisTicket, PlannedFill, ReconciliationEngine, ScanOutcome};
use crate::reconcile::view::FormView;
use crate::suggestions::requestor::SuggestionRequestor;
use crate::suggestions::service::AiService;
use crate::voice::dictation::{DictationBridge, DictationError};
use crate::voice::interview::{CoachSession, CoachView};
use crate::voice::live::{LiveAudioConnector, SessionEvent};

const HOST_EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Id of the element that roots every scan. `None` scans the whole snapshot.
    pub form_root_id: Option<String>,
    pub scan_debounce: Duration,
    pub autofill_stagger: Duration,
    pub autofill_min_confidence: ConfidenceTier,
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub ai: Arc<dyn AiService>,
    pub preferences: PreferenceStore,
    pub connector: Arc<dyn LiveAudioConnector>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutofillPlan {
    pub threshold: ConfidenceTier,
    pub stagger_ms: u64,
    pub fills: Vec<PlannedFill>,
}

/// The part of a session the observer loop and background tasks share.
struct SessionCore {
    me: Weak<SessionCore>,
    engine: Arc<Mutex<ReconciliationEngine>>,
    profile: RwLock<UserProfile>,
    preferences: PreferenceStore,
    requestor: SuggestionRequestor,
}

impl SessionCore {
    async fn apply_batch(&self, batch: ScanBatch) -> Option<AnalysisTicket> {
        debug!("Applying {:?} scan #{} ({} fields)", batch.cause, batch.seq, batch.fields.len());
        let preferences = self.preferences.load().await;
        let mut engine = self.engine.lock().await;
        match engine.apply_scan(&batch, &preferences) {
            ScanOutcome::Stale => None,
            ScanOutcome::Applied {
                id_set_changed: true,
                ..
            } => engine.begin_analysis(false),
            ScanOutcome::Applied { .. } => None,
        }
    }

    async fn run_analysis(&self, ticket: AnalysisTicket) {
        let profile = self.profile.read().await.clone();
        let map = self.requestor.request(&ticket.fields, &profile).await;
        let outcome = self.engine.lock().await.complete_analysis(&ticket, map);
        debug!("Suggestion round for generation {}: {:?}", ticket.generation, outcome);
    }

    /// Runs the round on its own task so it reaches `complete_analysis`
    /// even when the caller that started it goes away.
    fn spawn_analysis(&self, ticket: AnalysisTicket) -> Option<JoinHandle<()>> {
        let core = self.me.upgrade()?;
        Some(tokio::spawn(async move { core.run_analysis(ticket).await }))
    }
}

#[async_trait]
impl ObserverSink for SessionCore {
    async fn on_scan(&self, batch: ScanBatch) {
        if let Some(ticket) = self.apply_batch(batch).await {
            let _ = self.spawn_analysis(ticket);
        }
    }

    async fn on_focus(&self, field_id: String) {
        self.engine.lock().await.set_focus(&field_id);
    }
}

pub struct FormSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    core: Arc<SessionCore>,
    observer: Arc<std::sync::Mutex<ChangeObserver>>,
    host_events: mpsc::Sender<HostEvent>,
    observer_task: JoinHandle<()>,
    autofill_task: Mutex<Option<JoinHandle<()>>>,
    dictation: DictationBridge,
    coach: CoachSession,
    settings: SessionSettings,
    last_seen: std::sync::Mutex<Instant>,
}

impl FormSession {
    /// Creates the session and starts its observer loop.
    pub fn spawn(deps: &SessionDeps, profile: UserProfile) -> Self {
        let engine = Arc::new(Mutex::new(ReconciliationEngine::new()));
        let core = Arc::new_cyclic(|me| SessionCore {
            me: me.clone(),
            engine: engine.clone(),
            profile: RwLock::new(profile),
            preferences: deps.preferences.clone(),
            requestor: SuggestionRequestor::new(deps.ai.clone()),
        });

        let scanner = FieldScanner::new(deps.settings.form_root_id.clone());
        let observer = Arc::new(std::sync::Mutex::new(ChangeObserver::new(
            scanner,
            Arc::new(ScanSequencer::default()),
        )));

        let (host_events, rx) = mpsc::channel(HOST_EVENT_BUFFER);
        let observer_task = tokio::spawn(run_observer(
            observer.clone(),
            rx,
            deps.settings.scan_debounce,
            core.clone(),
        ));

        let id = Uuid::new_v4();
        info!("Form session {id} created");
        Self {
            id,
            created_at: Utc::now(),
            core,
            observer,
            host_events,
            observer_task,
            autofill_task: Mutex::new(None),
            dictation: DictationBridge::new(engine, deps.connector.clone()),
            coach: CoachSession::new(deps.connector.clone()),
            settings: deps.settings.clone(),
            last_seen: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Records host activity; idle sessions are swept by the registry.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub async fn view(&self) -> FormView {
        self.core.engine.lock().await.view()
    }

    // ── Detection ──────────────────────────────────────────────────────────

    /// Queues a host change notification for the observer loop.
    pub async fn push_event(&self, event: HostEvent) -> Result<(), AppError> {
        self.host_events
            .send(event)
            .await
            .map_err(|_| AppError::Conflict(format!("Session {} is shutting down", self.id)))
    }

    /// Scans immediately, bypassing the debounce. The batch still takes the
    /// next sequence number, so a slower debounced scan cannot overwrite it.
    pub async fn scan_now(&self, snapshot: &DomNode) -> FormView {
        let batch = match self.observer.lock() {
            Ok(mut observer) => observer.rescan(snapshot, ScanCause::Manual),
            Err(poisoned) => poisoned.into_inner().rescan(snapshot, ScanCause::Manual),
        };
        if let Some(batch) = batch {
            self.core.on_scan(batch).await;
        }
        self.view().await
    }

    // ── Suggestions ────────────────────────────────────────────────────────

    /// Runs one suggestion round and waits for it. Returns the current view
    /// unchanged when a round for this field set is already in flight.
    ///
    /// Dropping the returned future (a disconnected client) does not cancel
    /// the round; it still completes and clears the analyzing flag.
    pub async fn analyze(&self, force: bool) -> FormView {
        let ticket = self.core.engine.lock().await.begin_analysis(force);
        if let Some(task) = ticket.and_then(|ticket| self.core.spawn_analysis(ticket)) {
            if let Err(e) = task.await {
                warn!("Suggestion round for session {} did not finish: {e}", self.id);
            }
        }
        self.view().await
    }

    pub async fn profile(&self) -> UserProfile {
        self.core.profile.read().await.clone()
    }

    pub async fn set_profile(&self, profile: UserProfile) {
        *self.core.profile.write().await = profile;
    }

    // ── Field actions ──────────────────────────────────────────────────────

    pub async fn edit(&self, field_id: &str, value: &str) -> Result<FormView, AppError> {
        let mut engine = self.core.engine.lock().await;
        check_known(field_id, engine.edit(field_id, value))?;
        Ok(engine.view())
    }

    pub async fn accept(&self, field_id: &str) -> Result<FormView, AppError> {
        let mut engine = self.core.engine.lock().await;
        check_known(field_id, engine.accept(field_id))?;
        Ok(engine.view())
    }

    pub async fn skip(&self, field_id: &str) -> Result<FormView, AppError> {
        let mut engine = self.core.engine.lock().await;
        check_known(field_id, engine.skip(field_id))?;
        Ok(engine.view())
    }

    /// Persists the field's suggested value to the vault, then accepts it.
    /// A storage failure is logged and the accept still happens. A value the
    /// field cannot take (no matching option) is not stored.
    pub async fn always_use(&self, field_id: &str) -> Result<FormView, AppError> {
        let (label, value) = {
            let engine = self.core.engine.lock().await;
            let field = engine
                .field(field_id)
                .ok_or_else(|| unknown_field(field_id))?;
            let value = engine
                .suggestion(field_id)
                .map(|s| s.value.clone())
                .filter(|value| field.resolve_value(value).is_some());
            (field.label.clone(), value)
        };

        match value {
            Some(value) => {
                if let Err(e) = self.core.preferences.save(field_id, &label, &value).await {
                    warn!("Could not persist always-use value for '{field_id}': {e}");
                }
            }
            None => debug!("No applicable suggestion to remember for '{field_id}'"),
        }
        self.accept(field_id).await
    }

    /// Plans a bulk autofill at the configured threshold and applies it in
    /// form order, one field every `autofill_stagger`, on a background task.
    pub async fn autofill(&self) -> AutofillPlan {
        let threshold = self.settings.autofill_min_confidence;
        let stagger = self.settings.autofill_stagger;
        let fills = self.core.engine.lock().await.autofill_plan(threshold);

        let engine = self.core.engine.clone();
        let steps = fills.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            for (index, fill) in steps.iter().enumerate() {
                tokio::time::sleep_until(started + stagger * index as u32).await;
                let outcome = engine.lock().await.apply_planned(fill);
                if outcome != ActionOutcome::Applied {
                    debug!("Autofill skipped '{}': {:?}", fill.field_id, outcome);
                }
            }
        });
        if let Some(previous) = self.autofill_task.lock().await.replace(task) {
            previous.abort();
        }

        info!("Autofill planned {} fields at {:?} or above", fills.len(), threshold);
        AutofillPlan {
            threshold,
            stagger_ms: stagger.as_millis() as u64,
            fills,
        }
    }

    // ── Dictation ──────────────────────────────────────────────────────────

    pub async fn start_dictation(&self, field_id: &str) -> Result<FormView, AppError> {
        match self.dictation.start(field_id).await {
            Ok(_) => {}
            Err(DictationError::UnknownField(id)) => return Err(unknown_field(&id)),
            Err(e @ DictationError::Refused { .. }) => return Err(AppError::Conflict(e.to_string())),
            Err(DictationError::Audio(e)) => return Err(e.into()),
        }
        Ok(self.view().await)
    }

    pub async fn stop_dictation(&self) -> FormView {
        self.dictation.stop().await;
        self.view().await
    }

    pub async fn relay_transcript(&self, text: String, is_final: bool) -> Result<(), AppError> {
        Ok(self.dictation.relay_transcript(text, is_final).await?)
    }

    pub async fn push_dictation_audio(&self, pcm: Bytes) -> Result<(), AppError> {
        Ok(self.dictation.push_audio(pcm).await?)
    }

    // ── Coaching ───────────────────────────────────────────────────────────

    pub async fn start_coach(&self) -> Result<CoachView, AppError> {
        self.coach.start().await?;
        Ok(self.coach.view().await)
    }

    pub async fn stop_coach(&self) -> CoachView {
        self.coach.stop().await;
        self.coach.view().await
    }

    pub async fn relay_coach_event(&self, event: SessionEvent) -> Result<(), AppError> {
        Ok(self.coach.relay(event).await?)
    }

    pub async fn push_coach_audio(&self, pcm: Bytes) -> Result<(), AppError> {
        Ok(self.coach.push_audio(pcm).await?)
    }

    pub async fn coach_view(&self) -> CoachView {
        self.coach.view().await
    }

    /// Stops every background activity. Pending dictation is committed.
    pub async fn close(&self) {
        self.dictation.stop().await;
        self.coach.stop().await;
        if let Some(task) = self.autofill_task.lock().await.take() {
            task.abort();
        }
        self.observer_task.abort();
        info!("Form session {} closed", self.id);
    }
}

fn unknown_field(field_id: &str) -> AppError {
    AppError::NotFound(format!("Field '{field_id}' not found"))
}

fn check_known(field_id: &str, outcome: ActionOutcome) -> Result<(), AppError> {
    match outcome {
        ActionOutcome::UnknownField => Err(unknown_field(field_id)),
        ActionOutcome::Applied => Ok(()),
        other => {
            debug!("Action on '{field_id}' left state unchanged: {other:?}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::field::SelectOption;
    use crate::models::suggestion::{SuggestionMap, SuggestionRecord};
    use crate::preferences::kv::{KeyValueStore, MemoryStore};
    use crate::preferences::store::PREFERENCES_KEY;
    use crate::reconcile::state::FieldStatus;
    use crate::suggestions::requestor::testing::FakeAi;
    use crate::voice::live::RelayConnector;

    fn settings() -> SessionSettings {
        SessionSettings {
            form_root_id: Some("applywise-form".to_string()),
            scan_debounce: Duration::from_millis(1000),
            autofill_stagger: Duration::from_millis(400),
            autofill_min_confidence: ConfidenceTier::High,
        }
    }

    fn deps_with(ai: Arc<FakeAi>, kv: Arc<MemoryStore>) -> SessionDeps {
        SessionDeps {
            ai,
            preferences: PreferenceStore::new(kv),
            connector: Arc::new(RelayConnector),
            settings: settings(),
        }
    }

    fn form(ids: &[&str]) -> DomNode {
        let mut root = DomNode::element("form").with_attr("id", "applywise-form");
        for id in ids {
            root = root
                .with_child(DomNode::element("label").with_attr("for", id).with_text(&id.replace('-', " ")))
                .with_child(DomNode::element("input").with_attr("id", id).with_attr("type", "text"));
        }
        DomNode::element("body").with_child(root)
    }

    fn record(id: &str, value: &str, tier: ConfidenceTier) -> (String, SuggestionRecord) {
        (
            id.to_string(),
            SuggestionRecord {
                field_id: id.to_string(),
                value: value.to_string(),
                confidence_tier: tier,
                provenance_label: "Personal Info".to_string(),
                rationale: "From the profile.".to_string(),
                evidence_excerpt: value.to_string(),
            },
        )
    }

    fn map(records: Vec<(String, SuggestionRecord)>) -> SuggestionMap {
        records.into_iter().collect::<HashMap<_, _>>()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_scan_applies_preferences_before_suggestions() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(PREFERENCES_KEY, r#"{"email":"alex@vault.com"}"#).await.unwrap();
        let ai = Arc::new(FakeAi::with_replies(vec![Some(map(vec![record(
            "email",
            "other@x.com",
            ConfidenceTier::High,
        )]))]));
        let session = FormSession::spawn(&deps_with(ai, kv), UserProfile::demo());

        let view = session.scan_now(&form(&["email", "phone"])).await;
        let email = view.field("email").unwrap();
        assert_eq!(email.value, "alex@vault.com");
        assert_eq!(email.status, FieldStatus::Accepted);
        session.close().await;
    }

    #[tokio::test]
    async fn test_new_field_set_schedules_one_request() {
        let ai = Arc::new(FakeAi::with_replies(vec![Some(map(vec![record(
            "email",
            "alex@x.com",
            ConfidenceTier::High,
        )]))]));
        let session = FormSession::spawn(&deps_with(ai.clone(), Arc::new(MemoryStore::new())), UserProfile::demo());

        session.scan_now(&form(&["email"])).await;
        session.scan_now(&form(&["email"])).await;
        settle().await;

        assert_eq!(ai.call_count(), 1);
        let view = session.view().await;
        assert!(!view.analyzing);
        assert_eq!(view.field("email").unwrap().status, FieldStatus::AiSuggested);
        session.close().await;
    }

    #[tokio::test]
    async fn test_failing_backend_keeps_filled_fields() {
        let ai = Arc::new(FakeAi::failing());
        let session = FormSession::spawn(&deps_with(ai, Arc::new(MemoryStore::new())), UserProfile::demo());
        session.scan_now(&form(&["email", "phone"])).await;
        settle().await;
        session.edit("email", "me@x.com").await.unwrap();

        let view = session.analyze(true).await;
        assert!(!view.analyzing);
        assert!(view.field("email").unwrap().is_filled);
        assert!(view.field("phone").unwrap().suggestion.is_none());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_analyze_still_clears_analyzing() {
        let ai = Arc::new(
            FakeAi::with_replies(vec![
                Some(SuggestionMap::new()),
                Some(map(vec![record("email", "alex@x.com", ConfidenceTier::High)])),
            ])
            .with_latency(Duration::from_secs(5)),
        );
        let session = FormSession::spawn(&deps_with(ai.clone(), Arc::new(MemoryStore::new())), UserProfile::demo());
        session.scan_now(&form(&["email"])).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ai.call_count(), 1);

        let dropped = tokio::time::timeout(Duration::from_millis(100), session.analyze(true)).await;
        assert!(dropped.is_err());
        assert!(session.view().await.analyzing);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        let view = session.view().await;
        assert!(!view.analyzing);
        assert_eq!(view.field("email").unwrap().status, FieldStatus::AiSuggested);

        session.analyze(true).await;
        assert_eq!(ai.call_count(), 3);
        session.close().await;
    }

    #[tokio::test]
    async fn test_always_use_persists_then_accepts() {
        let kv = Arc::new(MemoryStore::new());
        let ai = Arc::new(FakeAi::with_replies(vec![Some(map(vec![record(
            "work-email",
            "alex@x.com",
            ConfidenceTier::Medium,
        )]))]));
        let deps = deps_with(ai, kv);
        let session = FormSession::spawn(&deps, UserProfile::demo());
        session.scan_now(&form(&["work-email"])).await;
        settle().await;

        let view = session.always_use("work-email").await.unwrap();
        assert_eq!(view.field("work-email").unwrap().value, "alex@x.com");
        let stored = deps.preferences.entries().await;
        assert_eq!(stored.get("work-email").map(String::as_str), Some("alex@x.com"));
        assert_eq!(stored.get("work email").map(String::as_str), Some("alex@x.com"));
        session.close().await;
    }

    #[tokio::test]
    async fn test_always_use_skips_value_no_option_matches() {
        let kv = Arc::new(MemoryStore::new());
        let ai = Arc::new(FakeAi::with_replies(vec![Some(map(vec![record(
            "years-react",
            "Ten plus",
            ConfidenceTier::High,
        )]))]));
        let deps = deps_with(ai, kv);
        let session = FormSession::spawn(&deps, UserProfile::demo());
        let mut select = DomNode::element("select").with_attr("id", "years-react");
        select.options = vec![
            SelectOption {
                value: "1-3".to_string(),
                text: "1-3 years".to_string(),
            },
            SelectOption {
                value: "4+".to_string(),
                text: "4+ years".to_string(),
            },
        ];
        let snapshot = DomNode::element("body")
            .with_child(DomNode::element("form").with_attr("id", "applywise-form").with_child(select));
        session.scan_now(&snapshot).await;
        settle().await;

        let view = session.always_use("years-react").await.unwrap();
        assert!(!view.field("years-react").unwrap().is_filled);
        assert!(deps.preferences.entries().await.is_empty());
        session.close().await;
    }

    #[tokio::test]
    async fn test_unknown_field_action_is_not_found() {
        let session = FormSession::spawn(
            &deps_with(Arc::new(FakeAi::default()), Arc::new(MemoryStore::new())),
            UserProfile::demo(),
        );
        assert!(matches!(session.accept("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(session.always_use("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(session.start_dictation("nope").await, Err(AppError::NotFound(_))));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_autofill_staggers_high_confidence_fills() {
        let ai = Arc::new(FakeAi::with_replies(vec![Some(map(vec![
            record("f1", "one", ConfidenceTier::High),
            record("f2", "two", ConfidenceTier::Medium),
            record("f3", "three", ConfidenceTier::High),
        ]))]));
        let session = FormSession::spawn(&deps_with(ai, Arc::new(MemoryStore::new())), UserProfile::demo());
        session.scan_now(&form(&["f1", "f2", "f3"])).await;
        settle().await;

        let plan = session.autofill().await;
        let ids: Vec<&str> = plan.fills.iter().map(|f| f.field_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f3"]);

        settle().await;
        let view = session.view().await;
        assert!(view.field("f1").unwrap().is_filled);
        assert!(!view.field("f3").unwrap().is_filled, "second fill waits one stagger");

        tokio::time::sleep(Duration::from_millis(450)).await;
        let view = session.view().await;
        assert!(view.field("f3").unwrap().is_filled);
        assert!(!view.field("f2").unwrap().is_filled);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_mutations_reach_engine() {
        let session = FormSession::spawn(
            &deps_with(Arc::new(FakeAi::default()), Arc::new(MemoryStore::new())),
            UserProfile::demo(),
        );
        session
            .push_event(HostEvent::Mutation {
                snapshot: form(&["email"]),
                added: 2,
                removed: 0,
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(session.view().await.total_fields, 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(session.view().await.total_fields, 1);

        session
            .push_event(HostEvent::Focus {
                field_id: "email".to_string(),
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(session.view().await.focused_field.as_deref(), Some("email"));
        session.close().await;
    }

    #[tokio::test]
    async fn test_dictation_through_session() {
        let session = FormSession::spawn(
            &deps_with(Arc::new(FakeAi::default()), Arc::new(MemoryStore::new())),
            UserProfile::demo(),
        );
        session.scan_now(&form(&["why-us"])).await;
        session.start_dictation("why-us").await.unwrap();
        session.relay_transcript("Because of the mission".to_string(), true).await.unwrap();
        let view = session.stop_dictation().await;
        assert_eq!(view.field("why-us").unwrap().value, "Because of the mission");
        assert!(matches!(
            session.relay_transcript("late".to_string(), true).await,
            Err(AppError::Audio(_))
        ));
        session.close().await;
    }
}
