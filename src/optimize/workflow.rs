use crate::config::config::OptimizeCfg;
use crate::fetch::error::FetchError;
use crate::optimize::types::{
    ConfidenceTier, DecisionLog, Suggestion, SuggestionDecision, SuggestionState, TrialDelta,
    TrialRequest, TrialResult,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
    #[error("no suggestions selected")]
    EmptySelection,
    #[error("no apply is waiting for confirmation")]
    NotConfirming,
    #[error("an apply is already in flight")]
    ApplyInFlight,
    #[error("selection changed since apply was requested, request it again")]
    StaleConfirmation,
    #[error("dismissal of `{0}` is already in flight")]
    DismissInFlight(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Identifies one outstanding backend call. Completions carrying a ticket
/// that is no longer current are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Ticket(u64);

/// Batch frozen by `request_apply`, committed by `confirm_apply`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingApply {
    pub settings: BTreeMap<String, Value>,
    /// Live values the batch replaces, as listed when it was frozen.
    pub replaced: BTreeMap<String, Value>,
    #[serde(skip)]
    selection_rev: u64,
}

/// Result of folding a commit outcome back into the workflow.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    /// Ticket was not the outstanding commit; nothing changed.
    Superseded,
    /// Commit landed. One `accepted` entry per committed setting.
    Committed(Vec<DecisionLog>),
}

#[derive(Clone, Debug, PartialEq)]
enum Phase {
    Idle,
    Confirming(PendingApply),
    Applying { ticket: Ticket, batch: PendingApply },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ApplyPhase {
    Idle,
    Confirming,
    Applying,
}

/// Latest trial plus the one before it, for delta display.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrialState {
    pub current: Option<TrialResult>,
    pub previous: Option<TrialResult>,
    /// Settings `current` was evaluated with.
    pub evaluated: BTreeMap<String, Value>,
}

impl TrialState {
    pub fn delta(&self) -> Option<TrialDelta> {
        let current = self.current.as_ref()?;
        let previous = self.previous.as_ref()?;
        Some(TrialDelta::between(&current.metrics, &previous.metrics))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuggestionView {
    pub suggestion: Suggestion,
    pub state: SuggestionState,
    pub tier: ConfidenceTier,
    pub custom_value: Option<Value>,
}

/// Render-ready state of the optimize panel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizeView {
    pub suggestions: Vec<SuggestionView>,
    pub phase: ApplyPhase,
    pub pending: Option<BTreeMap<String, Value>>,
    pub trial: TrialState,
    pub delta: Option<TrialDelta>,
    pub loading: bool,
}

/// Suggestion list, selection, trial and apply state for one view.
///
/// Holds no I/O. Every backend interaction is split into a `begin_*` that
/// hands out a ticket and a `complete_*` that folds the outcome back in.
pub struct OptimizeWorkflow {
    cfg: OptimizeCfg,
    suggestions: Vec<Suggestion>,
    selection: BTreeSet<String>,
    overrides: BTreeMap<String, Value>,
    phase: Phase,
    trial: TrialState,
    settled: BTreeMap<String, SuggestionState>,
    next_ticket: u64,
    reload_ticket: Option<Ticket>,
    reload_deferred: bool,
    trial_ticket: Option<(Ticket, BTreeMap<String, Value>)>,
    dismissals: BTreeMap<String, Ticket>,
    selection_rev: u64,
    loaded_once: bool,
}

impl OptimizeWorkflow {
    pub fn new(cfg: OptimizeCfg) -> Self {
        Self {
            cfg,
            suggestions: Vec::new(),
            selection: BTreeSet::new(),
            overrides: BTreeMap::new(),
            phase: Phase::Idle,
            trial: TrialState::default(),
            settled: BTreeMap::new(),
            next_ticket: 0,
            reload_ticket: None,
            reload_deferred: false,
            trial_ticket: None,
            dismissals: BTreeMap::new(),
            selection_rev: 0,
            loaded_once: false,
        }
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn selection(&self) -> &BTreeSet<String> {
        &self.selection
    }

    pub fn trial(&self) -> &TrialState {
        &self.trial
    }

    pub fn phase(&self) -> ApplyPhase {
        match self.phase {
            Phase::Idle => ApplyPhase::Idle,
            Phase::Confirming(_) => ApplyPhase::Confirming,
            Phase::Applying { .. } => ApplyPhase::Applying,
        }
    }

    fn issue(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn find(&self, name: &str) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.setting_name == name)
    }

    fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn require(&self, name: &str) -> Result<(), WorkflowError> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(WorkflowError::UnknownSetting(name.to_string()))
        }
    }

    fn ensure_not_applying(&self) -> Result<(), WorkflowError> {
        match self.phase {
            Phase::Applying { .. } => Err(WorkflowError::ApplyInFlight),
            _ => Ok(()),
        }
    }

    /// Any change to what would be committed voids a pending confirmation.
    fn selection_edited(&mut self) {
        self.selection_rev += 1;
        if matches!(self.phase, Phase::Confirming(_)) {
            self.phase = Phase::Idle;
            info!("selection changed, pending apply cancelled");
        }
    }

    /// Drop selection entries and custom values for suggestions that are gone.
    fn prune(&mut self) {
        let stale: Vec<String> = self
            .selection
            .iter()
            .filter(|k| !self.contains(k))
            .cloned()
            .collect();
        for key in &stale {
            warn!(setting = %key, "selection referenced a missing suggestion, pruned");
            self.selection.remove(key);
        }

        let names: BTreeSet<&str> = self
            .suggestions
            .iter()
            .map(|s| s.setting_name.as_str())
            .collect();
        self.overrides.retain(|k, _| names.contains(k.as_str()));

        if !stale.is_empty() {
            self.selection_edited();
        }
    }

    // ---------- loading ----------

    pub fn begin_reload(&mut self) -> Ticket {
        let ticket = self.issue();
        self.reload_ticket = Some(ticket);
        ticket
    }

    pub fn is_loading(&self) -> bool {
        self.reload_ticket.is_some()
    }

    /// Returns `Ok(false)` when the result was superseded and dropped.
    ///
    /// A list landing while a commit is in flight is dropped too, and a fresh
    /// load is owed once the commit settles (see `take_deferred_reload`).
    pub fn complete_reload(
        &mut self,
        ticket: Ticket,
        outcome: Result<Vec<Suggestion>, FetchError>,
    ) -> Result<bool, WorkflowError> {
        if self.reload_ticket != Some(ticket) {
            debug!(?ticket, "superseded suggestion load discarded");
            return Ok(false);
        }
        self.reload_ticket = None;
        if matches!(self.phase, Phase::Applying { .. }) {
            self.reload_deferred = true;
            debug!(?ticket, "suggestion load landed mid-commit, deferred");
            return Ok(false);
        }
        let incoming = outcome?;

        // one entry per setting, last one wins
        let mut seen = BTreeSet::new();
        let mut list: Vec<Suggestion> = incoming
            .into_iter()
            .rev()
            .filter(|s| seen.insert(s.setting_name.clone()))
            .collect();
        list.reverse();

        for s in &list {
            self.settled.remove(&s.setting_name);
        }
        self.suggestions = list;

        if self.loaded_once {
            self.prune();
        } else {
            self.loaded_once = true;
            let threshold = self.cfg.preselect_threshold;
            self.selection = self
                .suggestions
                .iter()
                .filter(|s| s.confidence >= threshold)
                .map(|s| s.setting_name.clone())
                .collect();
            self.selection_rev += 1;
            info!(
                loaded = self.suggestions.len(),
                preselected = self.selection.len(),
                "suggestions loaded"
            );
        }
        Ok(true)
    }

    /// Whether a suggestion load is owed now that no commit is in flight.
    /// Clears the debt.
    pub fn take_deferred_reload(&mut self) -> bool {
        if matches!(self.phase, Phase::Applying { .. }) {
            return false;
        }
        std::mem::take(&mut self.reload_deferred)
    }

    // ---------- selection ----------

    /// Flip one suggestion in or out of the selection. Returns whether it is
    /// selected afterwards.
    pub fn toggle(&mut self, name: &str) -> Result<bool, WorkflowError> {
        self.ensure_not_applying()?;
        self.require(name)?;
        let selected = if self.selection.remove(name) {
            false
        } else {
            self.selection.insert(name.to_string());
            true
        };
        self.selection_edited();
        Ok(selected)
    }

    pub fn select_all(&mut self) -> Result<(), WorkflowError> {
        self.ensure_not_applying()?;
        let all: BTreeSet<String> = self
            .suggestions
            .iter()
            .map(|s| s.setting_name.clone())
            .collect();
        if all != self.selection {
            self.selection = all;
            self.selection_edited();
        }
        Ok(())
    }

    pub fn select_none(&mut self) -> Result<(), WorkflowError> {
        self.ensure_not_applying()?;
        if !self.selection.is_empty() {
            self.selection.clear();
            self.selection_edited();
        }
        Ok(())
    }

    /// Operator-supplied value used instead of the suggested one.
    pub fn set_custom_value(&mut self, name: &str, value: Value) -> Result<(), WorkflowError> {
        self.ensure_not_applying()?;
        self.require(name)?;
        self.overrides.insert(name.to_string(), value);
        self.selection_edited();
        Ok(())
    }

    pub fn clear_custom_value(&mut self, name: &str) -> Result<(), WorkflowError> {
        self.ensure_not_applying()?;
        self.require(name)?;
        if self.overrides.remove(name).is_some() {
            self.selection_edited();
        }
        Ok(())
    }

    /// Values that a trial or commit would send right now.
    pub fn effective_settings(&self) -> BTreeMap<String, Value> {
        self.suggestions
            .iter()
            .filter(|s| self.selection.contains(&s.setting_name))
            .map(|s| {
                let value = self
                    .overrides
                    .get(&s.setting_name)
                    .cloned()
                    .unwrap_or_else(|| s.suggested_value.clone());
                (s.setting_name.clone(), value)
            })
            .collect()
    }

    // ---------- trial ----------

    pub fn begin_trial(&mut self) -> Result<(Ticket, TrialRequest), WorkflowError> {
        let settings = self.effective_settings();
        if settings.is_empty() {
            return Err(WorkflowError::EmptySelection);
        }
        let is_custom = settings.keys().any(|k| self.overrides.contains_key(k));
        let ticket = self.issue();
        self.trial_ticket = Some((ticket, settings.clone()));
        Ok((
            ticket,
            TrialRequest {
                settings,
                lookback_days: self.cfg.lookback_days,
                is_custom,
            },
        ))
    }

    /// A failed trial leaves the previous results in place.
    pub fn complete_trial(
        &mut self,
        ticket: Ticket,
        outcome: Result<TrialResult, FetchError>,
    ) -> Result<bool, WorkflowError> {
        let evaluated = match self.trial_ticket.take() {
            Some((t, settings)) if t == ticket => settings,
            other => {
                self.trial_ticket = other;
                debug!(?ticket, "superseded trial result discarded");
                return Ok(false);
            }
        };
        let result = outcome?;
        self.trial.previous = self.trial.current.take();
        self.trial.current = Some(result);
        self.trial.evaluated = evaluated;
        Ok(true)
    }

    /// Forget all trial results; an outstanding trial will be dropped.
    pub fn reset_trial(&mut self) {
        self.trial = TrialState::default();
        self.trial_ticket = None;
    }

    // ---------- apply ----------

    /// First step of a commit. Nothing is sent until `confirm_apply`.
    pub fn request_apply(&mut self) -> Result<PendingApply, WorkflowError> {
        self.ensure_not_applying()?;
        let settings = self.effective_settings();
        if settings.is_empty() {
            return Err(WorkflowError::EmptySelection);
        }
        let replaced = self
            .suggestions
            .iter()
            .filter(|s| settings.contains_key(&s.setting_name))
            .map(|s| (s.setting_name.clone(), s.current_value.clone()))
            .collect();
        let pending = PendingApply {
            settings,
            replaced,
            selection_rev: self.selection_rev,
        };
        self.phase = Phase::Confirming(pending.clone());
        Ok(pending)
    }

    pub fn cancel_apply(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            Phase::Confirming(_) => {
                self.phase = Phase::Idle;
                Ok(())
            }
            Phase::Applying { .. } => Err(WorkflowError::ApplyInFlight),
            Phase::Idle => Err(WorkflowError::NotConfirming),
        }
    }

    /// Second step. Hands back the batch to commit.
    pub fn confirm_apply(&mut self) -> Result<(Ticket, BTreeMap<String, Value>), WorkflowError> {
        let pending = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Confirming(pending) => pending,
            applying @ Phase::Applying { .. } => {
                self.phase = applying;
                return Err(WorkflowError::ApplyInFlight);
            }
            Phase::Idle => return Err(WorkflowError::NotConfirming),
        };

        let dismissing = pending
            .settings
            .keys()
            .any(|k| self.dismissals.contains_key(k));
        if pending.selection_rev != self.selection_rev
            || pending.settings != self.effective_settings()
            || dismissing
        {
            return Err(WorkflowError::StaleConfirmation);
        }

        let ticket = self.issue();
        let settings = pending.settings.clone();
        self.phase = Phase::Applying {
            ticket,
            batch: pending,
        };
        Ok((ticket, settings))
    }

    /// On success returns the `accepted` log entries to send and owes a
    /// suggestion load. On failure the selection, custom values and trial are
    /// exactly as before the commit.
    pub fn complete_apply(
        &mut self,
        ticket: Ticket,
        outcome: Result<(), FetchError>,
    ) -> Result<ApplyOutcome, WorkflowError> {
        let batch = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Applying { ticket: t, batch } if t == ticket => batch,
            other => {
                self.phase = other;
                debug!(?ticket, "superseded apply result discarded");
                return Ok(ApplyOutcome::Superseded);
            }
        };
        if let Err(e) = outcome {
            warn!(settings = batch.settings.len(), "apply failed: {}", e);
            return Err(e.into());
        }

        let logs: Vec<DecisionLog> = batch
            .settings
            .iter()
            .map(|(name, value)| DecisionLog {
                setting_name: name.clone(),
                current_value: batch.replaced.get(name).cloned().unwrap_or(Value::Null),
                suggested_value: value.clone(),
                decision: SuggestionDecision::Accepted,
            })
            .collect();

        self.suggestions
            .retain(|s| !batch.settings.contains_key(&s.setting_name));
        for name in batch.settings.keys() {
            self.settled.insert(name.clone(), SuggestionState::Applied);
        }
        self.selection.clear();
        self.prune();
        self.reset_trial();
        self.selection_rev += 1;
        self.reload_deferred = true;
        info!(applied = logs.len(), "settings applied");
        Ok(ApplyOutcome::Committed(logs))
    }

    // ---------- dismissal ----------

    /// Dismissal is logged first; the suggestion leaves the list only once the
    /// backend has recorded it.
    pub fn begin_dismiss(&mut self, name: &str) -> Result<(Ticket, DecisionLog), WorkflowError> {
        let suggestion = self
            .find(name)
            .ok_or_else(|| WorkflowError::UnknownSetting(name.to_string()))?;
        if self.dismissals.contains_key(name) {
            return Err(WorkflowError::DismissInFlight(name.to_string()));
        }
        if let Phase::Applying { batch, .. } = &self.phase {
            if batch.settings.contains_key(name) {
                return Err(WorkflowError::ApplyInFlight);
            }
        }
        let log = DecisionLog::for_suggestion(suggestion, SuggestionDecision::Dismissed);
        let ticket = self.issue();
        self.dismissals.insert(name.to_string(), ticket);
        Ok((ticket, log))
    }

    pub fn complete_dismiss(
        &mut self,
        name: &str,
        ticket: Ticket,
        outcome: Result<(), FetchError>,
    ) -> Result<bool, WorkflowError> {
        if self.dismissals.get(name) != Some(&ticket) {
            debug!(?ticket, setting = name, "superseded dismissal discarded");
            return Ok(false);
        }
        self.dismissals.remove(name);
        outcome?;

        let was_selected = self.selection.remove(name);
        self.suggestions.retain(|s| s.setting_name != name);
        self.overrides.remove(name);
        self.settled
            .insert(name.to_string(), SuggestionState::Cancelled);
        if was_selected {
            self.selection_edited();
        }
        info!(setting = name, "suggestion dismissed");
        Ok(true)
    }

    // ---------- presentation ----------

    pub fn state_of(&self, name: &str) -> Option<SuggestionState> {
        if !self.contains(name) {
            return self.settled.get(name).copied();
        }
        let pending = match &self.phase {
            Phase::Confirming(p) | Phase::Applying { batch: p, .. } => Some(p),
            Phase::Idle => None,
        };
        if pending.is_some_and(|p| p.settings.contains_key(name)) {
            return Some(SuggestionState::Confirming);
        }
        if !self.selection.contains(name) {
            return Some(SuggestionState::Unselected);
        }
        if self.trial.current.is_some() && self.trial.evaluated.contains_key(name) {
            Some(SuggestionState::Trialed)
        } else {
            Some(SuggestionState::Selected)
        }
    }

    pub fn tier(&self, suggestion: &Suggestion) -> ConfidenceTier {
        ConfidenceTier::classify(
            suggestion.confidence,
            self.cfg.preselect_threshold,
            self.cfg.display_tier_threshold,
        )
    }

    pub fn view(&self) -> OptimizeView {
        let suggestions = self
            .suggestions
            .iter()
            .map(|s| SuggestionView {
                suggestion: s.clone(),
                state: self
                    .state_of(&s.setting_name)
                    .unwrap_or(SuggestionState::Unselected),
                tier: self.tier(s),
                custom_value: self.overrides.get(&s.setting_name).cloned(),
            })
            .collect();
        let pending = match &self.phase {
            Phase::Confirming(p) | Phase::Applying { batch: p, .. } => Some(p.settings.clone()),
            Phase::Idle => None,
        };
        OptimizeView {
            suggestions,
            phase: self.phase(),
            pending,
            trial: self.trial.clone(),
            delta: self.trial.delta(),
            loading: self.is_loading(),
        }
    }
}
