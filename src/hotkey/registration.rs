//! Registration state of one logical hotkey.

use super::combo::Combo;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Where a registration stands.
///
/// ```text
/// Unregistered -> Registering -> Registered
///                      |
///                      +-> Conflicted -> Registered (combo replaced)
///                      |          |
///                      |          +-> Failed
///                      +-> Failed (probe kept erroring)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// Not bound
    Unregistered,
    /// Checking availability
    Registering,
    /// Bound and listening
    Registered,
    /// Combo taken, looking for an alternative
    Conflicted,
    /// Gave up
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Conflicted => "conflicted",
            RegistrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why the requested combo could not be used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictInfo {
    /// The combo that was requested
    pub requested: Combo,
    /// Human-readable reason
    pub reason: String,
    /// Alternatives that were probed, best first
    pub alternatives: Vec<Combo>,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
}

/// One logical hotkey and its registration lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct HotkeyRegistration {
    hotkey_id: String,
    combo: Combo,
    action: String,
    state: RegistrationState,
    trigger_count: u64,
    last_triggered: Option<DateTime<Utc>>,
    conflict_info: Option<ConflictInfo>,
}

impl HotkeyRegistration {
    /// A fresh, unregistered hotkey
    pub fn new(hotkey_id: impl Into<String>, combo: Combo, action: impl Into<String>) -> Self {
        Self {
            hotkey_id: hotkey_id.into(),
            combo,
            action: action.into(),
            state: RegistrationState::Unregistered,
            trigger_count: 0,
            last_triggered: None,
            conflict_info: None,
        }
    }

    /// Stable id, e.g. `screenshot_capture`
    pub fn hotkey_id(&self) -> &str {
        &self.hotkey_id
    }

    /// The combo currently bound, which may be a replacement
    pub fn combo(&self) -> &Combo {
        &self.combo
    }

    /// Action reported when the combo fires
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Current lifecycle state
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Whether the combo is bound
    pub fn is_active(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// How many times the combo fired
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    /// When it last fired
    pub fn last_triggered(&self) -> Option<DateTime<Utc>> {
        self.last_triggered
    }

    /// Details of the last conflict, if any
    pub fn conflict_info(&self) -> Option<&ConflictInfo> {
        self.conflict_info.as_ref()
    }

    fn transition(&mut self, allowed: &[RegistrationState], to: RegistrationState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(Error::internal(format!(
                "hotkey '{}' cannot go from {} to {}",
                self.hotkey_id, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Start probing the requested combo
    pub fn begin(&mut self) -> Result<()> {
        self.transition(&[RegistrationState::Unregistered], RegistrationState::Registering)
    }

    /// The oracle accepted the combo
    pub fn confirm(&mut self) -> Result<()> {
        self.transition(&[RegistrationState::Registering], RegistrationState::Registered)
    }

    /// The oracle refused the combo
    pub fn conflict(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(&[RegistrationState::Registering], RegistrationState::Conflicted)?;
        self.conflict_info = Some(ConflictInfo {
            requested: self.combo.clone(),
            reason: reason.into(),
            alternatives: Vec::new(),
            detected_at: Utc::now(),
        });
        Ok(())
    }

    /// Record which alternatives were tried while resolving a conflict
    pub fn record_alternatives(&mut self, alternatives: Vec<Combo>) {
        if let Some(info) = self.conflict_info.as_mut() {
            info.alternatives = alternatives;
        }
    }

    /// A replacement combo was accepted
    pub fn resolve(&mut self, replacement: Combo) -> Result<()> {
        self.transition(&[RegistrationState::Conflicted], RegistrationState::Registered)?;
        self.combo = replacement;
        Ok(())
    }

    /// No usable combo was found, or probing kept failing
    pub fn fail(&mut self) -> Result<()> {
        self.transition(
            &[RegistrationState::Registering, RegistrationState::Conflicted],
            RegistrationState::Failed,
        )
    }

    /// Release the hotkey; valid from any state
    pub fn unregister(&mut self) {
        self.state = RegistrationState::Unregistered;
    }

    /// Count one trigger
    pub fn record_trigger(&mut self, at: DateTime<Utc>) {
        self.trigger_count += 1;
        self.last_triggered = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> HotkeyRegistration {
        HotkeyRegistration::new(
            "screenshot_capture",
            Combo::parse("ctrl+shift+s").unwrap(),
            "capture_screenshot",
        )
    }

    #[test]
    fn test_happy_path() {
        let mut reg = registration();
        assert_eq!(reg.state(), RegistrationState::Unregistered);
        reg.begin().unwrap();
        reg.confirm().unwrap();
        assert!(reg.is_active());

        reg.record_trigger(Utc::now());
        reg.record_trigger(Utc::now());
        assert_eq!(reg.trigger_count(), 2);
        assert!(reg.last_triggered().is_some());
    }

    #[test]
    fn test_conflict_resolution() {
        let mut reg = registration();
        reg.begin().unwrap();
        reg.conflict("taken by another application").unwrap();
        assert_eq!(reg.state(), RegistrationState::Conflicted);

        let replacement = Combo::parse("ctrl+alt+s").unwrap();
        reg.record_alternatives(vec![replacement.clone()]);
        reg.resolve(replacement.clone()).unwrap();

        assert!(reg.is_active());
        assert_eq!(reg.combo(), &replacement);
        let info = reg.conflict_info().unwrap();
        assert_eq!(info.requested.canonical(), "ctrl+shift+s");
        assert_eq!(info.alternatives, vec![replacement]);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut reg = registration();
        assert!(reg.confirm().is_err());
        assert!(reg.resolve(Combo::parse("ctrl+alt+s").unwrap()).is_err());

        reg.begin().unwrap();
        assert!(reg.begin().is_err());
        reg.conflict("taken").unwrap();
        reg.fail().unwrap();
        assert_eq!(reg.state(), RegistrationState::Failed);
        assert!(reg.confirm().is_err());

        reg.unregister();
        assert!(reg.begin().is_ok());
    }
}
