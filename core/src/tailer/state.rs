//! Tailer state machine (spec §3 `TailerState`, §9 "extract into a small
//! FSM"; grounded on `original_source/src/log_analyzer.py`'s
//! `detect_mode_change`/`reset_state`).
//!
//! Transitions are pure functions returning the events that must be emitted
//! on the bus as a side effect of the caller — this module never touches
//! the bus itself, so every transition is unit-testable without file I/O.

/// Mutated only by the tailer task (spec §3 ownership note).
#[derive(Debug, Clone)]
pub struct TailerState {
    pub last_position: u64,
    pub username: String,
    pub current_shard: Option<String>,
    pub current_version: Option<String>,
    pub current_mode: Option<String>,
    pub in_ea_mode: bool,
    pub block_private_lobby_recording: bool,
}

impl TailerState {
    pub fn new(default_username: impl Into<String>) -> Self {
        Self {
            last_position: 0,
            username: default_username.into(),
            current_shard: None,
            current_version: None,
            current_mode: None,
            in_ea_mode: false,
            block_private_lobby_recording: false,
        }
    }
}

/// One outcome of feeding a line through the state machine: zero or more
/// bus-level events to emit, matching the spec's event namespace (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    ModeChange { new_mode: Option<String>, old_mode: Option<String> },
    ShardVersionUpdate { shard: Option<String>, version: Option<String>, username: String, mode: Option<String> },
    UsernameChange { new_username: String, old_username: String },
    RealtimeDisconnect,
}

impl TailerState {
    /// Truncation / new-file reset (spec §4.3 "State reset").
    pub fn reset(&mut self, default_username: impl Into<String>) -> Vec<StateEvent> {
        let prior_mode = self.current_mode.take();
        let prior_username = std::mem::replace(&mut self.username, default_username.into());
        self.current_shard = None;
        self.current_version = None;
        self.in_ea_mode = false;
        self.block_private_lobby_recording = false;
        self.last_position = 0;

        vec![
            StateEvent::ModeChange { new_mode: None, old_mode: prior_mode },
            StateEvent::ShardVersionUpdate {
                shard: None,
                version: None,
                username: self.username.clone(),
                mode: None,
            },
            StateEvent::UsernameChange { new_username: self.username.clone(), old_username: prior_username },
            StateEvent::RealtimeDisconnect,
        ]
    }

    /// "Context Establisher Done" (spec §4.3 special state pattern).
    pub fn enter_mode(&mut self, new_mode: impl Into<String>, nickname: Option<String>) -> Vec<StateEvent> {
        let new_mode = new_mode.into();
        if let Some(nick) = nickname {
            self.username = nick;
        }

        if Some(&new_mode) == self.current_mode.as_ref() {
            return Vec::new();
        }
        let old_mode = self.current_mode.replace(new_mode.clone());

        if new_mode != "SC_Default" {
            self.current_shard = None;
        }
        self.in_ea_mode = new_mode.starts_with("EA_");
        if new_mode.starts_with("SC_") {
            self.block_private_lobby_recording = false;
        }

        vec![
            StateEvent::ModeChange { new_mode: Some(new_mode), old_mode },
            StateEvent::ShardVersionUpdate {
                shard: self.current_shard.clone(),
                version: self.current_version.clone(),
                username: self.username.clone(),
                mode: self.current_mode.clone(),
            },
        ]
    }

    /// "Channel Disconnected" matching the current mode (spec §4.3).
    /// Returns `None` (no events) when suppressed by EA-mode exit suppression.
    pub fn exit_mode(&mut self, gamerules: &str) -> Option<Vec<StateEvent>> {
        if self.current_mode.as_deref() != Some(gamerules) {
            return None;
        }
        if self.in_ea_mode && self.current_mode.as_deref().is_some_and(|m| m.starts_with("EA_")) {
            return None;
        }

        let old_mode = self.current_mode.take();
        self.in_ea_mode = false;

        Some(vec![
            StateEvent::ModeChange { new_mode: None, old_mode },
            StateEvent::ShardVersionUpdate {
                shard: self.current_shard.clone(),
                version: self.current_version.clone(),
                username: self.username.clone(),
                mode: None,
            },
        ])
    }

    /// "ReuseChannel" server endpoint (spec §4.3: version-only update).
    pub fn update_server_version(&mut self, new_version: impl Into<String>) -> Option<Vec<StateEvent>> {
        let new_version = new_version.into();
        if self.current_version.as_deref() == Some(new_version.as_str()) {
            return None;
        }
        self.current_version = Some(new_version);
        Some(vec![StateEvent::ShardVersionUpdate {
            shard: self.current_shard.clone(),
            version: self.current_version.clone(),
            username: self.username.clone(),
            mode: self.current_mode.clone(),
        }])
    }

    /// QR-based shard/version recovery (spec §4.3).
    pub fn update_shard_version_from_qr(&mut self, shard: impl Into<String>, version: impl Into<String>) -> Option<Vec<StateEvent>> {
        let shard = shard.into();
        let version = version.into();
        if self.current_shard.as_deref() == Some(shard.as_str()) && self.current_version.as_deref() == Some(version.as_str()) {
            return None;
        }
        self.current_shard = Some(shard);
        self.current_version = Some(version);
        Some(vec![StateEvent::ShardVersionUpdate {
            shard: self.current_shard.clone(),
            version: self.current_version.clone(),
            username: self.username.clone(),
            mode: self.current_mode.clone(),
        }])
    }

    /// "EALobby NotifyServiceRequestResponse" (spec §4.3).
    pub fn update_lobby_block(&mut self, mode: &str, network: &str) {
        if !mode.starts_with("EA_") {
            return;
        }
        match network {
            "Custom" => self.block_private_lobby_recording = true,
            "Online" => self.block_private_lobby_recording = false,
            _ => {}
        }
    }

    /// PTU gating (spec §4.3/§8): true iff dispatch/broadcast must be dropped.
    pub fn is_ptu(&self) -> bool {
        self.current_version
            .as_deref()
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("ptu"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_state_and_emits_full_burst() {
        let mut state = TailerState::new("default");
        state.current_mode = Some("SC_Default".into());
        state.current_shard = Some("ABC".into());
        state.username = "Alice".into();

        let events = state.reset("default");
        assert_eq!(events.len(), 4);
        assert_eq!(state.current_mode, None);
        assert_eq!(state.current_shard, None);
        assert_eq!(state.username, "default");
        assert!(matches!(&events[0], StateEvent::ModeChange { new_mode: None, old_mode: Some(m) } if m == "SC_Default"));
        assert!(matches!(&events[3], StateEvent::RealtimeDisconnect));
    }

    #[test]
    fn enter_mode_clears_shard_unless_sc_default() {
        let mut state = TailerState::new("default");
        state.current_shard = Some("ABC".into());
        state.enter_mode("SC_Frontend", None);
        assert_eq!(state.current_shard, None);

        let mut state2 = TailerState::new("default");
        state2.current_shard = Some("ABC".into());
        state2.enter_mode("SC_Default", None);
        assert_eq!(state2.current_shard, Some("ABC".into()));
    }

    #[test]
    fn enter_mode_detects_ea_prefix() {
        let mut state = TailerState::new("default");
        let events = state.enter_mode("EA_SquadronBattle", None);
        assert!(state.in_ea_mode);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn enter_mode_clears_private_lobby_block_on_sc_mode() {
        let mut state = TailerState::new("default");
        state.block_private_lobby_recording = true;
        state.enter_mode("SC_Default", None);
        assert!(!state.block_private_lobby_recording);
    }

    #[test]
    fn exit_mode_suppressed_inside_ea_mode() {
        let mut state = TailerState::new("default");
        state.enter_mode("EA_SquadronBattle", None);
        assert!(state.exit_mode("EA_SquadronBattle").is_none());
        assert_eq!(state.current_mode, Some("EA_SquadronBattle".into()));
    }

    #[test]
    fn exit_mode_fires_for_non_ea_mode() {
        let mut state = TailerState::new("default");
        state.enter_mode("SC_Default", None);
        let events = state.exit_mode("SC_Default").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(state.current_mode, None);
    }

    #[test]
    fn exit_mode_ignored_for_mismatched_gamerules() {
        let mut state = TailerState::new("default");
        state.enter_mode("SC_Default", None);
        assert!(state.exit_mode("SC_Frontend").is_none());
    }

    #[test]
    fn lobby_block_tracks_network_state_only_in_ea_modes() {
        let mut state = TailerState::new("default");
        state.update_lobby_block("EA_SquadronBattle", "Custom");
        assert!(state.block_private_lobby_recording);
        state.update_lobby_block("EA_SquadronBattle", "Online");
        assert!(!state.block_private_lobby_recording);
        state.update_lobby_block("SC_Default", "Custom");
        assert!(!state.block_private_lobby_recording, "non-EA mode must not set the block");
    }

    #[test]
    fn ptu_gate_is_case_insensitive_prefix() {
        let mut state = TailerState::new("default");
        state.current_version = Some("PTU-1.2.3".into());
        assert!(state.is_ptu());
        state.current_version = Some("4.5 LIVE".into());
        assert!(!state.is_ptu());
    }

    #[test]
    fn qr_update_is_noop_when_unchanged() {
        let mut state = TailerState::new("default");
        assert!(state.update_shard_version_from_qr("ABC123", "4.5").is_some());
        assert!(state.update_shard_version_from_qr("ABC123", "4.5").is_none());
    }
}
