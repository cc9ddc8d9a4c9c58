//! Host-driven broadcast session: MatchSession receives events from host, returns actions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::identity::SelfId;
use crate::protocol::{Gender, IntentMessage, Opcode, Packet, Profile, ProfileAdvert, INTENT_LEN, PROFILE_LEN};
use crate::wire::{self, WireError};

/// Default weight of a new RSSI reading in the running estimate.
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.30;

/// Default silence after which a candidate is dropped.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(1);

/// Default cleanup tick period.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Session tunables and feature switches.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub smoothing_alpha: f64,
    pub stale_after: Duration,
    pub cleanup_interval: Duration,
    pub advertise_enabled: bool,
    pub scan_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            stale_after: DEFAULT_STALE_AFTER,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            advertise_enabled: true,
            scan_enabled: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha < 1.0) {
            return Err(SessionError::InvalidConfig(format!(
                "smoothing alpha {} outside (0, 1)",
                self.smoothing_alpha
            )));
        }
        if self.stale_after.is_zero() || self.cleanup_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "durations must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transport capability as reported by the host just before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub available: bool,
    pub enabled: bool,
}

impl Readiness {
    pub const READY: Readiness = Readiness {
        available: true,
        enabled: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("transport not ready (available: {available}, enabled: {enabled})")]
    NotReady { available: bool, enabled: bool },
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("cannot encode advertisement: {0}")]
    Encode(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Active,
}

/// One nearby device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: SelfId,
    pub display_id: String,
    pub match_percentage: u8,
    pub smoothed_rssi: f64,
    pub gender: Gender,
    #[serde(skip)]
    pub last_seen: Instant,
    pub sightings: u64,
}

/// Problems surfaced to the host. None of them stop the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Report {
    AdvertiseFailed(String),
    ScanFailed(String),
    PermissionDenied,
}

/// Inputs the host feeds in, one at a time, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw payload from the scanner.
    Packet { bytes: Vec<u8>, rssi: i16, at: Instant },
    /// Already-decoded profile.
    Sighting { advert: ProfileAdvert, rssi: i16, at: Instant },
    CleanupTick { at: Instant },
    AdvertiseFailed(String),
    ScanFailed(String),
    PermissionDenied,
}

/// What the host must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StartAdvertising([u8; PROFILE_LEN]),
    StopAdvertising,
    StartScanning,
    StopScanning,
    StartCleanupTimer(Duration),
    CancelCleanupTimer,
    /// Full de-duplicated list, best match first.
    CandidatesChanged(Vec<Candidate>),
    IntentReceived(IntentMessage),
    Report(Report),
}

/// Owns the candidate table for one advertise/scan run.
pub struct MatchSession {
    self_id: SelfId,
    profile: Profile,
    config: SessionConfig,
    state: SessionState,
    advertising: bool,
    scanning: bool,
    candidates: HashMap<SelfId, Candidate>,
}

impl MatchSession {
    pub fn new(self_id: SelfId, profile: Profile, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            self_id,
            profile,
            config,
            state: SessionState::Idle,
            advertising: false,
            scanning: false,
            candidates: HashMap::new(),
        })
    }

    pub fn self_id(&self) -> SelfId {
        self.self_id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Payload this device advertises.
    pub fn advertisement(&self) -> Result<[u8; PROFILE_LEN], WireError> {
        wire::encode_profile_advert(&ProfileAdvert {
            gender: self.profile.gender,
            criteria: self.profile.traits,
            sender: self.self_id,
        })
    }

    /// Outgoing intent from this device. `target = None` broadcasts it undirected.
    pub fn intent_payload(
        &self,
        opcode: Opcode,
        target: Option<SelfId>,
    ) -> Result<[u8; INTENT_LEN], WireError> {
        wire::encode_intent(
            opcode,
            self.self_id.as_bytes(),
            target.as_ref().map(|t| t.as_bytes().as_slice()),
        )
    }

    /// Begin advertising and scanning. Starting an active session does nothing.
    pub fn start(&mut self, readiness: Readiness) -> Result<Vec<Action>, SessionError> {
        if !(readiness.available && readiness.enabled) {
            tracing::warn!(
                available = readiness.available,
                enabled = readiness.enabled,
                "cannot start session: transport not ready"
            );
            return Err(SessionError::NotReady {
                available: readiness.available,
                enabled: readiness.enabled,
            });
        }
        if self.state == SessionState::Active {
            return Ok(Vec::new());
        }
        let payload = self.advertisement()?;
        self.state = SessionState::Active;
        let mut actions = Vec::new();
        if self.config.advertise_enabled {
            self.advertising = true;
            actions.push(Action::StartAdvertising(payload));
        }
        if self.config.scan_enabled {
            self.scanning = true;
            actions.push(Action::StartScanning);
        }
        actions.push(Action::StartCleanupTimer(self.config.cleanup_interval));
        tracing::info!(
            id = %self.self_id,
            advertising = self.advertising,
            scanning = self.scanning,
            "session started"
        );
        Ok(actions)
    }

    /// Full teardown. Stopping an idle session does nothing.
    pub fn stop(&mut self) -> Vec<Action> {
        if self.state == SessionState::Idle {
            return Vec::new();
        }
        self.state = SessionState::Idle;
        self.advertising = false;
        self.scanning = false;
        self.candidates.clear();
        tracing::info!("session stopped");
        vec![
            Action::StopAdvertising,
            Action::StopScanning,
            Action::CancelCleanupTimer,
            Action::CandidatesChanged(Vec::new()),
        ]
    }

    /// Single entry point for host events.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::Packet { bytes, rssi, at } => self.on_packet(&bytes, rssi, at),
            SessionEvent::Sighting { advert, rssi, at } => self.on_sighting(&advert, rssi, at),
            SessionEvent::CleanupTick { at } => self.on_cleanup_tick(at),
            SessionEvent::AdvertiseFailed(reason) => {
                tracing::warn!(%reason, "advertising failed; scanning continues");
                self.advertising = false;
                vec![Action::Report(Report::AdvertiseFailed(reason))]
            }
            SessionEvent::ScanFailed(reason) => {
                tracing::warn!(%reason, "scanning failed; advertising continues");
                self.scanning = false;
                vec![Action::Report(Report::ScanFailed(reason))]
            }
            SessionEvent::PermissionDenied => {
                tracing::warn!("broadcast permission denied");
                vec![Action::Report(Report::PermissionDenied)]
            }
        }
    }

    /// Raw payload from the shared channel. Foreign and malformed payloads are dropped.
    pub fn on_packet(&mut self, bytes: &[u8], rssi: i16, now: Instant) -> Vec<Action> {
        match wire::decode_packet(bytes) {
            Some(Packet::Profile(advert)) => self.on_sighting(&advert, rssi, now),
            Some(Packet::Intent(intent)) => self.on_intent(intent),
            None => {
                tracing::trace!(len = bytes.len(), "dropping foreign packet");
                Vec::new()
            }
        }
    }

    fn on_intent(&mut self, intent: IntentMessage) -> Vec<Action> {
        if self.state == SessionState::Idle || intent.sender == self.self_id {
            return Vec::new();
        }
        if intent.is_directed() && intent.target != self.self_id {
            return Vec::new();
        }
        tracing::debug!(from = %intent.sender, opcode = ?intent.opcode, "intent received");
        vec![Action::IntentReceived(intent)]
    }

    /// Score, smooth and upsert one sighting, then publish the sorted list.
    pub fn on_sighting(&mut self, advert: &ProfileAdvert, rssi: i16, now: Instant) -> Vec<Action> {
        if self.state == SessionState::Idle {
            return Vec::new();
        }
        if advert.sender == self.self_id {
            tracing::trace!("ignoring own advertisement");
            return Vec::new();
        }
        let match_percentage = self.profile.wants.match_percentage(&advert.criteria);
        let alpha = self.config.smoothing_alpha;
        let reading = f64::from(rssi);
        let candidate = self.candidates.entry(advert.sender).or_insert_with(|| {
            tracing::debug!(id = %advert.sender, match_percentage, rssi, "new candidate");
            Candidate {
                id: advert.sender,
                display_id: advert.sender.to_string(),
                match_percentage,
                smoothed_rssi: reading,
                gender: advert.gender,
                last_seen: now,
                sightings: 0,
            }
        });
        candidate.smoothed_rssi = smooth(candidate.smoothed_rssi, reading, alpha);
        candidate.match_percentage = match_percentage;
        candidate.gender = advert.gender;
        candidate.last_seen = now;
        candidate.sightings += 1;
        vec![Action::CandidatesChanged(self.candidates())]
    }

    /// Drop candidates silent for longer than `stale_after`.
    pub fn on_cleanup_tick(&mut self, now: Instant) -> Vec<Action> {
        let stale_after = self.config.stale_after;
        let before = self.candidates.len();
        self.candidates
            .retain(|_, c| now.saturating_duration_since(c.last_seen) <= stale_after);
        let removed = before - self.candidates.len();
        if removed == 0 {
            return Vec::new();
        }
        tracing::debug!(removed, remaining = self.candidates.len(), "expired candidates");
        vec![Action::CandidatesChanged(self.candidates())]
    }

    /// Snapshot ordered by match descending, then signal descending, then id.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut list: Vec<Candidate> = self.candidates.values().cloned().collect();
        list.sort_by(|a, b| {
            b.match_percentage
                .cmp(&a.match_percentage)
                .then(b.smoothed_rssi.total_cmp(&a.smoothed_rssi))
                .then(a.id.cmp(&b.id))
        });
        list
    }

    pub fn candidate(&self, id: &SelfId) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    /// Replace the local profile. The advertisement changes, so an active session re-advertises.
    pub fn set_profile(&mut self, profile: Profile) -> Result<Vec<Action>, SessionError> {
        self.profile = profile;
        if self.state == SessionState::Active && self.advertising {
            return Ok(vec![Action::StartAdvertising(self.advertisement()?)]);
        }
        Ok(Vec::new())
    }
}

/// Exponentially weighted running estimate.
pub fn smooth(previous: f64, reading: f64, alpha: f64) -> f64 {
    alpha * reading + (1.0 - alpha) * previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{self, Criteria};

    fn me() -> SelfId {
        SelfId::from_bytes(*b"MYSELF01")
    }

    fn profile() -> Profile {
        Profile {
            gender: Gender::Male,
            traits: Criteria::from_indices([1, 2]),
            wants: Criteria::from_indices([0, 1, 2, 3]),
        }
    }

    fn active_session() -> MatchSession {
        let mut s = MatchSession::new(me(), profile(), SessionConfig::default()).unwrap();
        s.start(Readiness::READY).unwrap();
        s
    }

    fn advert(id: &[u8; 8], traits: &[usize]) -> ProfileAdvert {
        ProfileAdvert {
            gender: Gender::Female,
            criteria: Criteria::from_indices(traits.iter().copied()),
            sender: SelfId::from_bytes(*id),
        }
    }

    fn published(actions: &[Action]) -> Vec<Candidate> {
        actions
            .iter()
            .find_map(|a| match a {
                Action::CandidatesChanged(list) => Some(list.clone()),
                _ => None,
            })
            .expect("expected CandidatesChanged")
    }

    #[test]
    fn start_requires_ready_transport() {
        let mut s = MatchSession::new(me(), profile(), SessionConfig::default()).unwrap();
        let err = s
            .start(Readiness { available: true, enabled: false })
            .unwrap_err();
        assert_eq!(err, SessionError::NotReady { available: true, enabled: false });
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn start_emits_advertise_scan_and_timer() {
        let mut s = MatchSession::new(me(), profile(), SessionConfig::default()).unwrap();
        let actions = s.start(Readiness::READY).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::StartAdvertising(s.advertisement().unwrap()),
                Action::StartScanning,
                Action::StartCleanupTimer(DEFAULT_CLEANUP_INTERVAL),
            ]
        );
        assert_eq!(s.state(), SessionState::Active);
        assert!(s.start(Readiness::READY).unwrap().is_empty());
    }

    #[test]
    fn advertisement_matches_wire_encoder() {
        let s = active_session();
        let expected =
            wire::encode_profile(Gender::Male, profile().traits.as_bytes(), me().as_bytes()).unwrap();
        assert_eq!(s.advertisement().unwrap(), expected);
    }

    #[test]
    fn switches_disable_sub_capabilities() {
        let config = SessionConfig {
            advertise_enabled: false,
            ..SessionConfig::default()
        };
        let mut s = MatchSession::new(me(), profile(), config).unwrap();
        let actions = s.start(Readiness::READY).unwrap();
        assert!(!actions.iter().any(|a| matches!(a, Action::StartAdvertising(_))));
        assert!(actions.contains(&Action::StartScanning));
        assert!(!s.is_advertising());
    }

    #[test]
    fn invalid_config_rejected() {
        for alpha in [0.0, 1.0, -0.5, f64::NAN] {
            let config = SessionConfig {
                smoothing_alpha: alpha,
                ..SessionConfig::default()
            };
            assert!(MatchSession::new(me(), profile(), config).is_err());
        }
        let config = SessionConfig {
            stale_after: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(MatchSession::new(me(), profile(), config).is_err());
    }

    #[test]
    fn stop_is_full_teardown_and_idempotent() {
        let mut s = active_session();
        s.on_sighting(&advert(b"OTHER001", &[0]), -60, Instant::now());
        let actions = s.stop();
        assert!(actions.contains(&Action::StopAdvertising));
        assert!(actions.contains(&Action::StopScanning));
        assert!(actions.contains(&Action::CancelCleanupTimer));
        assert!(published(&actions).is_empty());
        assert!(s.candidates().is_empty());
        assert!(s.stop().is_empty());
    }

    #[test]
    fn self_sighting_is_ignored() {
        let mut s = active_session();
        let actions = s.on_sighting(&advert(b"MYSELF01", &[0, 1]), -40, Instant::now());
        assert!(actions.is_empty());
        assert!(s.candidates().is_empty());
    }

    #[test]
    fn sightings_while_idle_are_ignored() {
        let mut s = MatchSession::new(me(), profile(), SessionConfig::default()).unwrap();
        assert!(s.on_sighting(&advert(b"OTHER001", &[0]), -60, Instant::now()).is_empty());
        assert!(s.candidates().is_empty());
    }

    #[test]
    fn repeated_sightings_update_one_record() {
        let mut s = active_session();
        let t0 = Instant::now();
        s.on_sighting(&advert(b"OTHER001", &[0]), -70, t0);
        let t1 = t0 + Duration::from_millis(300);
        let actions = s.on_sighting(&advert(b"OTHER001", &[0, 1]), -50, t1);
        let list = published(&actions);
        assert_eq!(list.len(), 1);
        let c = &list[0];
        assert_eq!(c.sightings, 2);
        assert_eq!(c.last_seen, t1);
        assert_eq!(c.match_percentage, 50);
        assert!((c.smoothed_rssi - (0.3 * -50.0 + 0.7 * -70.0)).abs() < 1e-9);
    }

    #[test]
    fn first_sighting_starts_at_reading() {
        let mut s = active_session();
        s.on_sighting(&advert(b"OTHER001", &[]), -80, Instant::now());
        let c = s.candidate(&SelfId::from_bytes(*b"OTHER001")).unwrap();
        assert_eq!(c.smoothed_rssi, -80.0);
        assert_eq!(c.display_id, "OTHER001");
    }

    #[test]
    fn constant_stream_converges() {
        let mut s = active_session();
        let id = SelfId::from_bytes(*b"OTHER001");
        let t0 = Instant::now();
        for _ in 0..4 {
            s.on_sighting(&advert(b"OTHER001", &[0]), -80, t0);
        }
        assert!((s.candidate(&id).unwrap().smoothed_rssi + 80.0).abs() < 1e-9);

        s.on_sighting(&advert(b"OTHER001", &[0]), -40, t0);
        let mut previous = s.candidate(&id).unwrap().smoothed_rssi;
        for _ in 0..20 {
            s.on_sighting(&advert(b"OTHER001", &[0]), -80, t0);
            let next = s.candidate(&id).unwrap().smoothed_rssi;
            assert!(next <= previous);
            assert!(next >= -80.0);
            previous = next;
        }
        assert!((previous + 80.0).abs() < 0.1);
    }

    #[test]
    fn list_is_sorted_best_match_first() {
        let mut s = active_session();
        let now = Instant::now();
        s.on_sighting(&advert(b"LOW00001", &[0]), -40, now);
        s.on_sighting(&advert(b"HIGH0001", &[0, 1, 2, 3]), -90, now);
        s.on_sighting(&advert(b"MIDNEAR1", &[0, 1]), -45, now);
        let actions = s.on_sighting(&advert(b"MIDFAR01", &[2, 3]), -85, now);
        let ids: Vec<String> = published(&actions).into_iter().map(|c| c.display_id).collect();
        assert_eq!(ids, vec!["HIGH0001", "MIDNEAR1", "MIDFAR01", "LOW00001"]);
    }

    #[test]
    fn cleanup_expires_silent_candidates() {
        let mut s = active_session();
        let t0 = Instant::now();
        s.on_sighting(&advert(b"GONE0001", &[0]), -60, t0);
        s.on_sighting(&advert(b"STAY0001", &[0]), -60, t0 + Duration::from_millis(900));

        assert!(s.on_cleanup_tick(t0 + Duration::from_millis(1000)).is_empty());

        let actions = s.on_cleanup_tick(t0 + Duration::from_millis(1500));
        let list = published(&actions);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].display_id, "STAY0001");
    }

    #[test]
    fn packets_are_decoded_and_routed() {
        let mut s = active_session();
        let now = Instant::now();
        let mask = criteria::encode(&[true, true]);
        let bytes = wire::encode_profile(Gender::NonBinary, &mask, b"OTHER001").unwrap();
        let list = published(&s.on_packet(&bytes, -55, now));
        assert_eq!(list[0].gender, Gender::NonBinary);
        assert_eq!(list[0].match_percentage, 50);

        assert!(s.on_packet(&[0xde, 0xad], -55, now).is_empty());
        assert!(s.on_packet(&bytes[..16], -55, now).is_empty());
    }

    #[test]
    fn intents_are_filtered_by_target() {
        let mut s = active_session();
        let now = Instant::now();
        let to_me = wire::encode_intent(Opcode::Like, b"OTHER001", Some(b"MYSELF01")).unwrap();
        let to_other = wire::encode_intent(Opcode::Like, b"OTHER001", Some(b"SOMEONE1")).unwrap();
        let broadcast = wire::encode_intent(Opcode::Mutual, b"OTHER001", None).unwrap();
        let echo = s.intent_payload(Opcode::Like, None).unwrap();

        assert!(matches!(
            s.on_packet(&to_me, -50, now).as_slice(),
            [Action::IntentReceived(IntentMessage { opcode: Opcode::Like, .. })]
        ));
        assert!(s.on_packet(&to_other, -50, now).is_empty());
        assert_eq!(s.on_packet(&broadcast, -50, now).len(), 1);
        assert!(s.on_packet(&echo, -50, now).is_empty());
        assert!(s.candidates().is_empty());
    }

    #[test]
    fn transport_failures_degrade_independently() {
        let mut s = active_session();
        let actions = s.handle(SessionEvent::AdvertiseFailed("busy".into()));
        assert_eq!(actions, vec![Action::Report(Report::AdvertiseFailed("busy".into()))]);
        assert!(!s.is_advertising());
        assert!(s.is_scanning());
        assert_eq!(s.state(), SessionState::Active);

        let actions = s.handle(SessionEvent::Sighting {
            advert: advert(b"OTHER001", &[0]),
            rssi: -60,
            at: Instant::now(),
        });
        assert_eq!(published(&actions).len(), 1);
    }

    #[test]
    fn profile_change_readvertises() {
        let mut s = active_session();
        let mut p = profile();
        p.gender = Gender::Private;
        let actions = s.set_profile(p).unwrap();
        let payload = s.advertisement().unwrap();
        assert_eq!(actions, vec![Action::StartAdvertising(payload)]);
        assert_eq!(payload[0], Gender::Private.to_wire());
        assert_eq!(wire::decode_profile(&payload).map(|a| a.sender), Some(me()));
    }

    #[test]
    fn smooth_weights_reading() {
        assert!((smooth(-80.0, -40.0, 0.3) - -68.0).abs() < 1e-9);
    }
}
