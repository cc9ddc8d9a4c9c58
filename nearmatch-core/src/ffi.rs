//! C ABI for linking nearmatch-core as a static library from Android (NDK) or iOS hosts.
//! The host owns the radio; it forwards scan results here and executes the returned payloads.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;
use std::time::{Duration, Instant};

use crate::criteria::{Criteria, CRITERIA_BYTES};
use crate::identity::{SelfId, ID_LEN};
use crate::protocol::{Gender, Opcode, Profile, INTENT_LEN, INTENT_VERSION, PROFILE_LEN};
use crate::session::{Action, Candidate, MatchSession, Readiness, SessionConfig};

/// Bytes per row written by `nm_session_candidates`: id(8) match(1) gender(1) rssi f32 LE(4).
pub const CANDIDATE_ROW_LEN: usize = ID_LEN + 1 + 1 + 4;

/// Bytes written to `out_intent` by `nm_session_on_packet`: opcode(1) sender(8).
pub const INTENT_NOTICE_LEN: usize = 1 + ID_LEN;

/// Current intent wire version. Also gives the staticlib an exported symbol.
#[no_mangle]
pub extern "C" fn nm_core_version() -> u8 {
    INTENT_VERSION
}

/// Generate a fresh self id into out_id_8 (host persists it). Returns 0, or -1 if out is null.
#[no_mangle]
pub extern "C" fn nm_generate_id(out_id_8: *mut u8) -> c_int {
    if out_id_8.is_null() {
        return -1;
    }
    let id = SelfId::generate();
    unsafe {
        out_id_8.copy_from_nonoverlapping(id.as_bytes().as_ptr(), ID_LEN);
    }
    0
}

/// Create a session. Zero durations select the defaults. Returns opaque handle or null on
/// null input or invalid config.
#[no_mangle]
pub extern "C" fn nm_session_create(
    self_id_8: *const u8,
    gender: u8,
    traits_8: *const u8,
    wants_8: *const u8,
    stale_after_ms: u64,
    cleanup_interval_ms: u64,
) -> *mut c_void {
    if self_id_8.is_null() || traits_8.is_null() || wants_8.is_null() {
        return std::ptr::null_mut();
    }
    let mut id = [0u8; ID_LEN];
    let mut traits = [0u8; CRITERIA_BYTES];
    let mut wants = [0u8; CRITERIA_BYTES];
    unsafe {
        id.copy_from_slice(slice::from_raw_parts(self_id_8, ID_LEN));
        traits.copy_from_slice(slice::from_raw_parts(traits_8, CRITERIA_BYTES));
        wants.copy_from_slice(slice::from_raw_parts(wants_8, CRITERIA_BYTES));
    }
    let mut config = SessionConfig::default();
    if stale_after_ms > 0 {
        config.stale_after = Duration::from_millis(stale_after_ms);
    }
    if cleanup_interval_ms > 0 {
        config.cleanup_interval = Duration::from_millis(cleanup_interval_ms);
    }
    let profile = Profile {
        gender: Gender::from_wire(gender),
        traits: Criteria(traits),
        wants: Criteria(wants),
    };
    match MatchSession::new(SelfId::from_bytes(id), profile, config) {
        Ok(session) => Box::into_raw(Box::new(session)) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy session. No-op if h is null.
#[no_mangle]
pub extern "C" fn nm_session_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut MatchSession) };
}

/// Start advertising and scanning. Writes the 17-byte advertisement to out_buf when advertising
/// is enabled. Returns bytes written (17 or 0), or -1 if not ready or out_buf too small.
#[no_mangle]
pub extern "C" fn nm_session_start(
    h: *mut c_void,
    available: bool,
    enabled: bool,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut MatchSession) };
    let actions = match session.start(Readiness { available, enabled }) {
        Ok(a) => a,
        Err(_) => return -1,
    };
    let payload = actions.iter().find_map(|a| match a {
        Action::StartAdvertising(p) => Some(*p),
        _ => None,
    });
    match payload {
        Some(p) => {
            if out_buf.is_null() || out_buf_len < PROFILE_LEN {
                return -1;
            }
            unsafe {
                out_buf.copy_from_nonoverlapping(p.as_ptr(), PROFILE_LEN);
            }
            PROFILE_LEN as c_int
        }
        None => 0,
    }
}

/// Stop and clear. Returns 0, or -1 if h is null.
#[no_mangle]
pub extern "C" fn nm_session_stop(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut MatchSession) };
    session.stop();
    0
}

/// Feed one scan result. Returns 0 = nothing changed, 1 = candidate list changed,
/// 2 = intent for us (opcode + sender written to out_intent), -1 = error.
#[no_mangle]
pub extern "C" fn nm_session_on_packet(
    h: *mut c_void,
    bytes: *const u8,
    len: usize,
    rssi: i16,
    out_intent: *mut u8,
    out_intent_len: usize,
) -> c_int {
    if h.is_null() || bytes.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut MatchSession) };
    let packet = unsafe { slice::from_raw_parts(bytes, len) };
    let actions = session.on_packet(packet, rssi, Instant::now());
    for action in &actions {
        match action {
            Action::CandidatesChanged(_) => return 1,
            Action::IntentReceived(intent) => {
                if out_intent.is_null() || out_intent_len < INTENT_NOTICE_LEN {
                    return -1;
                }
                let buf = unsafe { slice::from_raw_parts_mut(out_intent, out_intent_len) };
                buf[0] = intent.opcode.to_wire();
                buf[1..INTENT_NOTICE_LEN].copy_from_slice(intent.sender.as_bytes());
                return 2;
            }
            _ => {}
        }
    }
    0
}

/// Cleanup tick; host calls this on its timer. Returns 1 if candidates expired, 0 if not, -1 on error.
#[no_mangle]
pub extern "C" fn nm_session_tick(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut MatchSession) };
    if session.on_cleanup_tick(Instant::now()).is_empty() {
        0
    } else {
        1
    }
}

/// Serialize the sorted candidate list: 4 bytes count (LE), then count rows of
/// CANDIDATE_ROW_LEN. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn nm_session_candidates(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -1;
    }
    let session = unsafe { &*(h as *const MatchSession) };
    let list = session.candidates();
    let need = 4 + list.len() * CANDIDATE_ROW_LEN;
    if out_buf_len < need {
        return -1;
    }
    let buf = unsafe { slice::from_raw_parts_mut(out_buf, out_buf_len) };
    write_candidates(&list, buf);
    need as c_int
}

fn write_candidates(list: &[Candidate], buf: &mut [u8]) {
    buf[0..4].copy_from_slice(&(list.len() as u32).to_le_bytes());
    for (i, c) in list.iter().enumerate() {
        let base = 4 + i * CANDIDATE_ROW_LEN;
        buf[base..base + ID_LEN].copy_from_slice(c.id.as_bytes());
        buf[base + ID_LEN] = c.match_percentage;
        buf[base + ID_LEN + 1] = c.gender.to_wire();
        buf[base + ID_LEN + 2..base + CANDIDATE_ROW_LEN]
            .copy_from_slice(&(c.smoothed_rssi as f32).to_le_bytes());
    }
}

/// Build an outgoing intent. target_8 may be null for undirected. Returns 18, or -1 on error
/// (unknown opcode, null handle, short buffer).
#[no_mangle]
pub extern "C" fn nm_session_intent(
    h: *mut c_void,
    opcode: u8,
    target_8: *const u8,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || out_buf.is_null() || out_buf_len < INTENT_LEN {
        return -1;
    }
    let Some(op) = Opcode::from_wire(opcode) else {
        return -1;
    };
    let session = unsafe { &*(h as *const MatchSession) };
    let target = if target_8.is_null() {
        None
    } else {
        let mut t = [0u8; ID_LEN];
        unsafe {
            t.copy_from_slice(slice::from_raw_parts(target_8, ID_LEN));
        }
        Some(SelfId::from_bytes(t))
    };
    let bytes = match session.intent_payload(op, target) {
        Ok(b) => b,
        Err(_) => return -1,
    };
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), INTENT_LEN);
    }
    INTENT_LEN as c_int
}
