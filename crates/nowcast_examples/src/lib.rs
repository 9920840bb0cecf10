//! A sample dispatch plugin compiled as a `cdylib`, implementing the
//! `after_<worker>` C-ABI that `nowcast_manager::DispatchPlugin` `dlopen`s.
//!
//! Every exported function takes three YAML-encoded, NUL-terminated C
//! strings (message, config, checklist) and returns a malloc'd, NUL-
//! terminated C string the caller must free via [`nowcast_dispatch_free`].
//! A null return means "no successors, no barrier" is NOT representable --
//! callers treat a null return as a hard failure, so every function here
//! always succeeds and returns at least an empty successor list.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use nowcast_protocol::{Message, NextWorker};
use serde::Serialize;

#[derive(Serialize)]
struct PluginReply {
    successors: Vec<NextWorker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    must_finish: Option<BTreeSet<String>>,
}

impl PluginReply {
    fn successors(successors: Vec<NextWorker>) -> Self {
        Self {
            successors,
            must_finish: None,
        }
    }

    fn into_c_string(self) -> *mut c_char {
        let yaml = serde_yaml::to_string(&self).expect("PluginReply always serializes");
        CString::new(yaml)
            .expect("serialized reply has no interior NUL")
            .into_raw()
    }
}

unsafe fn read_message(msg_yaml: *const c_char) -> Option<Message> {
    let text = CStr::from_ptr(msg_yaml).to_string_lossy();
    Message::deserialize(&text).ok()
}

/// After `sleep` succeeds, launch `awaken`; any other outcome (`failure`,
/// `crash`) launches nothing.
#[no_mangle]
pub unsafe extern "C" fn after_sleep(
    msg: *const c_char,
    _config: *const c_char,
    _checklist: *const c_char,
) -> *mut c_char {
    let successors = match read_message(msg) {
        Some(m) if m.msg_type == "success" => vec![NextWorker::new("awaken")],
        _ => Vec::new(),
    };
    PluginReply::successors(successors).into_c_string()
}

/// `awaken` is a dead end: nothing launches after it.
#[no_mangle]
pub unsafe extern "C" fn after_awaken(
    _msg: *const c_char,
    _config: *const c_char,
    _checklist: *const c_char,
) -> *mut c_char {
    PluginReply::successors(Vec::new()).into_c_string()
}

/// After the checklist is cleared, launch `rotate_logs` -- `clear_checklist`
/// is normally launched just before log rotation at the end of a cycle.
#[no_mangle]
pub unsafe extern "C" fn after_clear_checklist(
    msg: *const c_char,
    _config: *const c_char,
    _checklist: *const c_char,
) -> *mut c_char {
    let successors = match read_message(msg) {
        Some(m) if m.msg_type == "checklist cleared" || m.msg_type == "success" => {
            vec![NextWorker::new("rotate_logs")]
        }
        _ => Vec::new(),
    };
    PluginReply::successors(successors).into_c_string()
}

/// `rotate_logs` is a dead end: nothing launches after it.
#[no_mangle]
pub unsafe extern "C" fn after_rotate_logs(
    _msg: *const c_char,
    _config: *const c_char,
    _checklist: *const c_char,
) -> *mut c_char {
    PluginReply::successors(Vec::new()).into_c_string()
}

/// Free a string returned by any `after_*` function above.
#[no_mangle]
pub unsafe extern "C" fn nowcast_dispatch_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nowcast_protocol::Value;

    fn roundtrip(raw: *mut c_char) -> PluginReplyOwned {
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        let parsed: PluginReplyOwned = serde_yaml::from_str(&text).unwrap();
        unsafe { nowcast_dispatch_free(raw) };
        parsed
    }

    #[derive(serde::Deserialize)]
    struct PluginReplyOwned {
        successors: Vec<NextWorker>,
        #[serde(default)]
        #[allow(dead_code)]
        must_finish: Option<BTreeSet<String>>,
    }

    #[test]
    fn after_sleep_success_chains_to_awaken() {
        let msg = Message::new("sleep", "success", Value::Null);
        let msg_c = CString::new(msg.serialize().unwrap()).unwrap();
        let config_c = CString::new("").unwrap();
        let checklist_c = CString::new("").unwrap();

        let raw = unsafe { after_sleep(msg_c.as_ptr(), config_c.as_ptr(), checklist_c.as_ptr()) };
        let reply = roundtrip(raw);
        assert_eq!(reply.successors, vec![NextWorker::new("awaken")]);
    }

    #[test]
    fn after_sleep_failure_launches_nothing() {
        let msg = Message::new("sleep", "failure", Value::Null);
        let msg_c = CString::new(msg.serialize().unwrap()).unwrap();
        let config_c = CString::new("").unwrap();
        let checklist_c = CString::new("").unwrap();

        let raw = unsafe { after_sleep(msg_c.as_ptr(), config_c.as_ptr(), checklist_c.as_ptr()) };
        let reply = roundtrip(raw);
        assert!(reply.successors.is_empty());
    }

    #[test]
    fn after_awaken_is_a_dead_end() {
        let msg = Message::new("awaken", "success", Value::Null);
        let msg_c = CString::new(msg.serialize().unwrap()).unwrap();
        let config_c = CString::new("").unwrap();
        let checklist_c = CString::new("").unwrap();

        let raw = unsafe { after_awaken(msg_c.as_ptr(), config_c.as_ptr(), checklist_c.as_ptr()) };
        let reply = roundtrip(raw);
        assert!(reply.successors.is_empty());
    }

    #[test]
    fn after_clear_checklist_chains_to_rotate_logs() {
        let msg = Message::new("clear_checklist", "checklist cleared", Value::Null);
        let msg_c = CString::new(msg.serialize().unwrap()).unwrap();
        let config_c = CString::new("").unwrap();
        let checklist_c = CString::new("").unwrap();

        let raw = unsafe {
            after_clear_checklist(msg_c.as_ptr(), config_c.as_ptr(), checklist_c.as_ptr())
        };
        let reply = roundtrip(raw);
        assert_eq!(reply.successors, vec![NextWorker::new("rotate_logs")]);
    }
}
