//! Hot-reloadable dispatch module loading.
//!
//! Dispatch rules live in a `cdylib` plugin, re-`dlopen`ed whenever its
//! file's mtime has changed since the last load, so an operator can edit
//! and rebuild routing rules without restarting the manager or losing the
//! checklist. The plugin exports one `after_<worker>` C-ABI function per
//! worker name it handles; `nowcast_examples`'s `nowcast_dispatch_demo`
//! crate is a working instance of this ABI.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nowcast_protocol::{BarrierInstall, DispatchOutcome, Message, NextWorker};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DispatchError;

type AfterFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// The YAML-serialized shape an `after_<worker>` plugin function returns:
/// the bare successor list, or the `(successors, must_finish)` tuple form,
/// flattened into one struct since the FFI boundary has no tagged-union
/// convenience.
#[derive(Debug, Serialize, Deserialize)]
struct PluginReply {
    successors: Vec<NextWorker>,
    #[serde(default)]
    must_finish: Option<BTreeSet<String>>,
}

impl PluginReply {
    fn into_outcome(self) -> DispatchOutcome {
        DispatchOutcome {
            successors: self.successors,
            barrier: self.must_finish.map(|must_finish| BarrierInstall { must_finish }),
        }
    }
}

/// The manager's view of a dispatch backend: reload on change, then call
/// `after_<worker>`. Exists so the manager's message-handling logic can be
/// exercised in tests against a scripted fake instead of a real `dlopen`ed
/// plugin file.
pub trait DispatchSource {
    fn reload_if_changed(&mut self) -> Result<(), DispatchError>;

    fn call(
        &self,
        worker: &str,
        msg: &Message,
        config_yaml: &str,
        checklist_yaml: &str,
    ) -> Result<Option<DispatchOutcome>, DispatchError>;
}

/// A loaded (or not-yet-loaded) dispatch plugin, tracking the mtime it was
/// last loaded at so [`DispatchPlugin::reload_if_changed`] can detect edits.
pub struct DispatchPlugin {
    path: PathBuf,
    library: Option<libloading::Library>,
    loaded_mtime: Option<SystemTime>,
}

impl DispatchPlugin {
    /// Load the plugin at `path` for the first time. Failure to load is
    /// fatal at manager startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let mut plugin = Self {
            path: path.as_ref().to_path_buf(),
            library: None,
            loaded_mtime: None,
        };
        plugin.reload()?;
        Ok(plugin)
    }

    fn mtime(&self) -> Result<SystemTime, DispatchError> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|source| DispatchError::Stat {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn reload(&mut self) -> Result<(), DispatchError> {
        let library = unsafe { libloading::Library::new(&self.path) }.map_err(|source| {
            DispatchError::Load {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        self.library = Some(library);
        self.loaded_mtime = Some(self.mtime()?);
        info!(path = %self.path.display(), "dispatch module loaded");
        Ok(())
    }

}

impl DispatchSource for DispatchPlugin {
    /// Re-`dlopen` the plugin if its file has changed since the last load.
    /// Called before every `after_*` invocation.
    fn reload_if_changed(&mut self) -> Result<(), DispatchError> {
        let current = self.mtime()?;
        if self.loaded_mtime != Some(current) {
            self.reload()?;
        }
        Ok(())
    }

    /// Call `after_<worker>`, returning `Ok(None)` if the plugin declares
    /// no such function (the manager's "no after_worker function" reply
    /// path), `Ok(Some(outcome))` on success.
    fn call(
        &self,
        worker: &str,
        msg: &Message,
        config_yaml: &str,
        checklist_yaml: &str,
    ) -> Result<Option<DispatchOutcome>, DispatchError> {
        let library = self.library.as_ref().expect("load() succeeded before call()");
        let symbol_name = format!("after_{worker}\0");

        let after: libloading::Symbol<AfterFn> = match unsafe { library.get(symbol_name.as_bytes()) } {
            Ok(sym) => sym,
            Err(_) => return Ok(None),
        };

        let msg_yaml = msg
            .serialize()
            .expect("Message serializes to YAML unconditionally");

        let msg_c = CString::new(msg_yaml).expect("serialized message has no interior NUL");
        let config_c = CString::new(config_yaml).expect("config YAML has no interior NUL");
        let checklist_c = CString::new(checklist_yaml).expect("checklist YAML has no interior NUL");

        let raw = unsafe { after(msg_c.as_ptr(), config_c.as_ptr(), checklist_c.as_ptr()) };
        if raw.is_null() {
            return Err(DispatchError::PluginFailed(worker.to_string()));
        }

        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();

        if let Ok(free) = unsafe { library.get::<FreeFn>(b"nowcast_dispatch_free\0") } {
            unsafe { free(raw) };
        }

        let reply: PluginReply = serde_yaml::from_str(&text)
            .map_err(|e| DispatchError::MalformedOutput(worker.to_string(), e))?;
        Ok(Some(reply.into_outcome()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_reply_round_trips_bare_list() {
        let reply = PluginReply {
            successors: vec![NextWorker::new("awaken")],
            must_finish: None,
        };
        let yaml = serde_yaml::to_string(&reply).unwrap();
        let back: PluginReply = serde_yaml::from_str(&yaml).unwrap();
        let outcome = back.into_outcome();
        assert_eq!(outcome.successors, vec![NextWorker::new("awaken")]);
        assert!(outcome.barrier.is_none());
    }

    #[test]
    fn plugin_reply_round_trips_tuple_form() {
        let must_finish: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        let reply = PluginReply {
            successors: vec![NextWorker::new("a")],
            must_finish: Some(must_finish.clone()),
        };
        let yaml = serde_yaml::to_string(&reply).unwrap();
        let back: PluginReply = serde_yaml::from_str(&yaml).unwrap();
        let outcome = back.into_outcome();
        assert_eq!(outcome.barrier.unwrap().must_finish, must_finish);
    }
}
