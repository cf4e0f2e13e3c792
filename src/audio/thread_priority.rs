// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for audio callback and worker threads when PLENUM_THREAD_PRIORITY is unset.
const DEFAULT_THREAD_PRIORITY: u8 = 70;

/// Reads PLENUM_THREAD_PRIORITY (0-99). Called while opening streams and starting workers so
/// the audio path never reads the environment.
pub fn callback_thread_priority() -> ThreadPriority {
    std::env::var("PLENUM_THREAD_PRIORITY")
        .ok()
        .and_then(|v| parse_priority(&v))
        .map(ThreadPriority::Crossplatform)
        .unwrap_or_else(default_priority)
}

fn parse_priority(value: &str) -> Option<ThreadPriorityValue> {
    let n = value.trim().parse::<u8>().ok()?;
    if n >= 100 {
        return None;
    }
    ThreadPriorityValue::try_from(n).ok()
}

fn default_priority() -> ThreadPriority {
    match ThreadPriorityValue::try_from(DEFAULT_THREAD_PRIORITY) {
        Ok(value) => ThreadPriority::Crossplatform(value),
        Err(_) => ThreadPriority::Max,
    }
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for audio threads.
/// Default: enabled. Opt out with PLENUM_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("PLENUM_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread once. Failures are logged and otherwise ignored:
/// an unprivileged process still plays, just with more risk of dropouts.
pub fn configure_audio_thread_priority(
    tp: ThreadPriority,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("unnamed");
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!(thread = name, "Enabled RT SCHED_FIFO");
            }
            Err(e) => {
                warn!(
                    thread = name,
                    error = %e,
                    "Failed to set RT SCHED_FIFO"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;

    *priority_set = true;
}
