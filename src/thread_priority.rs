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

/// Default priority for the sampling thread when TRIGKIT_THREAD_PRIORITY is unset.
const DEFAULT_SAMPLING_THREAD_PRIORITY: u8 = 80;

/// Reads TRIGKIT_THREAD_PRIORITY (0-99), falling back to the default.
pub fn sampling_thread_priority() -> u8 {
    std::env::var("TRIGKIT_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_SAMPLING_THREAD_PRIORITY)
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

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the sampling thread.
/// Default: enabled. Opt out with TRIGKIT_DISABLE_RT=1.
pub fn rt_sampling_enabled() -> bool {
    !env_flag("TRIGKIT_DISABLE_RT")
}

/// Raises the priority of the calling thread so ticks aren't delayed by other work.
/// Failures are logged and otherwise ignored; the kit still runs, just with more jitter.
pub fn promote_sampling_thread() {
    let priority = match ThreadPriorityValue::try_from(sampling_thread_priority()) {
        Ok(priority) => priority,
        Err(e) => {
            warn!(error = ?e, "Invalid sampling thread priority");
            return;
        }
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise sampling thread priority");
    }

    #[cfg(unix)]
    if rt_sampling_enabled() {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for sampling thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for sampling thread"
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_priority_from_env() {
        std::env::remove_var("TRIGKIT_THREAD_PRIORITY");
        assert_eq!(DEFAULT_SAMPLING_THREAD_PRIORITY, sampling_thread_priority());

        std::env::set_var("TRIGKIT_THREAD_PRIORITY", "42");
        assert_eq!(42, sampling_thread_priority());

        std::env::set_var("TRIGKIT_THREAD_PRIORITY", "150");
        assert_eq!(DEFAULT_SAMPLING_THREAD_PRIORITY, sampling_thread_priority());

        std::env::set_var("TRIGKIT_THREAD_PRIORITY", "high");
        assert_eq!(DEFAULT_SAMPLING_THREAD_PRIORITY, sampling_thread_priority());

        std::env::remove_var("TRIGKIT_THREAD_PRIORITY");
    }

    #[test]
    #[serial]
    fn test_rt_flag() {
        std::env::remove_var("TRIGKIT_DISABLE_RT");
        assert!(rt_sampling_enabled());

        for value in ["1", "true", "YES", "On"] {
            std::env::set_var("TRIGKIT_DISABLE_RT", value);
            assert!(!rt_sampling_enabled());
        }

        std::env::set_var("TRIGKIT_DISABLE_RT", "0");
        assert!(rt_sampling_enabled());
        std::env::remove_var("TRIGKIT_DISABLE_RT");
    }
}
