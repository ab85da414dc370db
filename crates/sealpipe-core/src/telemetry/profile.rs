//! Timing helpers and tagged profile events.
//!
//! Profile events are `tracing` debug events emitted only with the `profiling`
//! feature. Each event carries a tag stack such as `["system", "cipher"]`; an
//! event is emitted when any tag in its stack is enabled. The initial filter is
//! read from `SEALPIPE_PROFILE_TAGS` (comma separated, `*` or `all` for
//! everything) and defaults to every tag.

use std::time::{Duration, Instant};

/// Microseconds since `started_at`, saturating at `u64::MAX`.
#[inline]
pub fn elapsed_us(started_at: Instant) -> u64 {
    duration_us(started_at.elapsed())
}

#[inline]
pub fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(feature = "profiling")]
mod filter {
    use std::collections::BTreeSet;
    use std::sync::{OnceLock, RwLock};

    const ENV_VAR: &str = "SEALPIPE_PROFILE_TAGS";

    /// `None` enables every tag.
    type Enabled = Option<BTreeSet<String>>;

    fn parse<'a>(tags: impl Iterator<Item = &'a str>) -> Enabled {
        let mut enabled = BTreeSet::new();
        for tag in tags.map(str::trim).filter(|tag| !tag.is_empty()) {
            let tag = tag.to_ascii_lowercase();
            if tag == "*" || tag == "all" {
                return None;
            }
            enabled.insert(tag);
        }
        (!enabled.is_empty()).then_some(enabled)
    }

    fn cell() -> &'static RwLock<Enabled> {
        static CELL: OnceLock<RwLock<Enabled>> = OnceLock::new();
        CELL.get_or_init(|| {
            let from_env = std::env::var(ENV_VAR)
                .ok()
                .and_then(|raw| parse(raw.split(',')));
            RwLock::new(from_env)
        })
    }

    pub(super) fn replace(tags: &[&str]) {
        let enabled = parse(tags.iter().copied());
        match cell().write() {
            Ok(mut guard) => *guard = enabled,
            Err(poisoned) => *poisoned.into_inner() = enabled,
        }
    }

    pub(super) fn allows(tag_stack: &[&str]) -> bool {
        let guard = match cell().read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().is_none_or(|enabled| {
            tag_stack
                .iter()
                .any(|tag| enabled.contains(&tag.to_ascii_lowercase()))
        })
    }
}

/// Replaces the enabled tag set. An empty slice enables every tag.
pub fn set_enabled_tags(tags: &[&str]) {
    #[cfg(feature = "profiling")]
    filter::replace(tags);

    #[cfg(not(feature = "profiling"))]
    let _ = tags;
}

/// Whether an event with `tag_stack` would be emitted. Always false without `profiling`.
pub fn is_tag_stack_enabled(tag_stack: &[&str]) -> bool {
    #[cfg(feature = "profiling")]
    return filter::allows(tag_stack);

    #[cfg(not(feature = "profiling"))]
    {
        let _ = tag_stack;
        false
    }
}

/// Emits one profile event under `target` (one of the `tags::PROFILE_*` targets).
#[inline]
pub fn event(
    target: &'static str,
    tag_stack: &[&str],
    op: &'static str,
    result: &'static str,
    elapsed_us: u64,
    message: &'static str,
) {
    #[cfg(feature = "profiling")]
    {
        use crate::telemetry::tags;

        if !filter::allows(tag_stack) {
            return;
        }

        // tracing needs a constant target, so each known target gets its own callsite.
        macro_rules! emit {
            ($target:expr) => {
                tracing::debug!(target: $target, op, result, elapsed_us, tags = ?tag_stack, "{message}")
            };
        }
        match target {
            tags::PROFILE_BUFFER => emit!(tags::PROFILE_BUFFER),
            tags::PROFILE_STAGE => emit!(tags::PROFILE_STAGE),
            tags::PROFILE_TRANSFORM => emit!(tags::PROFILE_TRANSFORM),
            tags::PROFILE_ORDERER => emit!(tags::PROFILE_ORDERER),
            other => tracing::debug!(
                target: "sealpipe.profile",
                op,
                result,
                elapsed_us,
                requested_target = other,
                tags = ?tag_stack,
                "{message}"
            ),
        }
    }

    #[cfg(not(feature = "profiling"))]
    let _ = (target, tag_stack, op, result, elapsed_us, message);
}
