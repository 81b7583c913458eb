//! Per-axis conflict resolution (the SOCD engine).
//!
//! An [`AxisResolver`] owns the state for one group of mutually-exclusive keys
//! and arbitrates simultaneous presses under one of eight [`AxisMode`]s. It is
//! driven edge-by-edge via [`AxisResolver::on_key`]; [`AxisResolver::resolve`]
//! then returns only the output *transitions*, so the caller emits at most one
//! key-down/key-up pair per logical switch.
//!
//! Cross-mode behaviors:
//! - **swap-delay**: output changes faster than the configured interval are
//!   suppressed; the previous output is held until the delay elapses. Not
//!   consulted by `combine`/`toggle` (their output is a pure function of
//!   held/toggle state) nor by `first`.
//! - **neutral-timeout**: a ≥2-key conflict persisting longer than the
//!   configured duration forces the output to none, independent of mode
//!   (except `combine`/`toggle`).
//!
//! Invariant: at most one key has `out == true` at any instant, except in
//! `combine` mode where the output mirrors the physical state exactly.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::KeyCode;

/// Conflict-resolution policy for one axis group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisMode {
    /// Most recently pressed currently-held key wins.
    #[default]
    Recent,
    /// Earliest-pressed currently-held key wins.
    First,
    /// Two or more held keys cancel to neutral.
    Neutral,
    /// First held key in the configured priority order wins; falls back to
    /// `recent` among keys not in the priority list.
    Priority,
    /// Every held key is mirrored independently (no exclusivity).
    Combine,
    /// Alias of `first` framed as "the newest press loses"; unlike `first`
    /// it honors swap-delay.
    Invert,
    /// The winner keeps the output while it stays held, regardless of newer
    /// presses; after it is released the next winner is chosen as in `recent`.
    Sticky,
    /// Only down-edges matter: pressing the active key clears the axis,
    /// pressing another key switches the exclusive winner. Releases are
    /// ignored entirely.
    Toggle,
}

struct KeySlot {
    code: KeyCode,
    down: bool,
    out: bool,
    /// First-press timestamp; cleared on release.
    pressed_at: Option<Instant>,
}

/// State machine for one configured group of mutually-exclusive keys.
pub struct AxisResolver {
    name: String,
    mode: AxisMode,
    slots: Vec<KeySlot>,
    priority: Vec<KeyCode>,
    swap_delay: Duration,
    neutral_timeout: Duration,
    last_pressed: Option<KeyCode>,
    conflict_start: Option<Instant>,
    last_switch: Option<Instant>,
    toggle_active: Option<KeyCode>,
}

impl AxisResolver {
    /// Build a resolver over `keys` (duplicates removed, order preserved).
    ///
    /// A group needs at least two distinct keys; anything smaller is a
    /// configuration error the caller is expected to disable-and-log.
    pub fn new(name: impl Into<String>, keys: &[KeyCode], mode: AxisMode) -> Result<Self> {
        let name = name.into();
        let mut slots: Vec<KeySlot> = Vec::with_capacity(keys.len());
        for &code in keys {
            if slots.iter().any(|s| s.code == code) {
                continue;
            }
            slots.push(KeySlot { code, down: false, out: false, pressed_at: None });
        }
        if slots.len() < 2 {
            return Err(Error::ConfigurationInvalid(format!(
                "axis '{name}' needs at least 2 distinct keys"
            )));
        }
        Ok(Self {
            name,
            mode,
            slots,
            priority: Vec::new(),
            swap_delay: Duration::ZERO,
            neutral_timeout: Duration::ZERO,
            last_pressed: None,
            conflict_start: None,
            last_switch: None,
            toggle_active: None,
        })
    }

    /// Priority order for [`AxisMode::Priority`]; entries not in the group
    /// are ignored.
    pub fn with_priority(mut self, order: &[KeyCode]) -> Self {
        self.priority = order
            .iter()
            .copied()
            .filter(|c| self.slots.iter().any(|s| s.code == *c))
            .collect();
        self
    }

    pub fn with_swap_delay(mut self, delay: Duration) -> Self {
        self.swap_delay = delay;
        self
    }

    pub fn with_neutral_timeout(mut self, timeout: Duration) -> Self {
        self.neutral_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AxisMode {
        self.mode
    }

    pub fn keys(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.slots.iter().map(|s| s.code)
    }

    pub fn contains(&self, code: KeyCode) -> bool {
        self.slots.iter().any(|s| s.code == code)
    }

    /// Keys this axis currently reports as pressed on the output side.
    pub fn held_outputs(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.slots.iter().filter(|s| s.out).map(|s| s.code)
    }

    /// The single output winner, if any (always `None`-or-one outside
    /// `combine` mode).
    pub fn winner(&self) -> Option<KeyCode> {
        self.slots.iter().find(|s| s.out).map(|s| s.code)
    }

    /// Feed one key edge. Returns `false` when the code is not part of this
    /// group (the event should be handled elsewhere). Auto-repeat must be
    /// filtered out by the caller.
    pub fn on_key(&mut self, code: KeyCode, is_down: bool, now: Instant) -> bool {
        let Some(idx) = self.slots.iter().position(|s| s.code == code) else {
            return false;
        };

        if self.mode == AxisMode::Toggle {
            if is_down {
                self.toggle_active = if self.toggle_active == Some(code) {
                    None
                } else {
                    Some(code)
                };
            }
            // ups are ignored entirely
            return true;
        }

        let slot = &mut self.slots[idx];
        slot.down = is_down;
        if is_down {
            self.last_pressed = Some(code);
            if slot.pressed_at.is_none() {
                slot.pressed_at = Some(now);
            }
        } else {
            slot.pressed_at = None;
        }

        if self.pressed_count() >= 2 {
            if self.conflict_start.is_none() {
                self.conflict_start = Some(now);
            }
        } else {
            self.conflict_start = None;
        }
        true
    }

    /// Recompute the desired output and return the transitions against the
    /// last emitted state. Idempotent between `on_key` calls (modulo an
    /// elapsing swap-delay or neutral-timeout).
    pub fn resolve(&mut self, now: Instant) -> Vec<(KeyCode, bool)> {
        let desired = self.desired(now);
        let mut diff = Vec::new();
        for (i, want) in desired.iter().enumerate() {
            if self.slots[i].out != *want {
                self.slots[i].out = *want;
                diff.push((self.slots[i].code, *want));
            }
        }
        diff
    }

    /// Drop all internal state (used by the pause key): every key is treated
    /// as released and the output transitions to neutral.
    pub fn clear(&mut self, now: Instant) -> Vec<(KeyCode, bool)> {
        for s in &mut self.slots {
            s.down = false;
            s.pressed_at = None;
        }
        self.last_pressed = None;
        self.conflict_start = None;
        self.toggle_active = None;
        self.resolve(now)
    }

    fn pressed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.down).count()
    }

    fn mirror(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.down).collect()
    }

    fn only(&self, code: Option<KeyCode>) -> Vec<bool> {
        self.slots.iter().map(|s| Some(s.code) == code).collect()
    }

    fn current_out(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.out).collect()
    }

    fn debounce_ok(&self, now: Instant) -> bool {
        if self.swap_delay.is_zero() {
            return true;
        }
        match self.last_switch {
            Some(t) => now.duration_since(t) >= self.swap_delay,
            None => true,
        }
    }

    fn neutral_timeout_hit(&self, now: Instant) -> bool {
        if self.neutral_timeout.is_zero() || self.pressed_count() < 2 {
            return false;
        }
        match self.conflict_start {
            Some(t) => now.duration_since(t) >= self.neutral_timeout,
            None => false,
        }
    }

    /// Earliest-pressed held key (press-order timestamp tie-break: first in
    /// group order).
    fn earliest(&self) -> Option<KeyCode> {
        self.slots
            .iter()
            .filter(|s| s.down)
            .min_by_key(|s| s.pressed_at)
            .map(|s| s.code)
    }

    /// `recent` selection: last pressed if still held, else the latest
    /// first-press timestamp among held keys.
    fn recent_choice(&self) -> Option<KeyCode> {
        if let Some(last) = self.last_pressed {
            if self.slots.iter().any(|s| s.code == last && s.down) {
                return Some(last);
            }
        }
        self.slots
            .iter()
            .filter(|s| s.down)
            .max_by_key(|s| s.pressed_at)
            .map(|s| s.code)
    }

    fn desired(&mut self, now: Instant) -> Vec<bool> {
        match self.mode {
            AxisMode::Combine => return self.mirror(),
            AxisMode::Toggle => return self.only(self.toggle_active),
            _ => {}
        }

        let pressed = self.pressed_count();

        if self.mode == AxisMode::Neutral || self.neutral_timeout_hit(now) {
            return if pressed >= 2 {
                vec![false; self.slots.len()]
            } else {
                self.mirror()
            };
        }

        if pressed <= 1 {
            return self.mirror();
        }

        // 2+ keys held: arbitrate.
        match self.mode {
            AxisMode::Sticky => {
                let winner = self.winner();
                if winner.is_some() {
                    return self.only(winner);
                }
                if !self.debounce_ok(now) {
                    return self.only(winner);
                }
                let chosen = self.recent_choice();
                self.last_switch = Some(now);
                self.only(chosen)
            }
            AxisMode::First => self.only(self.earliest()),
            AxisMode::Invert => {
                if !self.debounce_ok(now) {
                    return self.current_out();
                }
                let chosen = self.earliest();
                self.note_switch_if_new(chosen, now);
                self.only(chosen)
            }
            AxisMode::Priority => {
                if !self.debounce_ok(now) {
                    return self.current_out();
                }
                for &p in &self.priority {
                    if self.slots.iter().any(|s| s.code == p && s.down) {
                        self.note_switch_if_new(Some(p), now);
                        return self.only(Some(p));
                    }
                }
                let chosen = self.recent_choice();
                self.note_switch_if_new(chosen, now);
                self.only(chosen)
            }
            // Recent is also the documented default arbitration.
            _ => {
                if !self.debounce_ok(now) {
                    return self.current_out();
                }
                let chosen = self.recent_choice();
                self.note_switch_if_new(chosen, now);
                self.only(chosen)
            }
        }
    }

    fn note_switch_if_new(&mut self, chosen: Option<KeyCode>, now: Instant) {
        let already_out = chosen
            .map(|c| self.slots.iter().any(|s| s.code == c && s.out))
            .unwrap_or(false);
        if !already_out {
            self.last_switch = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: KeyCode = 30;
    const D: KeyCode = 32;
    const W: KeyCode = 17;

    fn t0() -> Instant {
        Instant::now()
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    fn axis(mode: AxisMode) -> AxisResolver {
        AxisResolver::new("horizontal", &[A, D], mode).unwrap()
    }

    fn assert_single_winner(ax: &AxisResolver) {
        assert!(ax.held_outputs().count() <= 1);
    }

    #[test]
    fn rejects_degenerate_groups() {
        assert!(AxisResolver::new("bad", &[A], AxisMode::Recent).is_err());
        assert!(AxisResolver::new("dup", &[A, A], AxisMode::Recent).is_err());
    }

    #[test]
    fn recent_last_press_wins_and_reverts_on_release() {
        let base = t0();
        let mut ax = axis(AxisMode::Recent);

        ax.on_key(A, true, at(base, 0));
        assert_eq!(ax.resolve(at(base, 0)), vec![(A, true)]);

        ax.on_key(D, true, at(base, 10));
        let diff = ax.resolve(at(base, 10));
        assert!(diff.contains(&(A, false)) && diff.contains(&(D, true)));
        assert_single_winner(&ax);

        // releasing the winner switches back to A without a new press
        ax.on_key(D, false, at(base, 20));
        let diff = ax.resolve(at(base, 20));
        assert!(diff.contains(&(D, false)) && diff.contains(&(A, true)));
    }

    #[test]
    fn recent_re_press_of_held_key_retakes_output() {
        // A held, D pressed (D wins), then A released and pressed again.
        let base = t0();
        let mut ax = axis(AxisMode::Recent);
        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 5));
        ax.resolve(at(base, 5));
        ax.on_key(A, false, at(base, 10));
        ax.resolve(at(base, 10));
        ax.on_key(A, true, at(base, 15));
        let diff = ax.resolve(at(base, 15));
        assert!(diff.contains(&(D, false)) && diff.contains(&(A, true)));
    }

    #[test]
    fn first_earliest_press_wins() {
        let base = t0();
        let mut ax = axis(AxisMode::First);
        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 10));
        // A was pressed first and stays the output
        assert_eq!(ax.resolve(at(base, 10)), vec![]);
        assert_eq!(ax.winner(), Some(A));
    }

    #[test]
    fn invert_selects_like_first() {
        let base = t0();
        let mut ax = axis(AxisMode::Invert);
        ax.on_key(D, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(A, true, at(base, 10));
        assert_eq!(ax.resolve(at(base, 10)), vec![]);
        assert_eq!(ax.winner(), Some(D));
    }

    #[test]
    fn neutral_cancels_on_conflict() {
        let base = t0();
        let mut ax = axis(AxisMode::Neutral);
        ax.on_key(A, true, at(base, 0));
        assert_eq!(ax.resolve(at(base, 0)), vec![(A, true)]);
        ax.on_key(D, true, at(base, 10));
        assert_eq!(ax.resolve(at(base, 10)), vec![(A, false)]);
        ax.on_key(D, false, at(base, 20));
        assert_eq!(ax.resolve(at(base, 20)), vec![(A, true)]);
    }

    #[test]
    fn combine_mirrors_exactly() {
        let base = t0();
        let mut ax = axis(AxisMode::Combine);
        ax.on_key(A, true, at(base, 0));
        ax.on_key(D, true, at(base, 1));
        let diff = ax.resolve(at(base, 1));
        assert!(diff.contains(&(A, true)) && diff.contains(&(D, true)));
        assert_eq!(ax.held_outputs().count(), 2);
        ax.on_key(A, false, at(base, 2));
        assert_eq!(ax.resolve(at(base, 2)), vec![(A, false)]);
    }

    #[test]
    fn priority_order_then_recent_fallback() {
        let base = t0();
        let mut ax = AxisResolver::new("p", &[A, D, W], AxisMode::Priority)
            .unwrap()
            .with_priority(&[W]);

        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 5));
        // neither is in the priority list: recent fallback picks D
        ax.resolve(at(base, 5));
        assert_eq!(ax.winner(), Some(D));

        ax.on_key(W, true, at(base, 10));
        ax.resolve(at(base, 10));
        assert_eq!(ax.winner(), Some(W));
        assert_single_winner(&ax);
    }

    #[test]
    fn sticky_winner_survives_newer_presses() {
        let base = t0();
        let mut ax = axis(AxisMode::Sticky);
        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 10));
        assert_eq!(ax.resolve(at(base, 10)), vec![]);
        assert_eq!(ax.winner(), Some(A));

        // only once A is released does D become eligible
        ax.on_key(A, false, at(base, 20));
        let diff = ax.resolve(at(base, 20));
        assert!(diff.contains(&(A, false)) && diff.contains(&(D, true)));
    }

    #[test]
    fn toggle_down_edges_flip_releases_ignored() {
        let base = t0();
        let mut ax = axis(AxisMode::Toggle);

        ax.on_key(A, true, at(base, 0));
        assert_eq!(ax.resolve(at(base, 0)), vec![(A, true)]);
        ax.on_key(A, false, at(base, 5));
        assert_eq!(ax.resolve(at(base, 5)), vec![]);

        // second down-edge while toggled on clears it
        ax.on_key(A, true, at(base, 10));
        assert_eq!(ax.resolve(at(base, 10)), vec![(A, false)]);
        ax.on_key(A, false, at(base, 15));
        assert_eq!(ax.resolve(at(base, 15)), vec![]);
    }

    #[test]
    fn toggle_switches_exclusive_winner() {
        let base = t0();
        let mut ax = axis(AxisMode::Toggle);
        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 5));
        let diff = ax.resolve(at(base, 5));
        assert!(diff.contains(&(A, false)) && diff.contains(&(D, true)));
    }

    #[test]
    fn swap_delay_holds_previous_output() {
        let base = t0();
        let mut ax = axis(AxisMode::Recent).with_swap_delay(Duration::from_millis(50));

        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 10));
        ax.resolve(at(base, 10)); // first switch, notes the switch time
        assert_eq!(ax.winner(), Some(D));

        // a flurry faster than the delay keeps D
        ax.on_key(A, false, at(base, 20));
        ax.on_key(A, true, at(base, 25));
        assert_eq!(ax.resolve(at(base, 25)), vec![]);
        assert_eq!(ax.winner(), Some(D));

        // once the delay elapses the newer press takes over
        let diff = ax.resolve(at(base, 70));
        assert!(diff.contains(&(D, false)) && diff.contains(&(A, true)));
    }

    #[test]
    fn neutral_timeout_forces_none_during_long_conflict() {
        let base = t0();
        let mut ax = axis(AxisMode::Recent).with_neutral_timeout(Duration::from_millis(100));

        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        ax.on_key(D, true, at(base, 10));
        ax.resolve(at(base, 10));
        assert_eq!(ax.winner(), Some(D));

        // conflict persists past the timeout
        assert_eq!(ax.resolve(at(base, 120)), vec![(D, false)]);
        assert_eq!(ax.winner(), None);

        // releasing one key ends the conflict and mirrors again
        ax.on_key(D, false, at(base, 130));
        assert_eq!(ax.resolve(at(base, 130)), vec![(A, true)]);
    }

    #[test]
    fn resolve_is_idempotent_without_edges() {
        let base = t0();
        for mode in [
            AxisMode::Recent,
            AxisMode::First,
            AxisMode::Neutral,
            AxisMode::Sticky,
            AxisMode::Combine,
        ] {
            let mut ax = axis(mode);
            ax.on_key(A, true, at(base, 0));
            ax.on_key(D, true, at(base, 1));
            ax.resolve(at(base, 1));
            assert_eq!(ax.resolve(at(base, 1)), vec![], "{mode:?}");
            assert_eq!(ax.resolve(at(base, 2)), vec![], "{mode:?}");
        }
    }

    #[test]
    fn clear_releases_everything() {
        let base = t0();
        let mut ax = axis(AxisMode::Recent);
        ax.on_key(A, true, at(base, 0));
        ax.resolve(at(base, 0));
        assert_eq!(ax.clear(at(base, 5)), vec![(A, false)]);
        assert_eq!(ax.held_outputs().count(), 0);
    }
}
