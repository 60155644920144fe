//! Timer manager
//!
//! Keeps armed timers sorted by expiration, earliest first. A timer is
//! identified by its owner block and the owner-chosen timer id: arming the
//! same identity again replaces the pending timer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::engine::EngineError;
use super::Manager;
use crate::core::port::Payload;
use crate::core::BlockId;

/// An armed timer
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    /// Block notified on expiration
    pub owner: BlockId,
    /// Identifier chosen by the owner
    pub tid: i32,
    pub expiration: Instant,
    /// Opaque argument handed back on expiration
    pub arg: Payload,
}

/// Timers sorted by ascending expiration
///
/// Timers with equal expirations fire in arming order.
#[derive(Debug, Default)]
pub struct TimerManager {
    timers: VecDeque<Timer>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, replacing any pending timer with the same identity
    pub fn add(&mut self, timer: Timer) {
        self.remove(timer.owner, timer.tid);
        let pos = self
            .timers
            .partition_point(|t| t.expiration <= timer.expiration);
        self.timers.insert(pos, timer);
    }

    /// Disarm a timer
    ///
    /// # Returns
    /// `true` if the timer was pending
    pub fn remove(&mut self, owner: BlockId, tid: i32) -> bool {
        match self
            .timers
            .iter()
            .position(|t| t.owner == owner && t.tid == tid)
        {
            Some(pos) => {
                self.timers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Pop the earliest timer if it expired at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<Timer> {
        if self.timers.front()?.expiration <= now {
            self.timers.pop_front()
        } else {
            None
        }
    }

    /// Expiration of the earliest timer
    pub fn next_expiration(&self) -> Option<Instant> {
        self.timers.front().map(|t| t.expiration)
    }

    /// Pending timers in firing order
    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.timers.iter()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Manager {
    /// Arm timer `tid` of block `owner` to fire after `delay`
    ///
    /// # Errors
    /// * [`EngineError::BlockNotFound`] if `owner` is not a live block
    /// * [`EngineError::DelayOutOfRange`] if the expiration cannot be represented
    pub fn timer_add(&mut self, owner: BlockId, tid: i32, delay: Duration, arg: Payload) -> Result<(), EngineError> {
        if !self.blocks.contains_key(&owner) {
            error!(bk_id = %owner, tid, "Cannot arm timer of unknown block");
            return Err(EngineError::BlockNotFound(owner));
        }
        let expiration = self.clock.now().checked_add(delay).ok_or_else(|| {
            error!(bk_id = %owner, tid, "Timer delay out of range");
            EngineError::DelayOutOfRange(delay)
        })?;
        debug!(bk_id = %owner, tid, delay_ms = delay.as_millis() as u64, "Arm timer");
        self.timers.add(Timer {
            owner,
            tid,
            expiration,
            arg,
        });
        Ok(())
    }

    /// Disarm timer `tid` of block `owner`; unknown timers are ignored
    pub fn timer_del(&mut self, owner: BlockId, tid: i32) {
        if self.timers.remove(owner, tid) {
            debug!(bk_id = %owner, tid, "Disarm timer");
        }
    }

    /// Fire every timer expired at the current time
    ///
    /// The clock is read once; each timer is removed before its owner's
    /// callback runs, so the callback may re-arm it.
    ///
    /// # Returns
    /// The number of expired timers
    pub fn timer_check_exp(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_expired(now) {
            fired += 1;
            if !self.blocks.contains_key(&timer.owner) {
                warn!(bk_id = %timer.owner, tid = timer.tid, "Timer owner not found, timer dropped");
                continue;
            }
            debug!(bk_id = %timer.owner, tid = timer.tid, "Timer expired");
            self.with_block(timer.owner, |block, cx| block.on_timer(cx, &timer));
        }
        fired
    }

    /// Disarm every timer
    pub fn timer_clear(&mut self) {
        self.timers.clear();
    }

    /// Get the number of armed timers
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Armed timers in firing order
    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }
}
