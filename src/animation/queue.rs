//! Per-entity animation queue.
//!
//! A FIFO of queued clips. A repeating entry restarts itself; a one-shot
//! entry fires its end callback exactly once, is consumed, and playback
//! moves on. When the queue drains, the entity falls back to the model's
//! "idle" animation (with a randomized starting phase) if it has one.

use std::collections::VecDeque;

/// Fired once when a one-shot entry completes.
pub type EndCallback = Box<dyn FnOnce()>;

/// Fired every frame with the normalized time within the animation and the
/// entry's sfx segment state; gameplay uses it to place footstep sounds at
/// segment boundaries.
pub type FrameCallback = Box<dyn FnMut(f32, &mut u32)>;

pub struct QueuedAnimation {
    /// Index into the model's animation array.
    pub animation: usize,
    pub repeat: bool,
    pub speed: f32,
    pub end: Option<EndCallback>,
    pub frame: Option<FrameCallback>,
    pub sfx_state: u32,
}

impl QueuedAnimation {
    #[must_use]
    pub fn new(animation: usize) -> Self {
        Self {
            animation,
            repeat: false,
            speed: 1.0,
            end: None,
            frame: None,
            sfx_state: 0,
        }
    }

    #[must_use]
    pub fn repeating(animation: usize) -> Self {
        Self {
            repeat: true,
            ..Self::new(animation)
        }
    }

    /// Runs the end callback, at most once.
    pub fn fire_end(&mut self) {
        if let Some(end) = self.end.take() {
            end();
        }
    }
}

impl std::fmt::Debug for QueuedAnimation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedAnimation")
            .field("animation", &self.animation)
            .field("repeat", &self.repeat)
            .field("speed", &self.speed)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct AnimationQueue {
    entries: VecDeque<QueuedAnimation>,
}

impl AnimationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueuedAnimation) {
        self.entries.push_back(entry);
    }

    /// Clears pending entries. The current entry's end callback fires so a
    /// waiting caller is not left hanging.
    pub fn clear(&mut self) {
        if let Some(mut current) = self.entries.pop_front() {
            current.fire_end();
        }
        self.entries.clear();
    }

    #[must_use]
    pub fn current(&self) -> Option<&QueuedAnimation> {
        self.entries.front()
    }

    pub fn current_mut(&mut self) -> Option<&mut QueuedAnimation> {
        self.entries.front_mut()
    }

    /// Consumes the finished front entry.
    pub fn advance(&mut self) -> Option<QueuedAnimation> {
        self.entries.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Attaches an end callback to the most recently queued entry.
    pub fn set_end_callback(&mut self, end: EndCallback) {
        if let Some(last) = self.entries.back_mut() {
            last.end = Some(end);
        }
    }

    /// Attaches a frame callback to the most recently queued entry.
    pub fn set_frame_callback(&mut self, frame: FrameCallback) {
        if let Some(last) = self.entries.back_mut() {
            last.frame = Some(frame);
        }
    }

    /// Changes the playback speed of the current entry.
    pub fn set_speed(&mut self, speed: f32) {
        if let Some(current) = self.entries.front_mut() {
            current.speed = speed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_fifo_order() {
        let mut queue = AnimationQueue::new();
        queue.push(QueuedAnimation::new(3));
        queue.push(QueuedAnimation::new(5));
        assert_eq!(queue.current().unwrap().animation, 3);
        queue.advance();
        assert_eq!(queue.current().unwrap().animation, 5);
    }

    #[test]
    fn test_end_callback_fires_once() {
        let fired = Rc::new(Cell::new(0));
        let mut queue = AnimationQueue::new();
        queue.push(QueuedAnimation::new(0));
        let counter = fired.clone();
        queue.set_end_callback(Box::new(move || counter.set(counter.get() + 1)));

        let mut entry = queue.advance().unwrap();
        entry.fire_end();
        entry.fire_end();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_clear_fires_current_end() {
        let fired = Rc::new(Cell::new(0));
        let mut queue = AnimationQueue::new();
        queue.push(QueuedAnimation::new(0));
        let counter = fired.clone();
        queue.set_end_callback(Box::new(move || counter.set(counter.get() + 1)));
        queue.push(QueuedAnimation::new(1));

        queue.clear();
        assert_eq!(fired.get(), 1);
        assert!(queue.is_empty());
    }
}
