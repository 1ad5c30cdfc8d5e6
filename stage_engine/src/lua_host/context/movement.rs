use crate::lua_host::types::Vec2;

use super::objects::ObjectKey;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Walk {
    pub(super) target: Vec2,
    /// Handle into the callback runtime, fired on arrival.
    pub(super) callback: Option<u32>,
    /// Object bound as subject when the arrival callback runs.
    pub(super) subject: Option<ObjectKey>,
}

#[derive(Debug)]
pub(super) struct PlayerState {
    pub(super) key: Option<ObjectKey>,
    pub(super) max_speed: f32,
    pub(super) interruptible: bool,
    pub(super) walk: Option<Walk>,
}

impl PlayerState {
    pub(super) fn new(max_speed: f32) -> Self {
        Self {
            key: None,
            max_speed,
            interruptible: true,
            walk: None,
        }
    }

    /// Starts a walk and returns the callback handle of the walk it replaced.
    pub(super) fn start_walk(&mut self, walk: Walk) -> Option<u32> {
        self.walk
            .replace(walk)
            .and_then(|previous| previous.callback)
    }

    pub(super) fn stop_walking(&mut self) -> Option<u32> {
        self.walk.take().and_then(|walk| walk.callback)
    }
}

/// Moves `position` towards `target` at `speed` units per second. Returns the
/// new position and whether the target was reached.
pub(super) fn advance(position: Vec2, target: Vec2, speed: f32, dt: f32) -> (Vec2, bool) {
    let delta = target - position;
    let distance = delta.length();
    let step = speed.max(0.0) * dt.max(0.0);
    if distance <= step || distance <= f32::EPSILON {
        return (target, true);
    }
    (position + delta * (step / distance), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_towards_target() {
        let (position, arrived) = advance(Vec2::ZERO, Vec2::new(100.0, 0.0), 50.0, 0.5);
        assert_eq!(position, Vec2::new(25.0, 0.0));
        assert!(!arrived);

        let (position, arrived) = advance(Vec2::new(90.0, 0.0), Vec2::new(100.0, 0.0), 50.0, 0.5);
        assert_eq!(position, Vec2::new(100.0, 0.0));
        assert!(arrived);
    }

    #[test]
    fn zero_speed_never_arrives() {
        let (position, arrived) = advance(Vec2::ZERO, Vec2::new(10.0, 0.0), 0.0, 1.0);
        assert_eq!(position, Vec2::ZERO);
        assert!(!arrived);
    }

    #[test]
    fn new_walk_hands_back_replaced_callback() {
        let mut player = PlayerState::new(100.0);
        let first = Walk {
            target: Vec2::new(1.0, 1.0),
            callback: Some(7),
            subject: None,
        };
        assert_eq!(player.start_walk(first), None);
        let second = Walk {
            target: Vec2::new(2.0, 2.0),
            callback: None,
            subject: None,
        };
        assert_eq!(player.start_walk(second), Some(7));
        assert_eq!(player.stop_walking(), None);
        assert!(player.walk.is_none());
    }
}
