//! Learning-rate reduction on metric plateau

use tracing::{info, warn};

/// Whether an improving metric goes down or up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Lower is better (losses, errors)
    Minimize,
    /// Higher is better (scores)
    Maximize,
}

impl Direction {
    fn improved(self, metric: f32, best: f32, min_delta: f32) -> bool {
        match self {
            Direction::Minimize => metric < best - min_delta,
            Direction::Maximize => metric > best + min_delta,
        }
    }
}

/// Reduce the learning rate when a monitored metric stops improving
///
/// Fed one metric value per epoch; after `patience` epochs without
/// improvement the controller proposes a reduced rate and enters a
/// cooldown during which the wait counter stays frozen. The reduction is
/// multiplicative by default, or subtractive when `reduce_lin` is set,
/// and never goes below `min_lr`.
pub struct ReduceLrOnPlateau {
    patience: usize,
    factor: f32,
    min_delta: f32,
    min_lr: f32,
    cooldown: usize,
    reduce_lin: bool,
    direction: Direction,
    best: Option<f32>,
    wait: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize, factor: f32, direction: Direction) -> Self {
        Self {
            patience,
            factor,
            min_delta: 1e-4,
            min_lr: 0.0,
            cooldown: 0,
            reduce_lin: false,
            direction,
            best: None,
            wait: 0,
            cooldown_counter: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f32) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Subtract `factor` from the rate instead of multiplying by it
    pub fn with_linear_reduction(mut self, reduce_lin: bool) -> Self {
        self.reduce_lin = reduce_lin;
        self
    }

    /// Epochs waited since the last improvement
    pub fn wait(&self) -> usize {
        self.wait
    }

    /// Best metric value observed so far
    pub fn best(&self) -> Option<f32> {
        self.best
    }

    fn reduced(&self, lr: f32) -> f32 {
        let next = if self.reduce_lin {
            lr - self.factor
        } else {
            lr * self.factor
        };
        next.max(self.min_lr)
    }

    /// Feed one epoch's metric; returns the new rate when a reduction fires
    ///
    /// A non-finite metric is ignored entirely: no best update, no wait
    /// increment, only a warning.
    pub fn on_epoch_end(&mut self, metric: f32, lr: f32) -> Option<f32> {
        if !metric.is_finite() {
            warn!(metric = metric as f64, "non-finite metric fed to plateau controller");
            return None;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        let improved = match self.best {
            Some(best) => self.direction.improved(metric, best, self.min_delta),
            None => true,
        };

        if improved {
            self.best = Some(metric);
            self.wait = 0;
            return None;
        }

        if self.cooldown_counter > 0 {
            return None;
        }

        self.wait += 1;
        if self.wait >= self.patience && lr > self.min_lr {
            let new_lr = self.reduced(lr);
            self.cooldown_counter = self.cooldown;
            self.wait = 0;
            info!(old_lr = lr as f64, new_lr = new_lr as f64, "reducing learning rate on plateau");
            return Some(new_lr);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reduces_after_patience_flat_epochs() {
        let mut controller = ReduceLrOnPlateau::new(2, 0.5, Direction::Minimize);

        assert_eq!(controller.on_epoch_end(1.0, 0.001), None);
        assert_eq!(controller.on_epoch_end(1.0, 0.001), None);
        let reduced = controller.on_epoch_end(1.0, 0.001);
        assert_relative_eq!(reduced.unwrap(), 0.0005, epsilon = 1e-9);
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut controller = ReduceLrOnPlateau::new(2, 0.5, Direction::Minimize);

        controller.on_epoch_end(1.0, 0.001);
        controller.on_epoch_end(1.0, 0.001);
        // Strict improvement beyond min_delta resets the counter.
        controller.on_epoch_end(0.5, 0.001);
        assert_eq!(controller.wait(), 0);
        assert_eq!(controller.on_epoch_end(0.6, 0.001), None);
        assert!(controller.on_epoch_end(0.6, 0.001).is_some());
    }

    #[test]
    fn test_within_min_delta_is_not_improvement() {
        let mut controller =
            ReduceLrOnPlateau::new(1, 0.5, Direction::Minimize).with_min_delta(0.01);

        controller.on_epoch_end(1.0, 0.1);
        // 0.995 is inside the min_delta band, so it counts as flat.
        assert!(controller.on_epoch_end(0.995, 0.1).is_some());
    }

    #[test]
    fn test_maximize_direction() {
        let mut controller = ReduceLrOnPlateau::new(1, 0.5, Direction::Maximize);

        controller.on_epoch_end(0.5, 0.1);
        assert_eq!(controller.on_epoch_end(0.9, 0.1), None);
        assert!(controller.on_epoch_end(0.8, 0.1).is_some());
    }

    #[test]
    fn test_min_lr_floor() {
        let mut controller =
            ReduceLrOnPlateau::new(1, 0.5, Direction::Minimize).with_min_lr(0.0004);

        controller.on_epoch_end(1.0, 0.001);
        let reduced = controller.on_epoch_end(1.0, 0.001).unwrap();
        assert_relative_eq!(reduced, 0.0005, epsilon = 1e-9);

        controller.on_epoch_end(1.0, 0.0005);
        let reduced = controller.on_epoch_end(1.0, 0.0005).unwrap();
        assert_relative_eq!(reduced, 0.0004, epsilon = 1e-9);

        // At the floor no further reduction fires.
        controller.on_epoch_end(1.0, 0.0004);
        assert_eq!(controller.on_epoch_end(1.0, 0.0004), None);
    }

    #[test]
    fn test_linear_reduction() {
        let mut controller = ReduceLrOnPlateau::new(1, 0.0001, Direction::Minimize)
            .with_linear_reduction(true);

        controller.on_epoch_end(1.0, 0.001);
        let reduced = controller.on_epoch_end(1.0, 0.001).unwrap();
        assert_relative_eq!(reduced, 0.0009, epsilon = 1e-9);
    }

    #[test]
    fn test_cooldown_defers_next_reduction() {
        let mut controller =
            ReduceLrOnPlateau::new(2, 0.5, Direction::Minimize).with_cooldown(2);

        controller.on_epoch_end(1.0, 0.1);
        assert_eq!(controller.on_epoch_end(1.0, 0.1), None);
        assert!(controller.on_epoch_end(1.0, 0.1).is_some());

        // Cooldown holds the wait counter at zero, so the next reduction
        // needs a fresh run of flat epochs after it expires.
        assert_eq!(controller.on_epoch_end(1.0, 0.05), None);
        assert_eq!(controller.on_epoch_end(1.0, 0.05), None);
        assert!(controller.on_epoch_end(1.0, 0.05).is_some());
    }

    #[test]
    fn test_nan_metric_is_ignored() {
        let mut controller = ReduceLrOnPlateau::new(2, 0.5, Direction::Minimize);

        controller.on_epoch_end(1.0, 0.001);
        controller.on_epoch_end(f32::NAN, 0.001);
        // Neither the wait counter nor the best value moved.
        assert_eq!(controller.wait(), 0);
        assert_eq!(controller.best(), Some(1.0));
        assert_eq!(controller.on_epoch_end(f32::NAN, 0.001), None);
    }
}
