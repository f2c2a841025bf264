//! Deterministic post-motion frame sampling.
//!
//! The sampler rate-limits which motion-qualifying frames reach the
//! expensive downstream collaborators. It is stateless: the decision is a
//! pure function of the externally supplied total-frame counter, so there is
//! no internal counter to desynchronize. The orchestrator only consults it
//! for frames that already passed motion detection.

/// Samples one frame in `rate` by total-frame counter.
#[derive(Clone, Copy, Debug)]
pub struct FrameSampler {
    rate: u32,
}

impl FrameSampler {
    /// `rate` is validated to be >= 1 by configuration; 1 processes every
    /// frame.
    pub fn new(rate: u32) -> Self {
        debug_assert!(rate >= 1, "sampling rate must be at least 1");
        Self { rate }
    }

    /// True exactly when the counter is a multiple of the sampling rate.
    pub fn should_process(&self, frame_count: u64) -> bool {
        frame_count % u64::from(self.rate) == 0
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Apply a reloaded sampling rate.
    pub fn set_rate(&mut self, rate: u32) {
        debug_assert!(rate >= 1, "sampling rate must be at least 1");
        self.rate = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_one_processes_every_frame() {
        let sampler = FrameSampler::new(1);
        for count in 0..100 {
            assert!(sampler.should_process(count));
        }
    }

    #[test]
    fn rate_ten_processes_exactly_one_in_ten() {
        let sampler = FrameSampler::new(10);
        let processed = (1..=1000u64)
            .filter(|&count| sampler.should_process(count))
            .count();
        assert_eq!(processed, 100);
        for count in (10..=1000).step_by(10) {
            assert!(sampler.should_process(count));
            assert!(!sampler.should_process(count + 1));
        }
    }

    #[test]
    fn decision_is_a_pure_function_of_the_counter() {
        let sampler = FrameSampler::new(7);
        // Repeated queries for the same counter never disagree.
        for _ in 0..3 {
            assert!(sampler.should_process(21));
            assert!(!sampler.should_process(22));
        }
    }
}
